use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub action: String,
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub action: String,
    pub confidence: f64,
}

/// Bounded log of user actions.
///
/// Keeps up to `capacity` records per action name, plus the last
/// `sequence_capacity` action names in order for transition counting.
#[derive(Debug)]
pub struct UsageHistory {
    records: HashMap<String, VecDeque<UsageRecord>>,
    sequence: VecDeque<String>,
    capacity: usize,
    sequence_capacity: usize,
}

impl UsageHistory {
    pub fn new(capacity: usize, sequence_capacity: usize) -> Self {
        Self {
            records: HashMap::new(),
            sequence: VecDeque::new(),
            capacity,
            sequence_capacity,
        }
    }

    pub fn record(&mut self, record: UsageRecord) {
        if self.sequence.len() == self.sequence_capacity {
            self.sequence.pop_front();
        }
        self.sequence.push_back(record.action.clone());

        let ring = self.records.entry(record.action.clone()).or_default();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(record);
    }

    pub fn occurrences(&self, action: &str) -> usize {
        self.records.get(action).map_or(0, VecDeque::len)
    }

    pub fn records(&self, action: &str) -> impl Iterator<Item = &UsageRecord> {
        self.records.get(action).into_iter().flatten()
    }

    pub fn action_count(&self) -> usize {
        self.records.len()
    }

    /// How often each other action directly followed `current`, divided by
    /// how often that action was recorded at all. Only predictions strictly
    /// above `threshold` are returned, most confident first.
    pub fn predict_next(&self, current: &str, threshold: f64) -> Vec<Prediction> {
        let mut follows: HashMap<&str, usize> = HashMap::new();
        for (prev, next) in self.sequence.iter().zip(self.sequence.iter().skip(1)) {
            if prev == current && next != current {
                *follows.entry(next.as_str()).or_default() += 1;
            }
        }

        let mut predictions: Vec<Prediction> = follows
            .into_iter()
            .filter_map(|(action, count)| {
                let total = self.occurrences(action);
                if total == 0 {
                    return None;
                }
                let confidence = (count as f64 / total as f64).min(1.0);
                (confidence > threshold).then(|| Prediction {
                    action: action.to_string(),
                    confidence,
                })
            })
            .collect();

        predictions.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.action.cmp(&b.action))
        });
        predictions
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.sequence.clear();
    }
}
