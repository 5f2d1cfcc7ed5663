//! Bounded record of recovery runs.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vigil_common::duration_millis;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub id: Uuid,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    /// Actions executed, in order, including the one that failed
    pub actions: Vec<String>,
    pub failed_action: Option<String>,
    pub error: Option<String>,
    /// Actions whose rollback ran, in rollback order
    pub rolled_back: Vec<String>,
    pub success: bool,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl RecoveryAttempt {
    pub(crate) fn started<R: Into<String>>(reason: R, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            reason: reason.into(),
            timestamp,
            actions: Vec::new(),
            failed_action: None,
            error: None,
            rolled_back: Vec::new(),
            success: false,
            duration: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RecoveryHistory {
    attempts: VecDeque<RecoveryAttempt>,
    capacity: usize,
}

impl RecoveryHistory {
    pub(crate) fn new(capacity: usize) -> Self {
        Self { attempts: VecDeque::with_capacity(capacity.min(64)), capacity: capacity.max(1) }
    }

    pub(crate) fn push(&mut self, attempt: RecoveryAttempt) {
        if self.attempts.len() == self.capacity {
            self.attempts.pop_front();
        }
        self.attempts.push_back(attempt);
    }

    /// Last `n` attempts, newest first.
    pub(crate) fn latest(&self, n: usize) -> Vec<RecoveryAttempt> {
        self.attempts.iter().rev().take(n).cloned().collect()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &RecoveryAttempt> + '_ {
        self.attempts.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.attempts.len()
    }
}
