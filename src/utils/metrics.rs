use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters describing one search session's channel traffic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMetrics {
    /// When the counters were last reset
    pub started_at: DateTime<Utc>,

    /// Events folded into the task state
    pub events_applied: usize,

    /// Applied events per wire type
    pub events_by_type: HashMap<String, usize>,

    /// Messages dropped because they could not be classified
    pub decode_failures: usize,

    /// Events refused as inconsistent with the task state
    pub rejected_events: usize,

    /// Snapshots that moved status or step backwards
    pub step_regressions: usize,

    /// Reopens scheduled after unexpected closures
    pub reconnect_attempts: usize,

    /// Channels opened, including reopens
    pub channel_opens: usize,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            events_applied: 0,
            events_by_type: HashMap::new(),
            decode_failures: 0,
            rejected_events: 0,
            step_regressions: 0,
            reconnect_attempts: 0,
            channel_opens: 0,
        }
    }
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event that made it into the state
    pub fn record_applied(&mut self, kind: &str) {
        self.events_applied += 1;
        *self.events_by_type.entry(kind.to_string()).or_default() += 1;
    }

    /// Record a snapshot that was applied despite moving backwards
    pub fn record_regression(&mut self, kind: &str) {
        self.step_regressions += 1;
        self.record_applied(kind);
    }

    pub fn record_rejected(&mut self) {
        self.rejected_events += 1;
    }

    pub fn record_decode_failure(&mut self) {
        self.decode_failures += 1;
    }

    pub fn record_reconnect(&mut self) {
        self.reconnect_attempts += 1;
    }

    pub fn record_open(&mut self) {
        self.channel_opens += 1;
    }

    /// Messages seen on the channel, whatever became of them
    pub fn messages_received(&self) -> usize {
        self.events_applied + self.decode_failures + self.rejected_events
    }

    /// Reset all counters
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
