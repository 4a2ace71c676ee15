//! Engine configuration.

use crate::error::ErrorCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What the engine does with an error of a given category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Escalation {
    /// Log and keep running.
    Absorb,
    /// Stop the engine and return the error.
    Escalate,
}

/// Decides which errors the engine survives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPolicy {
    /// Categories that are logged and dropped; everything else escalates.
    pub absorb: BTreeSet<ErrorCategory>,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            absorb: [
                ErrorCategory::ObjectiveNotFound,
                ErrorCategory::Voucher,
                ErrorCategory::LedgerChannelExists,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl ErrorPolicy {
    /// A policy that escalates every error.
    pub fn strict() -> Self {
        Self {
            absorb: BTreeSet::new(),
        }
    }

    /// The escalation for `category`.
    pub fn escalation(&self, category: ErrorCategory) -> Escalation {
        if self.absorb.contains(&category) {
            Escalation::Absorb
        } else {
            Escalation::Escalate
        }
    }
}

/// Configuration for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of the objective and payment request queues.
    pub request_buffer: usize,
    /// Capacity of the engine event broadcast.
    pub event_buffer: usize,
    /// Maximum number of outbound messages in flight.
    pub max_in_flight_sends: usize,
    /// Which errors stop the engine.
    pub error_policy: ErrorPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_buffer: 64,
            event_buffer: 1024,
            max_in_flight_sends: 32,
            error_policy: ErrorPolicy::default(),
        }
    }
}
