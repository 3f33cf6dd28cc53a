//! Pacing configuration and rolling metrics
//!
//! `PredictiveDialerConfig` is owned by the campaign and mutated only through
//! explicit start/stop/update operations. `DialerMetrics` is the rolling
//! operational signal the pacing controller feeds on; the continuous signals
//! are updated with exponentially-weighted smoothing so a single noisy sample
//! cannot swing the dial rate.

use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// Campaign dialing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DialMethod {
    /// Predictive: the control loop places calls ahead of agent availability
    #[default]
    Autodial,
    /// Agent pulls the next contact and dials manually
    ManualDial,
    /// Agent previews the contact before the dial is placed
    ManualPreview,
    /// Campaign present but not dialed
    Skip,
}

impl fmt::Display for DialMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialMethod::Autodial => write!(f, "autodial"),
            DialMethod::ManualDial => write!(f, "manual_dial"),
            DialMethod::ManualPreview => write!(f, "manual_preview"),
            DialMethod::Skip => write!(f, "skip"),
        }
    }
}

impl DialMethod {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "autodial" => Some(DialMethod::Autodial),
            "manual_dial" => Some(DialMethod::ManualDial),
            "manual_preview" => Some(DialMethod::ManualPreview),
            "skip" => Some(DialMethod::Skip),
            _ => None,
        }
    }

    /// Check if the mode is driven by the autodial control loop
    pub fn is_predictive(&self) -> bool {
        matches!(self, DialMethod::Autodial)
    }
}

/// Per-campaign pacing configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PredictiveDialerConfig {
    /// Owning campaign
    pub campaign_id: i64,

    /// Dialing mode
    #[serde(default)]
    pub dial_method: DialMethod,

    /// Baseline dial speed in calls per minute
    #[validate(range(min = 0.1, message = "dial_speed must be positive"))]
    pub dial_speed: f64,

    /// Hard ceiling on simultaneous placed calls
    #[validate(range(min = 1, message = "max_concurrent_calls must be at least 1"))]
    pub max_concurrent_calls: u32,

    /// Abandon-rate ceiling as a fraction (e.g. 0.05)
    #[validate(range(min = 0.0, max = 1.0, message = "abandon_rate_threshold must be a fraction"))]
    pub abandon_rate_threshold: f64,

    /// Operator-tunable aggressiveness multiplier
    #[validate(range(min = 0.1, max = 10.0, message = "pacing_multiplier out of range"))]
    pub pacing_multiplier: f64,

    /// Whether the campaign is currently dialing
    #[serde(default)]
    pub is_active: bool,
}

impl PredictiveDialerConfig {
    /// Create an autodial config with conservative defaults
    pub fn autodial(campaign_id: i64, max_concurrent_calls: u32) -> Self {
        Self {
            campaign_id,
            dial_method: DialMethod::Autodial,
            dial_speed: 10.0,
            max_concurrent_calls,
            abandon_rate_threshold: 0.05,
            pacing_multiplier: 1.0,
            is_active: true,
        }
    }
}

/// Rolling operational metrics for one campaign
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DialerMetrics {
    /// Agents currently free to take a call (exact gauge)
    pub available_agents: u32,

    /// Calls currently in flight (exact gauge)
    pub active_calls: u32,

    /// Smoothed average handle time in seconds
    pub average_call_time_secs: f64,

    /// Smoothed fraction of placed calls that connect
    pub connection_rate: f64,

    /// Smoothed fraction of answered calls with no agent available
    pub abandon_rate: f64,
}

impl DialerMetrics {
    /// Fold a new sample into the rolling metrics
    ///
    /// Continuous signals are smoothed (`alpha` is the weight of the new
    /// sample); agent/call counts are exact and replaced. A sample of 0.0 for
    /// a continuous signal means "no reading this period" and is skipped so a
    /// quiet interval does not drag the averages to zero.
    pub fn absorb(&mut self, sample: &DialerMetrics, alpha: f64) {
        self.available_agents = sample.available_agents;
        self.active_calls = sample.active_calls;

        if sample.average_call_time_secs > 0.0 {
            self.average_call_time_secs =
                ewma(self.average_call_time_secs, sample.average_call_time_secs, alpha);
        }
        if sample.connection_rate > 0.0 {
            self.connection_rate = ewma(self.connection_rate, sample.connection_rate, alpha);
        }
        if sample.abandon_rate > 0.0 {
            self.abandon_rate = ewma(self.abandon_rate, sample.abandon_rate, alpha);
        }
    }

    /// Fold a single terminal call result into the rates
    ///
    /// Each finished dial is one sample: connect = 1.0 or 0.0, abandon = 1.0
    /// or 0.0 (abandon only sampled for connected calls, since the abandon
    /// rate is a fraction of answered calls).
    pub fn absorb_call_result(&mut self, connected: bool, abandoned: bool, alpha: f64) {
        let connect_sample = if connected { 1.0 } else { 0.0 };
        self.connection_rate = ewma(self.connection_rate, connect_sample, alpha);

        if connected {
            let abandon_sample = if abandoned { 1.0 } else { 0.0 };
            self.abandon_rate = ewma(self.abandon_rate, abandon_sample, alpha);
        }
    }
}

fn ewma(current: f64, sample: f64, alpha: f64) -> f64 {
    if current == 0.0 {
        // First sample seeds the average
        sample
    } else {
        alpha * sample + (1.0 - alpha) * current
    }
}
