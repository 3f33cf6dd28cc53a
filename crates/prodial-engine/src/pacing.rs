//! Predictive pacing controller
//!
//! Decides, at each control-loop tick, how many calls should be placed for a
//! campaign so answered calls arrive at roughly the rate agents become free,
//! while keeping the abandon rate under the configured ceiling.
//!
//! This is a feedback loop: the output (dial rate) affects future input
//! (connection/abandon rate) with a delay equal to the average call duration.
//! Damping rather than sharp correction is intentional to avoid oscillation.

use parking_lot::RwLock;
use prodial_core::config::PacingConfig;
use prodial_core::models::{DialerMetrics, PredictiveDialerConfig};
use prodial_core::{DialerError, DialerResult};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use validator::Validate;

/// Pacing controller service
pub struct PacingController {
    configs: RwLock<HashMap<i64, PredictiveDialerConfig>>,
    metrics: RwLock<HashMap<i64, DialerMetrics>>,
    tuning: PacingConfig,
}

/// Snapshot of a campaign's pacing state
#[derive(Debug, Clone, serde::Serialize)]
pub struct PacingStatus {
    pub config: PredictiveDialerConfig,
    pub metrics: DialerMetrics,
    /// Current prescribed dial rate in calls per minute
    pub dial_rate: f64,
    /// Estimated caller wait time in seconds; None when no agents are available
    pub estimated_wait_secs: Option<f64>,
}

impl PacingController {
    /// Create a controller with the given tuning
    pub fn new(tuning: PacingConfig) -> Self {
        Self {
            configs: RwLock::new(HashMap::new()),
            metrics: RwLock::new(HashMap::new()),
            tuning,
        }
    }

    /// Register (or replace) a campaign's pacing configuration
    pub fn register(&self, config: PredictiveDialerConfig) -> DialerResult<()> {
        config.validate()?;
        info!(
            "Pacing registered for campaign {}: method={}, max_concurrent={}, threshold={}",
            config.campaign_id,
            config.dial_method,
            config.max_concurrent_calls,
            config.abandon_rate_threshold
        );
        self.metrics
            .write()
            .entry(config.campaign_id)
            .or_default();
        self.configs.write().insert(config.campaign_id, config);
        Ok(())
    }

    /// Remove a campaign's pacing state
    pub fn deregister(&self, campaign_id: i64) {
        self.configs.write().remove(&campaign_id);
        self.metrics.write().remove(&campaign_id);
    }

    /// Mark a campaign active or inactive
    pub fn set_active(&self, campaign_id: i64, active: bool) -> DialerResult<()> {
        let mut configs = self.configs.write();
        let config = configs
            .get_mut(&campaign_id)
            .ok_or(DialerError::CampaignNotFound(campaign_id))?;
        config.is_active = active;
        Ok(())
    }

    /// Get a campaign's configuration
    pub fn config(&self, campaign_id: i64) -> Option<PredictiveDialerConfig> {
        self.configs.read().get(&campaign_id).cloned()
    }

    /// Fold an external metrics report into the campaign's rolling signal
    pub fn update_metrics(&self, campaign_id: i64, sample: &DialerMetrics) -> DialerResult<()> {
        if !self.configs.read().contains_key(&campaign_id) {
            return Err(DialerError::CampaignNotFound(campaign_id));
        }
        let mut metrics = self.metrics.write();
        let current = metrics.entry(campaign_id).or_default();
        current.absorb(sample, self.tuning.ewma_alpha);
        debug!(
            "Metrics updated for campaign {}: agents={}, connect_rate={:.3}, abandon_rate={:.3}",
            campaign_id, current.available_agents, current.connection_rate, current.abandon_rate
        );
        Ok(())
    }

    /// Fold one terminal call result into the campaign's rates
    ///
    /// Called by the lifecycle service on every terminal call. Unknown
    /// campaigns are ignored so a late webhook cannot fault the loop.
    pub fn record_call_result(&self, campaign_id: i64, connected: bool, abandoned: bool) {
        let mut metrics = self.metrics.write();
        if let Some(current) = metrics.get_mut(&campaign_id) {
            current.absorb_call_result(connected, abandoned, self.tuning.ewma_alpha);
            if current.active_calls > 0 {
                current.active_calls -= 1;
            }
        }
    }

    /// Note a placed call against the active-call gauge
    pub fn record_call_placed(&self, campaign_id: i64) {
        let mut metrics = self.metrics.write();
        if let Some(current) = metrics.get_mut(&campaign_id) {
            current.active_calls += 1;
        }
    }

    /// Current prescribed dial rate for a campaign, in calls per minute
    ///
    /// Agent absorption rate, inflated by the inverse
    /// connection rate, scaled by the operator multiplier, damped when the
    /// abandon ceiling is breached, clamped to `[0, max_concurrent_calls]`.
    /// Zero whenever no agents are available - never dial ahead of capacity.
    pub fn dial_rate(&self, campaign_id: i64) -> f64 {
        let configs = self.configs.read();
        let config = match configs.get(&campaign_id) {
            Some(c) => c,
            None => return 0.0,
        };
        if !config.is_active {
            return 0.0;
        }

        let metrics = self.metrics.read();
        let m = match metrics.get(&campaign_id) {
            Some(m) => m,
            None => return 0.0,
        };

        if m.available_agents == 0 {
            return 0.0;
        }

        // Cold start: no handle-time signal yet, fall back to the baseline
        if m.average_call_time_secs <= 0.0 {
            return config
                .dial_speed
                .min(config.max_concurrent_calls as f64)
                .max(0.0);
        }

        let calls_per_agent_per_minute = 60.0 / m.average_call_time_secs;
        let target_connects_per_minute = m.available_agents as f64 * calls_per_agent_per_minute;

        let connection_rate = m.connection_rate.max(self.tuning.connection_rate_floor);
        let mut rate = target_connects_per_minute / connection_rate;

        rate *= config.pacing_multiplier;

        if m.abandon_rate > config.abandon_rate_threshold {
            warn!(
                "Campaign {} abandon rate {:.3} over threshold {:.3}, damping dial rate",
                campaign_id, m.abandon_rate, config.abandon_rate_threshold
            );
            rate *= self.tuning.abandon_damping;
        }

        rate.clamp(0.0, config.max_concurrent_calls as f64)
    }

    /// Integer number of calls to place in one tick of `tick_secs` seconds
    ///
    /// Also bounded by the remaining concurrency headroom so the in-flight
    /// count can never exceed `max_concurrent_calls`.
    pub fn calls_for_tick(&self, campaign_id: i64, tick_secs: u64) -> usize {
        let rate = self.dial_rate(campaign_id);
        let per_tick = (rate * tick_secs as f64 / 60.0).floor() as usize;

        let headroom = {
            let configs = self.configs.read();
            let metrics = self.metrics.read();
            match (configs.get(&campaign_id), metrics.get(&campaign_id)) {
                (Some(c), Some(m)) => {
                    (c.max_concurrent_calls as usize).saturating_sub(m.active_calls as usize)
                }
                _ => 0,
            }
        };

        per_tick.min(headroom)
    }

    /// Estimated caller wait time in seconds
    ///
    /// `average_call_time / connection_rate / available_agents`; None (not
    /// zero) when no agents are available, since the wait is unknowable.
    pub fn estimated_wait_secs(&self, campaign_id: i64) -> Option<f64> {
        let metrics = self.metrics.read();
        let m = metrics.get(&campaign_id)?;
        if m.available_agents == 0 {
            return None;
        }
        let connection_rate = m.connection_rate.max(self.tuning.connection_rate_floor);
        Some(m.average_call_time_secs / connection_rate / m.available_agents as f64)
    }

    /// Full pacing status snapshot for a campaign
    pub fn status(&self, campaign_id: i64) -> DialerResult<PacingStatus> {
        let config = self
            .config(campaign_id)
            .ok_or(DialerError::CampaignNotFound(campaign_id))?;
        let metrics = self
            .metrics
            .read()
            .get(&campaign_id)
            .cloned()
            .unwrap_or_default();
        Ok(PacingStatus {
            dial_rate: self.dial_rate(campaign_id),
            estimated_wait_secs: self.estimated_wait_secs(campaign_id),
            config,
            metrics,
        })
    }
}
