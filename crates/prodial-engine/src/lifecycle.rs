//! Guarded call lifecycle state machine
//!
//! Tracks every in-flight call through the legal transition table and its
//! ownership transfers. Illegal transitions return false and leave the call
//! untouched - a stale webhook replay must not resurrect a completed call or
//! double-count an outcome. Transitions for a single call are serialized by a
//! per-call mutex, not a global lock, to keep throughput high.
//!
//! Terminal paths close the loop: the bound contact is released back to the
//! pool with the outcome, the pacing controller gets its connect/abandon
//! sample, and the finished call is handed to the record sink.

use crate::contact_pool::ContactPool;
use crate::pacing::PacingController;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use prodial_core::models::{
    AmdResult, Call, CallLeg, CallState, DialOutcome, LegKind, Ownership,
};
use prodial_core::traits::CallRecordSink;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Optional payload attached to a transition
#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    pub ownership: Option<Ownership>,
    pub owner_id: Option<i64>,
    pub sip_call_id: Option<String>,
    pub amd_result: Option<AmdResult>,
    pub reason: Option<String>,
}

/// Aggregate statistics over the call table
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CallStatistics {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub by_state: HashMap<String, usize>,
    /// Mean duration in seconds over terminal calls with a known duration
    pub average_duration_secs: f64,
}

/// Call lifecycle service
pub struct CallLifecycle {
    calls: RwLock<HashMap<Uuid, Arc<Mutex<Call>>>>,
    pool: Arc<ContactPool>,
    pacing: Arc<PacingController>,
    sink: Arc<dyn CallRecordSink>,
}

impl CallLifecycle {
    /// Create the lifecycle service wired to its collaborators
    pub fn new(
        pool: Arc<ContactPool>,
        pacing: Arc<PacingController>,
        sink: Arc<dyn CallRecordSink>,
    ) -> Self {
        Self {
            calls: RwLock::new(HashMap::new()),
            pool,
            pacing,
            sink,
        }
    }

    /// Allocate a new call in `Initiated`, owned by the system
    pub fn create(
        &self,
        campaign_id: i64,
        contact_id: Option<i64>,
        phone_number: &str,
        priority: i32,
        scheduled_callback: Option<DateTime<Utc>>,
    ) -> Uuid {
        let mut call = Call::new(campaign_id, contact_id, phone_number);
        call.priority = priority;
        call.scheduled_callback = scheduled_callback;
        let call_id = call.id;

        self.calls
            .write()
            .insert(call_id, Arc::new(Mutex::new(call)));
        info!(
            "Call {} created for campaign {} (contact {:?})",
            call_id, campaign_id, contact_id
        );
        call_id
    }

    fn handle(&self, call_id: Uuid) -> Option<Arc<Mutex<Call>>> {
        self.calls.read().get(&call_id).cloned()
    }

    /// Validated state transition
    ///
    /// Returns false (no-op) on an unknown call, an illegal edge, or an
    /// attempt to enter `Completed` (which only `complete` may do). Entering
    /// `Failed`/`Abandoned` through here runs the terminal path.
    pub async fn transition(
        &self,
        call_id: Uuid,
        new_state: CallState,
        ctx: TransitionContext,
    ) -> bool {
        if new_state == CallState::Completed {
            warn!(
                "Call {} transition to completed refused; use complete()",
                call_id
            );
            return false;
        }

        let handle = match self.handle(call_id) {
            Some(h) => h,
            None => {
                warn!("Transition requested for unknown call {}", call_id);
                return false;
            }
        };

        let terminal_snapshot = {
            let mut call = handle.lock();
            if !call.state.can_transition_to(new_state) {
                warn!(
                    "Call {} illegal transition {} -> {}, ignored",
                    call_id, call.state, new_state
                );
                return false;
            }

            let old_state = call.state;
            call.state = new_state;

            if let Some(ownership) = ctx.ownership {
                call.ownership = ownership;
                call.owner_id = ctx.owner_id;
            }
            if let Some(sip_call_id) = ctx.sip_call_id {
                call.sip_call_id = Some(sip_call_id);
            }
            if new_state == CallState::Answered {
                call.answer_time = Some(Utc::now());
                if let Some(leg) = call
                    .legs
                    .iter_mut()
                    .find(|l| l.kind == LegKind::Customer)
                {
                    leg.answer_time = Some(Utc::now());
                }
                // AMD attaches opportunistically on answer
                if ctx.amd_result.is_some() {
                    call.amd_result = ctx.amd_result;
                }
            }
            if new_state == CallState::Ringing {
                if let Some(leg) = call
                    .legs
                    .iter_mut()
                    .find(|l| l.kind == LegKind::Customer)
                {
                    leg.ring_time = Some(Utc::now());
                }
            }
            if let Some(reason) = ctx.reason {
                call.notes = Some(reason);
            }

            debug!("Call {} transitioned {} -> {}", call_id, old_state, new_state);

            if new_state.is_terminal() {
                let outcome = match new_state {
                    CallState::Abandoned => DialOutcome::Abandoned,
                    _ => DialOutcome::Failed,
                };
                Some(self.finish_locked(&mut call, outcome))
            } else {
                None
            }
        };

        if let Some(snapshot) = terminal_snapshot {
            self.after_terminal(snapshot).await;
        }
        true
    }

    /// Assign the call to an agent
    ///
    /// An ownership transfer modeled as an event: legal in any pre-terminal
    /// state, fails (does not overwrite anything) once the call is terminal.
    pub fn assign(&self, call_id: Uuid, agent_id: i64) -> bool {
        let handle = match self.handle(call_id) {
            Some(h) => h,
            None => return false,
        };

        let mut call = handle.lock();
        if call.is_terminal() {
            warn!(
                "Call {} assign to agent {} refused: call is {}",
                call_id, agent_id, call.state
            );
            return false;
        }

        call.ownership = Ownership::Agent;
        call.owner_id = Some(agent_id);
        if !call.legs.iter().any(|l| l.kind == LegKind::Agent) {
            let mut leg = CallLeg::new(LegKind::Agent);
            leg.answer_time = Some(Utc::now());
            call.legs.push(leg);
        }
        info!("Call {} assigned to agent {}", call_id, agent_id);
        true
    }

    /// Complete a call with its outcome and disposition
    ///
    /// The only path into `Completed`. Requires a non-terminal state; the
    /// second completion of the same call returns false and changes nothing.
    pub async fn complete(
        &self,
        call_id: Uuid,
        outcome: DialOutcome,
        disposition_id: Option<i64>,
        sub_disposition: Option<String>,
        notes: Option<String>,
    ) -> bool {
        let handle = match self.handle(call_id) {
            Some(h) => h,
            None => {
                warn!("Complete requested for unknown call {}", call_id);
                return false;
            }
        };

        let snapshot = {
            let mut call = handle.lock();
            if call.is_terminal() {
                warn!(
                    "Call {} complete refused: already terminal ({})",
                    call_id, call.state
                );
                return false;
            }

            call.state = CallState::Completed;
            call.disposition_id = disposition_id;
            call.sub_disposition = sub_disposition;
            if notes.is_some() {
                call.notes = notes;
            }
            self.finish_locked(&mut call, outcome)
        };

        info!("Call {} completed with outcome {}", call_id, outcome);
        self.after_terminal(snapshot).await;
        true
    }

    /// Force-terminate a call with a reason
    ///
    /// For system-level failures (no SIP response, provider error) as
    /// distinct from customer-driven outcomes. Still releases the contact
    /// lock and updates pacing metrics - a failed dial must not strand a
    /// contact or agent capacity.
    pub async fn fail(&self, call_id: Uuid, reason: &str) -> bool {
        self.fail_with_state(call_id, reason, CallState::Failed).await
    }

    /// Force-terminate into a specific terminal state (`Failed` or `Abandoned`)
    pub async fn fail_with_state(
        &self,
        call_id: Uuid,
        reason: &str,
        final_state: CallState,
    ) -> bool {
        if !final_state.is_terminal() || final_state == CallState::Completed {
            return false;
        }

        let handle = match self.handle(call_id) {
            Some(h) => h,
            None => {
                warn!("Fail requested for unknown call {}", call_id);
                return false;
            }
        };

        let snapshot = {
            let mut call = handle.lock();
            if call.is_terminal() {
                return false;
            }

            call.state = final_state;
            call.notes = Some(reason.to_string());
            let outcome = match final_state {
                CallState::Abandoned => DialOutcome::Abandoned,
                _ => DialOutcome::Failed,
            };
            self.finish_locked(&mut call, outcome)
        };

        warn!("Call {} failed: {}", call_id, reason);
        self.after_terminal(snapshot).await;
        true
    }

    /// Stamp terminal bookkeeping while the call mutex is held and return a
    /// snapshot for the post-guard side effects.
    fn finish_locked(&self, call: &mut Call, outcome: DialOutcome) -> Call {
        let now = Utc::now();
        call.end_time = Some(now);
        call.duration_secs = call.compute_duration();
        call.outcome = Some(outcome);
        for leg in call.legs.iter_mut() {
            if leg.end_time.is_none() {
                leg.end_time = Some(now);
            }
        }
        call.clone()
    }

    /// Side effects of a terminal call, run after the call mutex is dropped
    async fn after_terminal(&self, call: Call) {
        if let Some(contact_id) = call.contact_id {
            let outcome = call.outcome.unwrap_or(DialOutcome::Failed);
            self.pool.release(contact_id, outcome);
        }

        let connected = call.answer_time.is_some();
        let abandoned = call.state == CallState::Abandoned;
        self.pacing
            .record_call_result(call.campaign_id, connected, abandoned);

        if let Err(e) = self.sink.record_call(&call).await {
            // A failed write must not poison the control loop
            error!("Record sink failed for call {}: {}", call.id, e);
        }
    }

    /// Attach the provider-side call id once placement returns it
    pub fn set_provider_call_id(&self, call_id: Uuid, provider_call_id: &str) -> bool {
        let handle = match self.handle(call_id) {
            Some(h) => h,
            None => return false,
        };
        let mut call = handle.lock();
        if call.is_terminal() {
            return false;
        }
        call.sip_call_id = Some(provider_call_id.to_string());
        true
    }

    // ==================== Query surface ====================

    /// Current state of a call
    pub fn call_state(&self, call_id: Uuid) -> Option<CallState> {
        self.handle(call_id).map(|h| h.lock().state)
    }

    /// Snapshot of a call
    pub fn get_call(&self, call_id: Uuid) -> Option<Call> {
        self.handle(call_id).map(|h| h.lock().clone())
    }

    /// All non-terminal calls
    pub fn active_calls(&self) -> Vec<Call> {
        self.calls
            .read()
            .values()
            .map(|h| h.lock().clone())
            .filter(|c| !c.is_terminal())
            .collect()
    }

    /// All calls in a given state
    pub fn calls_by_state(&self, state: CallState) -> Vec<Call> {
        self.calls
            .read()
            .values()
            .map(|h| h.lock().clone())
            .filter(|c| c.state == state)
            .collect()
    }

    /// Calls by ownership class, optionally narrowed to one owner
    pub fn calls_by_owner(&self, ownership: Ownership, owner_id: Option<i64>) -> Vec<Call> {
        self.calls
            .read()
            .values()
            .map(|h| h.lock().clone())
            .filter(|c| {
                c.ownership == ownership && (owner_id.is_none() || c.owner_id == owner_id)
            })
            .collect()
    }

    /// Aggregate statistics over the call table
    pub fn statistics(&self) -> CallStatistics {
        let calls = self.calls.read();
        let mut stats = CallStatistics::default();
        let mut duration_sum = 0i64;
        let mut duration_count = 0usize;

        for handle in calls.values() {
            let call = handle.lock();
            stats.total += 1;
            *stats.by_state.entry(call.state.to_string()).or_insert(0) += 1;
            match call.state {
                CallState::Completed => stats.completed += 1,
                CallState::Failed => stats.failed += 1,
                CallState::Abandoned => stats.abandoned += 1,
                _ => stats.active += 1,
            }
            if call.is_terminal() {
                if let Some(d) = call.duration_secs {
                    duration_sum += d;
                    duration_count += 1;
                }
            }
        }

        if duration_count > 0 {
            stats.average_duration_secs = duration_sum as f64 / duration_count as f64;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prodial_core::config::{PacingConfig, RetryConfig};
    use prodial_core::models::{Contact, ContactStatus, PredictiveDialerConfig};
    use prodial_core::traits::NullRecordSink;

    fn lifecycle() -> (CallLifecycle, Arc<ContactPool>, Arc<PacingController>) {
        let pool = Arc::new(ContactPool::new(RetryConfig::default()));
        pool.attach_list(1, 10);
        pool.load_contacts(vec![Contact::new(42, 10, "15550001111", 3)]);

        let pacing = Arc::new(PacingController::new(PacingConfig::default()));
        pacing
            .register(PredictiveDialerConfig::autodial(1, 20))
            .unwrap();

        let lc = CallLifecycle::new(
            Arc::clone(&pool),
            Arc::clone(&pacing),
            Arc::new(NullRecordSink),
        );
        (lc, pool, pacing)
    }

    #[tokio::test]
    async fn test_happy_path_to_completion() {
        let (lc, pool, _) = lifecycle();
        assert!(pool.lock(42, "autodial:1"));
        let id = lc.create(1, Some(42), "15550001111", 0, None);

        assert!(lc.transition(id, CallState::Ringing, TransitionContext::default()).await);
        assert!(
            lc.transition(
                id,
                CallState::Answered,
                TransitionContext {
                    amd_result: Some(AmdResult::Human),
                    ..Default::default()
                }
            )
            .await
        );
        assert!(lc.transition(id, CallState::Connected, TransitionContext::default()).await);
        assert!(lc.complete(id, DialOutcome::Answered, Some(5), None, None).await);

        let call = lc.get_call(id).unwrap();
        assert_eq!(call.state, CallState::Completed);
        assert_eq!(call.amd_result, Some(AmdResult::Human));
        assert_eq!(call.disposition_id, Some(5));
        assert!(call.end_time.is_some());

        // Contact released and attempt recorded
        let contact = pool.get(42).unwrap();
        assert!(!contact.locked);
        assert_eq!(contact.attempt_count, 1);
        assert_eq!(contact.status, ContactStatus::Answered);
    }

    #[tokio::test]
    async fn test_double_complete_is_noop() {
        let (lc, pool, _) = lifecycle();
        pool.lock(42, "agent:1");
        let id = lc.create(1, Some(42), "15550001111", 0, None);
        lc.transition(id, CallState::Ringing, TransitionContext::default()).await;
        lc.transition(id, CallState::Answered, TransitionContext::default()).await;
        lc.transition(id, CallState::Connected, TransitionContext::default()).await;

        assert!(lc.complete(id, DialOutcome::Answered, None, None, None).await);
        let first = lc.get_call(id).unwrap();

        // Second completion refused, first outcome untouched
        assert!(!lc.complete(id, DialOutcome::NoAnswer, None, None, None).await);
        let second = lc.get_call(id).unwrap();
        assert_eq!(second.outcome, first.outcome);
        assert_eq!(second.end_time, first.end_time);

        // Contact attempt counted exactly once
        assert_eq!(pool.get(42).unwrap().attempt_count, 1);
    }

    #[tokio::test]
    async fn test_illegal_transition_leaves_state() {
        let (lc, _, _) = lifecycle();
        let id = lc.create(1, None, "15550001111", 0, None);

        // Initiated cannot jump straight to Connected
        assert!(!lc.transition(id, CallState::Connected, TransitionContext::default()).await);
        assert_eq!(lc.call_state(id), Some(CallState::Initiated));
    }

    #[tokio::test]
    async fn test_terminal_state_cannot_be_left() {
        let (lc, _, _) = lifecycle();
        let id = lc.create(1, None, "15550001111", 0, None);
        assert!(lc.fail(id, "no SIP response").await);

        assert!(!lc.transition(id, CallState::Ringing, TransitionContext::default()).await);
        assert!(!lc.fail(id, "again").await);
        assert_eq!(lc.call_state(id), Some(CallState::Failed));
    }

    #[tokio::test]
    async fn test_transition_refuses_completed_target() {
        let (lc, _, _) = lifecycle();
        let id = lc.create(1, None, "15550001111", 0, None);
        lc.transition(id, CallState::Ringing, TransitionContext::default()).await;
        lc.transition(id, CallState::Answered, TransitionContext::default()).await;
        lc.transition(id, CallState::Connected, TransitionContext::default()).await;

        assert!(!lc.transition(id, CallState::Completed, TransitionContext::default()).await);
        assert_eq!(lc.call_state(id), Some(CallState::Connected));
    }

    #[tokio::test]
    async fn test_assign_and_refuse_after_terminal() {
        let (lc, _, _) = lifecycle();
        let id = lc.create(1, None, "15550001111", 0, None);

        assert!(lc.assign(id, 7));
        let call = lc.get_call(id).unwrap();
        assert_eq!(call.ownership, Ownership::Agent);
        assert_eq!(call.owner_id, Some(7));
        assert_eq!(call.legs.len(), 2);

        lc.fail(id, "provider error").await;
        assert!(!lc.assign(id, 8));
        assert_eq!(lc.get_call(id).unwrap().owner_id, Some(7));
    }

    #[tokio::test]
    async fn test_fail_releases_contact() {
        let (lc, pool, _) = lifecycle();
        pool.lock(42, "autodial:1");
        let id = lc.create(1, Some(42), "15550001111", 0, None);

        assert!(lc.fail(id, "placement timeout").await);

        let contact = pool.get(42).unwrap();
        assert!(!contact.locked);
        assert_eq!(contact.status, ContactStatus::RetryEligible);
    }

    #[tokio::test]
    async fn test_abandoned_feeds_abandon_path() {
        let (lc, pool, _) = lifecycle();
        pool.lock(42, "autodial:1");
        let id = lc.create(1, Some(42), "15550001111", 0, None);
        lc.transition(id, CallState::Ringing, TransitionContext::default()).await;
        lc.transition(id, CallState::Answered, TransitionContext::default()).await;

        assert!(lc.transition(id, CallState::Abandoned, TransitionContext::default()).await);

        let call = lc.get_call(id).unwrap();
        assert_eq!(call.outcome, Some(DialOutcome::Abandoned));
        assert_eq!(pool.get(42).unwrap().status, ContactStatus::RetryEligible);
    }

    #[tokio::test]
    async fn test_queries_and_statistics() {
        let (lc, _, _) = lifecycle();
        let a = lc.create(1, None, "15550000001", 0, None);
        let b = lc.create(1, None, "15550000002", 0, None);
        let c = lc.create(1, None, "15550000003", 0, None);

        lc.transition(a, CallState::Ringing, TransitionContext::default()).await;
        lc.assign(b, 7);
        lc.fail(c, "dead line").await;

        assert_eq!(lc.active_calls().len(), 2);
        assert_eq!(lc.calls_by_state(CallState::Ringing).len(), 1);
        assert_eq!(lc.calls_by_owner(Ownership::Agent, Some(7)).len(), 1);
        assert_eq!(lc.calls_by_owner(Ownership::Agent, Some(99)).len(), 0);

        let stats = lc.statistics();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.by_state.get("ringing"), Some(&1));
    }

    #[tokio::test]
    async fn test_unknown_call_is_noop() {
        let (lc, _, _) = lifecycle();
        let ghost = Uuid::new_v4();
        assert!(!lc.transition(ghost, CallState::Ringing, TransitionContext::default()).await);
        assert!(!lc.complete(ghost, DialOutcome::Answered, None, None, None).await);
        assert!(!lc.fail(ghost, "nope").await);
        assert!(!lc.assign(ghost, 1));
    }
}
