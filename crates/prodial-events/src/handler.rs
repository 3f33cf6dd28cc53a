//! Provider event dispatch
//!
//! Translates provider callbacks into lifecycle transitions. Dispatch is
//! deliberately forgiving: an event for an unknown call, an illegal
//! transition (stale or replayed callback), or an unrecognized event name is
//! logged and dropped, never an error. The provider retries webhooks and the
//! lifecycle's transition table is what guarantees correctness.

use crate::event::ProviderEvent;
use prodial_core::models::{AmdResult, CallState, DialOutcome};
use prodial_engine::{CallLifecycle, TransitionContext};
use std::sync::Arc;
use tracing::{debug, warn};

/// Provider event names we handle
pub mod events {
    /// The customer leg started ringing
    pub const CALL_RINGING: &str = "CALL_RINGING";

    /// The customer answered (AMD result attached when available)
    pub const CALL_ANSWERED: &str = "CALL_ANSWERED";

    /// Customer and agent legs were bridged
    pub const CALL_BRIDGED: &str = "CALL_BRIDGED";

    /// The call ended (Hangup-Cause carries the reason)
    pub const CALL_HANGUP: &str = "CALL_HANGUP";

    /// Placement failed provider-side before any ringing
    pub const CALL_FAILED: &str = "CALL_FAILED";
}

/// Hangup causes, provider conventions
mod causes {
    pub const NORMAL_CLEARING: &str = "NORMAL_CLEARING";
    pub const NO_ANSWER: &str = "NO_ANSWER";
    pub const NO_USER_RESPONSE: &str = "NO_USER_RESPONSE";
    pub const ORIGINATOR_CANCEL: &str = "ORIGINATOR_CANCEL";
    pub const USER_BUSY: &str = "USER_BUSY";
    pub const CALL_REJECTED: &str = "CALL_REJECTED";
    pub const UNALLOCATED_NUMBER: &str = "UNALLOCATED_NUMBER";
}

/// Provider event handler
///
/// Owns nothing but a handle to the lifecycle; all state lives there.
pub struct ProviderEventHandler {
    lifecycle: Arc<CallLifecycle>,
}

impl ProviderEventHandler {
    pub fn new(lifecycle: Arc<CallLifecycle>) -> Self {
        Self { lifecycle }
    }

    /// Dispatch one provider event
    ///
    /// Returns true when the event changed a call's state.
    pub async fn handle(&self, event: &ProviderEvent) -> bool {
        let event_name = match event.event_name() {
            Some(name) => name,
            None => {
                warn!("Provider event without Event-Name, dropped: {}", event);
                return false;
            }
        };

        let call_id = match event.call_id() {
            Some(id) => id,
            None => {
                warn!("{} event without a valid Call-ID, dropped", event_name);
                return false;
            }
        };

        debug!("Dispatching {} for call {}", event_name, call_id);

        match event_name {
            events::CALL_RINGING => {
                self.lifecycle
                    .transition(
                        call_id,
                        CallState::Ringing,
                        TransitionContext {
                            sip_call_id: event.provider_call_id().map(String::from),
                            ..Default::default()
                        },
                    )
                    .await
            }
            events::CALL_ANSWERED => {
                let amd = event.amd_result().and_then(AmdResult::from_str);
                let answered = self
                    .lifecycle
                    .transition(
                        call_id,
                        CallState::Answered,
                        TransitionContext {
                            amd_result: amd,
                            ..Default::default()
                        },
                    )
                    .await;

                // A machine pickup goes straight to the voicemail branch
                if answered && amd == Some(AmdResult::Machine) {
                    self.lifecycle
                        .transition(call_id, CallState::Voicemail, TransitionContext::default())
                        .await;
                }
                answered
            }
            events::CALL_BRIDGED => {
                self.lifecycle
                    .transition(call_id, CallState::Connected, TransitionContext::default())
                    .await
            }
            events::CALL_HANGUP => self.handle_hangup(event, call_id).await,
            events::CALL_FAILED => {
                let reason = event
                    .hangup_cause()
                    .unwrap_or("provider placement failure");
                self.lifecycle.fail(call_id, reason).await
            }
            other => {
                debug!("Unhandled provider event {}, dropped", other);
                false
            }
        }
    }

    async fn handle_hangup(&self, event: &ProviderEvent, call_id: uuid::Uuid) -> bool {
        let call = match self.lifecycle.get_call(call_id) {
            Some(c) => c,
            None => {
                warn!("Hangup for unknown call {}, dropped", call_id);
                return false;
            }
        };
        let cause = event.hangup_cause().unwrap_or(causes::NORMAL_CLEARING);

        let outcome = match cause {
            causes::USER_BUSY => DialOutcome::Busy,
            causes::NO_ANSWER | causes::NO_USER_RESPONSE | causes::ORIGINATOR_CANCEL => {
                DialOutcome::NoAnswer
            }
            causes::CALL_REJECTED => DialOutcome::DoNotCall,
            causes::UNALLOCATED_NUMBER => DialOutcome::InvalidNumber,
            causes::NORMAL_CLEARING => {
                if call.state == CallState::Voicemail || call.amd_result == Some(AmdResult::Machine)
                {
                    DialOutcome::Voicemail
                } else if call.answer_time.is_some() {
                    DialOutcome::Answered
                } else {
                    DialOutcome::NoAnswer
                }
            }
            other => {
                // Unknown causes are system failures, keep the cause text
                return self.lifecycle.fail(call_id, other).await;
            }
        };

        self.lifecycle
            .complete(call_id, outcome, None, None, Some(cause.to_string()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prodial_core::config::{PacingConfig, RetryConfig};
    use prodial_core::models::{Contact, ContactStatus, PredictiveDialerConfig};
    use prodial_core::traits::NullRecordSink;
    use prodial_engine::{ContactPool, PacingController};
    use uuid::Uuid;

    fn handler() -> (ProviderEventHandler, Arc<CallLifecycle>, Arc<ContactPool>) {
        let pool = Arc::new(ContactPool::new(RetryConfig::default()));
        pool.attach_list(1, 10);
        pool.load_contacts(vec![Contact::new(42, 10, "15550001111", 3)]);

        let pacing = Arc::new(PacingController::new(PacingConfig::default()));
        pacing
            .register(PredictiveDialerConfig::autodial(1, 20))
            .unwrap();

        let lifecycle = Arc::new(CallLifecycle::new(
            Arc::clone(&pool),
            pacing,
            Arc::new(NullRecordSink),
        ));
        let handler = ProviderEventHandler::new(Arc::clone(&lifecycle));
        (handler, lifecycle, pool)
    }

    fn event(name: &str, call_id: Uuid, extra: &[(&str, &str)]) -> ProviderEvent {
        let mut event = ProviderEvent::new();
        event.set_header("Event-Name".to_string(), name.to_string());
        event.set_header("Call-ID".to_string(), call_id.to_string());
        for (k, v) in extra {
            event.set_header(k.to_string(), v.to_string());
        }
        event
    }

    #[tokio::test]
    async fn test_full_webhook_sequence() {
        let (handler, lifecycle, pool) = handler();
        pool.lock(42, "autodial:1");
        let id = lifecycle.create(1, Some(42), "15550001111", 0, None);

        assert!(
            handler
                .handle(&event(
                    events::CALL_RINGING,
                    id,
                    &[("Provider-Call-ID", "prov-77")]
                ))
                .await
        );
        assert!(
            handler
                .handle(&event(events::CALL_ANSWERED, id, &[("AMD-Result", "human")]))
                .await
        );
        assert!(handler.handle(&event(events::CALL_BRIDGED, id, &[])).await);
        assert!(
            handler
                .handle(&event(
                    events::CALL_HANGUP,
                    id,
                    &[("Hangup-Cause", "NORMAL_CLEARING")]
                ))
                .await
        );

        let call = lifecycle.get_call(id).unwrap();
        assert_eq!(call.state, CallState::Completed);
        assert_eq!(call.outcome, Some(DialOutcome::Answered));
        assert_eq!(call.sip_call_id.as_deref(), Some("prov-77"));
        assert_eq!(call.amd_result, Some(AmdResult::Human));
        assert_eq!(pool.get(42).unwrap().status, ContactStatus::Answered);
    }

    #[tokio::test]
    async fn test_machine_answer_routes_to_voicemail() {
        let (handler, lifecycle, pool) = handler();
        pool.lock(42, "autodial:1");
        let id = lifecycle.create(1, Some(42), "15550001111", 0, None);

        handler.handle(&event(events::CALL_RINGING, id, &[])).await;
        handler
            .handle(&event(events::CALL_ANSWERED, id, &[("AMD-Result", "machine")]))
            .await;
        assert_eq!(lifecycle.call_state(id), Some(CallState::Voicemail));

        handler
            .handle(&event(
                events::CALL_HANGUP,
                id,
                &[("Hangup-Cause", "NORMAL_CLEARING")],
            ))
            .await;

        let call = lifecycle.get_call(id).unwrap();
        assert_eq!(call.outcome, Some(DialOutcome::Voicemail));
        // Voicemail contacts leave the auto-retry rotation
        assert_eq!(pool.get(42).unwrap().status, ContactStatus::Voicemail);
    }

    #[tokio::test]
    async fn test_busy_hangup() {
        let (handler, lifecycle, pool) = handler();
        pool.lock(42, "autodial:1");
        let id = lifecycle.create(1, Some(42), "15550001111", 0, None);

        handler.handle(&event(events::CALL_RINGING, id, &[])).await;
        handler
            .handle(&event(events::CALL_HANGUP, id, &[("Hangup-Cause", "USER_BUSY")]))
            .await;

        assert_eq!(
            lifecycle.get_call(id).unwrap().outcome,
            Some(DialOutcome::Busy)
        );
        assert_eq!(pool.get(42).unwrap().status, ContactStatus::RetryEligible);
    }

    #[tokio::test]
    async fn test_hangup_before_answer_is_no_answer() {
        let (handler, lifecycle, _) = handler();
        let id = lifecycle.create(1, None, "15550001111", 0, None);

        handler.handle(&event(events::CALL_RINGING, id, &[])).await;
        handler
            .handle(&event(
                events::CALL_HANGUP,
                id,
                &[("Hangup-Cause", "NORMAL_CLEARING")],
            ))
            .await;

        assert_eq!(
            lifecycle.get_call(id).unwrap().outcome,
            Some(DialOutcome::NoAnswer)
        );
    }

    #[tokio::test]
    async fn test_unknown_cause_fails_call() {
        let (handler, lifecycle, _) = handler();
        let id = lifecycle.create(1, None, "15550001111", 0, None);

        handler.handle(&event(events::CALL_RINGING, id, &[])).await;
        handler
            .handle(&event(
                events::CALL_HANGUP,
                id,
                &[("Hangup-Cause", "RECOVERY_ON_TIMER_EXPIRE")],
            ))
            .await;

        let call = lifecycle.get_call(id).unwrap();
        assert_eq!(call.state, CallState::Failed);
        assert_eq!(call.notes.as_deref(), Some("RECOVERY_ON_TIMER_EXPIRE"));
    }

    #[tokio::test]
    async fn test_replayed_event_is_dropped() {
        let (handler, lifecycle, _) = handler();
        let id = lifecycle.create(1, None, "15550001111", 0, None);

        assert!(handler.handle(&event(events::CALL_RINGING, id, &[])).await);
        // The provider retries the same webhook
        assert!(!handler.handle(&event(events::CALL_RINGING, id, &[])).await);
        assert_eq!(lifecycle.call_state(id), Some(CallState::Ringing));
    }

    #[tokio::test]
    async fn test_unknown_call_and_event_dropped() {
        let (handler, _, _) = handler();

        assert!(
            !handler
                .handle(&event(events::CALL_RINGING, Uuid::new_v4(), &[]))
                .await
        );
        assert!(
            !handler
                .handle(&event("HEARTBEAT", Uuid::new_v4(), &[]))
                .await
        );

        let mut no_id = ProviderEvent::new();
        no_id.set_header("Event-Name".to_string(), events::CALL_HANGUP.to_string());
        assert!(!handler.handle(&no_id).await);
    }

    #[tokio::test]
    async fn test_provider_failure_event() {
        let (handler, lifecycle, pool) = handler();
        pool.lock(42, "autodial:1");
        let id = lifecycle.create(1, Some(42), "15550001111", 0, None);

        handler
            .handle(&event(events::CALL_FAILED, id, &[("Hangup-Cause", "NO_ROUTE")]))
            .await;

        assert_eq!(lifecycle.call_state(id), Some(CallState::Failed));
        assert!(!pool.get(42).unwrap().locked);
    }
}
