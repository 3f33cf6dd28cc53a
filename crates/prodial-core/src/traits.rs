//! Collaborator traits
//!
//! Seams for the external services the engine calls out to: the telephony
//! provider that actually places calls, and the durable store that receives
//! terminal call records. Both are injected so the engine can be exercised
//! with mocks.

use crate::error::DialerError;
use crate::models::Call;
use async_trait::async_trait;

/// Request to place a single outbound call
#[derive(Debug, Clone)]
pub struct PlacementRequest {
    /// Engine-side call id the provider should echo back in callbacks
    pub call_id: uuid::Uuid,

    /// Destination number
    pub phone_number: String,

    /// Caller ID to present
    pub caller_id: String,

    /// Owning campaign
    pub campaign_id: i64,
}

/// Call placement service
///
/// Abstracts the actual telephony/SIP mechanics. A successful placement
/// returns the provider-side call identifier; errors surface as
/// `DialerError::Placement` and must not strand the contact (the caller
/// fails the call, which releases the lock).
#[async_trait]
pub trait CallPlacementService: Send + Sync {
    /// Place a call, returning the provider call id
    async fn place_call(&self, request: &PlacementRequest) -> Result<String, DialerError>;
}

/// Sink for terminal call records
///
/// The persistence collaborator. Failures are logged by the caller and never
/// propagated into the control loop.
#[async_trait]
pub trait CallRecordSink: Send + Sync {
    /// Persist a call that has reached a terminal state
    async fn record_call(&self, call: &Call) -> Result<(), DialerError>;
}

/// Record sink that drops everything, for wiring and tests
#[derive(Debug, Default)]
pub struct NullRecordSink;

#[async_trait]
impl CallRecordSink for NullRecordSink {
    async fn record_call(&self, _call: &Call) -> Result<(), DialerError> {
        Ok(())
    }
}
