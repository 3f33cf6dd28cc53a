//! Dial-pacing and call-lifecycle services for prodial
//!
//! This crate contains the four core services of the engine:
//!
//! - `ContactPool` - contact records, eligibility selection, advisory locking
//! - `PacingController` - dial-rate computation with abandon-rate protection
//! - `DialQueueOrchestrator` - the autodial control loop and manual next-contact
//! - `CallLifecycle` - the guarded call state machine with ownership transfers
//!
//! # Architecture
//!
//! Services are designed to be composable and testable:
//! - Each service owns its dependencies and is wrapped in Arc for sharing
//! - Shared tables are mutated only through each service's narrow methods
//! - Contention is a boolean "did not proceed", never an error
//! - All operations are instrumented with tracing

pub mod contact_pool;
pub mod lifecycle;
pub mod orchestrator;
pub mod pacing;

pub use contact_pool::{ContactPool, PoolStats};
pub use lifecycle::{CallLifecycle, CallStatistics, TransitionContext};
pub use orchestrator::{DialQueueOrchestrator, QueueStats};
pub use pacing::{PacingController, PacingStatus};

/// Engine constants
pub mod constants {
    /// Minimum tick interval accepted for the autodial loop, in seconds
    pub const MIN_TICK_INTERVAL_SECS: u64 = 1;

    /// Hard cap on contacts pulled in a single selection
    pub const MAX_SELECT_BATCH: usize = 500;

    /// Owner token prefix used by the autodial loop when locking contacts
    pub const AUTODIAL_OWNER_PREFIX: &str = "autodial";

    /// Owner token prefix used for manual (agent-pulled) locks
    pub const AGENT_OWNER_PREFIX: &str = "agent";
}
