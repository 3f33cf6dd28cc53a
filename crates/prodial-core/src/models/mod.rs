//! Domain models for the prodial engine
//!
//! This module contains all the core domain models used throughout the engine.

pub mod call;
pub mod contact;
pub mod pacing;
pub mod queue;

pub use call::{AmdResult, Call, CallDirection, CallLeg, CallState, LegKind, Ownership};
pub use contact::{Contact, ContactStatus, DialOutcome};
pub use pacing::{DialMethod, DialerMetrics, PredictiveDialerConfig};
pub use queue::{DialQueueEntry, QueueEntryStatus};
