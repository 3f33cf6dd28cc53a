//! Telephony provider event integration for prodial
//!
//! This crate receives the provider's call-progress callbacks and feeds them
//! into the engine's call lifecycle.
//!
//! # Architecture
//!
//! ```text
//! Telephony Provider (webhooks)
//!         |
//!         v
//!   ProviderEvent (Parser)
//!         |
//!         v
//!  ProviderEventHandler (Dispatch)
//!         |
//!         v
//!  CallLifecycle (State Machine)
//! ```
//!
//! Events arrive as URL-encoded header blocks, one `Header: value` pair per
//! line. Every event carries a `Call-ID` header echoing the engine-side call
//! id passed at placement; events that cannot be correlated are dropped.

pub mod event;
pub mod handler;

pub use event::ProviderEvent;
pub use handler::ProviderEventHandler;
