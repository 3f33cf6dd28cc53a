//! Prodial Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the prodial dial-pacing engine. It includes:
//!
//! - Domain models (Contact, Call, DialQueueEntry, pacing config/metrics)
//! - Collaborator traits for call placement and call record persistence
//! - Unified error handling with stable error codes
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::DialerConfig;
pub use error::DialerError;

/// Result type alias using DialerError
pub type DialerResult<T> = Result<T, DialerError>;
