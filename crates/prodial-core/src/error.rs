//! Unified error handling for the prodial engine
//!
//! All fallible operations in the engine return this error type. Contention
//! outcomes (contact already locked, call already terminal) are deliberately
//! NOT errors: they are boolean "did not proceed" results so the control loop
//! can skip and continue instead of aborting a batch.

use thiserror::Error;

/// Main engine error type
#[derive(Error, Debug)]
pub enum DialerError {
    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    // ==================== Lookup Errors ====================
    #[error("Campaign not found: {0}")]
    CampaignNotFound(i64),

    #[error("Contact not found: {0}")]
    ContactNotFound(i64),

    #[error("Call not found: {0}")]
    CallNotFound(String),

    #[error("Queue entry not found: {0}")]
    QueueEntryNotFound(String),

    // ==================== Campaign State Errors ====================
    #[error("Campaign not active: {0}")]
    CampaignInactive(i64),

    #[error("Campaign already running: {0}")]
    CampaignAlreadyRunning(i64),

    // ==================== Upstream Errors ====================
    #[error("Call placement failed: {0}")]
    Placement(String),

    #[error("Record sink error: {0}")]
    RecordSink(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DialerError {
    /// Returns the stable error code for operator-facing surfaces
    pub fn error_code(&self) -> &'static str {
        match self {
            DialerError::Validation(_) => "validation_error",
            DialerError::InvalidInput(_) => "invalid_input",
            DialerError::MissingField(_) => "missing_field",
            DialerError::CampaignNotFound(_) => "campaign_not_found",
            DialerError::ContactNotFound(_) => "contact_not_found",
            DialerError::CallNotFound(_) => "call_not_found",
            DialerError::QueueEntryNotFound(_) => "queue_entry_not_found",
            DialerError::CampaignInactive(_) => "campaign_inactive",
            DialerError::CampaignAlreadyRunning(_) => "campaign_already_running",
            DialerError::Placement(_) => "placement_error",
            DialerError::RecordSink(_) => "record_sink_error",
            DialerError::Internal(_) => "internal_error",
            DialerError::Config(_) => "config_error",
            DialerError::Serialization(_) => "serialization_error",
        }
    }

    /// True for errors the caller caused (bad request), false for system faults
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            DialerError::Validation(_)
                | DialerError::InvalidInput(_)
                | DialerError::MissingField(_)
                | DialerError::CampaignNotFound(_)
                | DialerError::ContactNotFound(_)
                | DialerError::CallNotFound(_)
                | DialerError::QueueEntryNotFound(_)
                | DialerError::CampaignInactive(_)
                | DialerError::CampaignAlreadyRunning(_)
        )
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for DialerError {
    fn from(err: serde_json::Error) -> Self {
        DialerError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for DialerError {
    fn from(err: std::io::Error) -> Self {
        DialerError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for DialerError {
    fn from(err: config::ConfigError) -> Self {
        DialerError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for DialerError {
    fn from(err: validator::ValidationErrors) -> Self {
        DialerError::Validation(err.to_string())
    }
}
