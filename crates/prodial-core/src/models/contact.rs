//! Contact model and dial eligibility
//!
//! A contact is a single dial target belonging to a campaign list. The pool
//! guards each contact with an advisory lock; the outcome of every attempt
//! drives the status/backoff table implemented on the model itself.

use crate::config::RetryConfig;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Contact dialing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    /// Never dialed
    #[default]
    NotAttempted,
    /// Last attempt reached a live person
    Answered,
    /// Last attempt rang out
    NoAnswer,
    /// Last attempt hit a busy signal
    Busy,
    /// Last attempt reached voicemail (no auto-retry)
    Voicemail,
    /// Waiting out a retry backoff
    RetryEligible,
    /// Attempt budget exhausted (terminal)
    MaxAttempts,
    /// On the do-not-call list (terminal)
    DoNotCall,
    /// Number is unreachable or malformed (terminal)
    Invalid,
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContactStatus::NotAttempted => write!(f, "not_attempted"),
            ContactStatus::Answered => write!(f, "answered"),
            ContactStatus::NoAnswer => write!(f, "no_answer"),
            ContactStatus::Busy => write!(f, "busy"),
            ContactStatus::Voicemail => write!(f, "voicemail"),
            ContactStatus::RetryEligible => write!(f, "retry_eligible"),
            ContactStatus::MaxAttempts => write!(f, "max_attempts"),
            ContactStatus::DoNotCall => write!(f, "do_not_call"),
            ContactStatus::Invalid => write!(f, "invalid"),
        }
    }
}

impl ContactStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "not_attempted" => Some(ContactStatus::NotAttempted),
            "answered" => Some(ContactStatus::Answered),
            "no_answer" => Some(ContactStatus::NoAnswer),
            "busy" => Some(ContactStatus::Busy),
            "voicemail" => Some(ContactStatus::Voicemail),
            "retry_eligible" => Some(ContactStatus::RetryEligible),
            "max_attempts" => Some(ContactStatus::MaxAttempts),
            "do_not_call" => Some(ContactStatus::DoNotCall),
            "invalid" => Some(ContactStatus::Invalid),
            _ => None,
        }
    }

    /// Check if the status permanently excludes the contact from selection
    pub fn is_excluded(&self) -> bool {
        matches!(
            self,
            ContactStatus::MaxAttempts | ContactStatus::DoNotCall | ContactStatus::Invalid
        )
    }

    /// Check if the status is a selectable tier (fresh or retryable)
    pub fn is_selectable(&self) -> bool {
        matches!(
            self,
            ContactStatus::NotAttempted | ContactStatus::RetryEligible
        )
    }
}

/// Outcome of a single dial attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialOutcome {
    Answered,
    NoAnswer,
    Busy,
    Voicemail,
    Failed,
    Abandoned,
    DoNotCall,
    InvalidNumber,
}

impl fmt::Display for DialOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialOutcome::Answered => write!(f, "answered"),
            DialOutcome::NoAnswer => write!(f, "no_answer"),
            DialOutcome::Busy => write!(f, "busy"),
            DialOutcome::Voicemail => write!(f, "voicemail"),
            DialOutcome::Failed => write!(f, "failed"),
            DialOutcome::Abandoned => write!(f, "abandoned"),
            DialOutcome::DoNotCall => write!(f, "do_not_call"),
            DialOutcome::InvalidNumber => write!(f, "invalid_number"),
        }
    }
}

impl DialOutcome {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "answered" => Some(DialOutcome::Answered),
            "no_answer" => Some(DialOutcome::NoAnswer),
            "busy" => Some(DialOutcome::Busy),
            "voicemail" => Some(DialOutcome::Voicemail),
            "failed" => Some(DialOutcome::Failed),
            "abandoned" => Some(DialOutcome::Abandoned),
            "do_not_call" => Some(DialOutcome::DoNotCall),
            "invalid_number" => Some(DialOutcome::InvalidNumber),
            _ => None,
        }
    }

    /// True when the customer actually connected to something
    pub fn is_connect(&self) -> bool {
        matches!(
            self,
            DialOutcome::Answered | DialOutcome::Voicemail | DialOutcome::Abandoned
        )
    }

    /// Retry backoff for this outcome, if the outcome is retryable at all
    pub fn retry_backoff(&self, retry: &RetryConfig) -> Option<Duration> {
        match self {
            DialOutcome::NoAnswer => Some(Duration::seconds(retry.no_answer_backoff_secs)),
            DialOutcome::Busy => Some(Duration::seconds(retry.busy_backoff_secs)),
            DialOutcome::Failed => Some(Duration::seconds(retry.failed_backoff_secs)),
            DialOutcome::Abandoned => Some(Duration::seconds(retry.abandoned_backoff_secs)),
            _ => None,
        }
    }
}

/// Contact entity
///
/// Lifecycle of the lock: taken once per dial attempt via the pool's
/// compare-and-set, held for the duration of the attempt, and released
/// unconditionally with an outcome (success, failure, or TTL reclaim).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    /// Unique identifier
    pub id: i64,

    /// Owning list
    pub list_id: i64,

    /// Destination number (E.164)
    pub phone_number: String,

    /// Current dialing status
    pub status: ContactStatus,

    /// Number of attempts made so far (monotonically increasing)
    pub attempt_count: u32,

    /// Attempt budget
    pub max_attempts: u32,

    /// Advisory lock flag
    pub locked: bool,

    /// Owner token of the current lock holder
    pub locked_by: Option<String>,

    /// When the current lock was taken
    pub locked_at: Option<DateTime<Utc>>,

    /// When the last attempt finished
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Earliest time the contact may be redialed
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl Contact {
    /// Create a fresh, never-dialed contact
    pub fn new(id: i64, list_id: i64, phone_number: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            id,
            list_id,
            phone_number: phone_number.into(),
            status: ContactStatus::NotAttempted,
            attempt_count: 0,
            max_attempts,
            locked: false,
            locked_by: None,
            locked_at: None,
            last_attempt_at: None,
            next_retry_at: None,
        }
    }

    /// Check if the contact may be selected for dialing at `now`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        if self.locked || !self.status.is_selectable() {
            return false;
        }
        if self.attempt_count >= self.max_attempts {
            return false;
        }
        match self.next_retry_at {
            Some(retry_at) => retry_at <= now,
            None => true,
        }
    }

    /// Check if the lock is older than `ttl` and should be reclaimed
    pub fn lock_is_stale(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match (self.locked, self.locked_at) {
            (true, Some(at)) => now - at > ttl,
            // A lock without a timestamp cannot be aged out normally;
            // treat it as stale so it cannot leak forever.
            (true, None) => true,
            _ => false,
        }
    }

    /// Record a finished attempt: increment the counter and derive the new
    /// status and retry schedule from the outcome table.
    ///
    /// Does not touch the lock; the pool clears it separately so the unlock
    /// is unconditional even if outcome bookkeeping changes.
    pub fn apply_outcome(&mut self, outcome: DialOutcome, retry: &RetryConfig, now: DateTime<Utc>) {
        self.attempt_count += 1;
        self.last_attempt_at = Some(now);
        self.next_retry_at = None;

        self.status = match outcome {
            DialOutcome::Answered => ContactStatus::Answered,
            DialOutcome::Voicemail => ContactStatus::Voicemail,
            DialOutcome::DoNotCall => ContactStatus::DoNotCall,
            DialOutcome::InvalidNumber => ContactStatus::Invalid,
            DialOutcome::NoAnswer
            | DialOutcome::Busy
            | DialOutcome::Failed
            | DialOutcome::Abandoned => {
                if self.attempt_count >= self.max_attempts {
                    ContactStatus::MaxAttempts
                } else {
                    // retry_backoff is always Some for these outcomes
                    if let Some(backoff) = outcome.retry_backoff(retry) {
                        self.next_retry_at = Some(now + backoff);
                    }
                    ContactStatus::RetryEligible
                }
            }
        };
    }
}
