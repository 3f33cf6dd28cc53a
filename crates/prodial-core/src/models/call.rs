//! Call model and the legal transition table
//!
//! A call is a telephony session created once a dial is placed. It moves
//! through a strict forward progression of states; the surrounding system
//! (billing, reporting, agent UI) assumes monotonic progress and exactly-once
//! terminal completion, so the legal edges are an exhaustively matched table
//! on `CallState` rather than a runtime string comparison.

use crate::models::contact::DialOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Call lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Initiated,
    Ringing,
    Answered,
    Connected,
    OnHold,
    Transferring,
    Voicemail,
    Completed,
    Failed,
    Abandoned,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Initiated => write!(f, "initiated"),
            CallState::Ringing => write!(f, "ringing"),
            CallState::Answered => write!(f, "answered"),
            CallState::Connected => write!(f, "connected"),
            CallState::OnHold => write!(f, "on_hold"),
            CallState::Transferring => write!(f, "transferring"),
            CallState::Voicemail => write!(f, "voicemail"),
            CallState::Completed => write!(f, "completed"),
            CallState::Failed => write!(f, "failed"),
            CallState::Abandoned => write!(f, "abandoned"),
        }
    }
}

impl CallState {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "initiated" => Some(CallState::Initiated),
            "ringing" => Some(CallState::Ringing),
            "answered" => Some(CallState::Answered),
            "connected" => Some(CallState::Connected),
            "on_hold" => Some(CallState::OnHold),
            "transferring" => Some(CallState::Transferring),
            "voicemail" => Some(CallState::Voicemail),
            "completed" => Some(CallState::Completed),
            "failed" => Some(CallState::Failed),
            "abandoned" => Some(CallState::Abandoned),
            _ => None,
        }
    }

    /// Check if the state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Completed | CallState::Failed | CallState::Abandoned
        )
    }

    /// The legal transition table
    ///
    /// Every non-terminal state may also fail; terminal states have no edges.
    pub fn can_transition_to(&self, next: CallState) -> bool {
        match self {
            CallState::Initiated => matches!(next, CallState::Ringing | CallState::Failed),
            CallState::Ringing => matches!(
                next,
                CallState::Answered | CallState::Failed | CallState::Abandoned
            ),
            CallState::Answered => matches!(
                next,
                CallState::Connected
                    | CallState::Voicemail
                    | CallState::Abandoned
                    | CallState::Failed
            ),
            CallState::Connected => matches!(
                next,
                CallState::OnHold
                    | CallState::Transferring
                    | CallState::Completed
                    | CallState::Failed
            ),
            CallState::OnHold => matches!(
                next,
                CallState::Connected | CallState::Completed | CallState::Failed
            ),
            CallState::Transferring => matches!(
                next,
                CallState::Connected | CallState::Completed | CallState::Failed
            ),
            CallState::Voicemail => matches!(next, CallState::Completed | CallState::Failed),
            CallState::Completed | CallState::Failed | CallState::Abandoned => false,
        }
    }
}

/// Who currently owns the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    /// The dialer placed the call and no one has claimed it yet
    #[default]
    System,
    /// A specific agent is handling the call
    Agent,
    /// The call is parked in an IVR flow
    Ivr,
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ownership::System => write!(f, "system"),
            Ownership::Agent => write!(f, "agent"),
            Ownership::Ivr => write!(f, "ivr"),
        }
    }
}

/// Answering-machine detection result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmdResult {
    Human,
    Machine,
    Unknown,
}

impl AmdResult {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "human" => Some(AmdResult::Human),
            "machine" => Some(AmdResult::Machine),
            "unknown" => Some(AmdResult::Unknown),
            _ => None,
        }
    }
}

/// Call direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    #[default]
    Outbound,
    Inbound,
}

/// Which party a call leg belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegKind {
    Customer,
    Agent,
}

/// A single leg of a call with independent ring/answer/end timestamps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLeg {
    pub kind: LegKind,
    pub ring_time: Option<DateTime<Utc>>,
    pub answer_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl CallLeg {
    pub fn new(kind: LegKind) -> Self {
        Self {
            kind,
            ring_time: None,
            answer_time: None,
            end_time: None,
        }
    }
}

/// Call entity
///
/// Created at dial placement, mutated only through validated state
/// transitions, immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    /// Unique identifier
    pub id: Uuid,

    /// Owning campaign
    pub campaign_id: i64,

    /// Dialed contact, when the call came from the pool
    pub contact_id: Option<i64>,

    /// Destination number
    pub phone_number: String,

    /// Direction of the call
    pub direction: CallDirection,

    /// Current lifecycle state
    pub state: CallState,

    /// Current ownership class
    pub ownership: Ownership,

    /// Owning agent id when `ownership == Agent`
    pub owner_id: Option<i64>,

    /// Dial priority
    pub priority: i32,

    /// Scheduled callback time, if this is a callback dial
    pub scheduled_callback: Option<DateTime<Utc>>,

    /// Provider-side call identifier
    pub sip_call_id: Option<String>,

    /// Answering-machine detection result, attached on answer
    pub amd_result: Option<AmdResult>,

    /// When the dial was placed
    pub start_time: DateTime<Utc>,

    /// When the call was answered
    pub answer_time: Option<DateTime<Utc>>,

    /// When the call reached a terminal state
    pub end_time: Option<DateTime<Utc>>,

    /// Total duration in seconds, set on termination
    pub duration_secs: Option<i64>,

    /// Terminal outcome
    pub outcome: Option<DialOutcome>,

    /// Agent-recorded disposition
    pub disposition_id: Option<i64>,

    /// Free-form sub-disposition
    pub sub_disposition: Option<String>,

    /// Terminal reason (system failures) or agent notes
    pub notes: Option<String>,

    /// Call legs (customer leg, agent leg)
    pub legs: Vec<CallLeg>,
}

impl Call {
    /// Create a new call in `Initiated`, owned by the system
    pub fn new(campaign_id: i64, contact_id: Option<i64>, phone_number: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            contact_id,
            phone_number: phone_number.into(),
            direction: CallDirection::Outbound,
            state: CallState::Initiated,
            ownership: Ownership::System,
            owner_id: None,
            priority: 0,
            scheduled_callback: None,
            sip_call_id: None,
            amd_result: None,
            start_time: Utc::now(),
            answer_time: None,
            end_time: None,
            duration_secs: None,
            outcome: None,
            disposition_id: None,
            sub_disposition: None,
            notes: None,
            legs: vec![CallLeg::new(LegKind::Customer)],
        }
    }

    /// Check if the call has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Seconds between start and end, when both are known
    pub fn compute_duration(&self) -> Option<i64> {
        self.end_time.map(|end| (end - self.start_time).num_seconds())
    }
}
