//! Dial queue entry model
//!
//! An ephemeral work item binding a contact to a campaign dial attempt.
//! Terminal entries always release the underlying contact lock.

use crate::models::contact::DialOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Queue entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryStatus {
    /// Waiting for a dial to be placed
    #[default]
    Queued,
    /// Dial placed, no connect yet
    Dialing,
    /// Customer connected
    Connected,
    /// Finished normally
    Completed,
    /// Dial failed
    Failed,
    /// Customer answered but no agent was available
    Abandoned,
}

impl fmt::Display for QueueEntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueEntryStatus::Queued => write!(f, "queued"),
            QueueEntryStatus::Dialing => write!(f, "dialing"),
            QueueEntryStatus::Connected => write!(f, "connected"),
            QueueEntryStatus::Completed => write!(f, "completed"),
            QueueEntryStatus::Failed => write!(f, "failed"),
            QueueEntryStatus::Abandoned => write!(f, "abandoned"),
        }
    }
}

impl QueueEntryStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Some(QueueEntryStatus::Queued),
            "dialing" => Some(QueueEntryStatus::Dialing),
            "connected" => Some(QueueEntryStatus::Connected),
            "completed" => Some(QueueEntryStatus::Completed),
            "failed" => Some(QueueEntryStatus::Failed),
            "abandoned" => Some(QueueEntryStatus::Abandoned),
            _ => None,
        }
    }

    /// Check if the entry has finished and must release its contact
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueEntryStatus::Completed | QueueEntryStatus::Failed | QueueEntryStatus::Abandoned
        )
    }
}

/// Dial queue entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialQueueEntry {
    /// Unique identifier
    pub id: Uuid,

    /// Owning campaign
    pub campaign_id: i64,

    /// Bound contact
    pub contact_id: i64,

    /// Current status
    pub status: QueueEntryStatus,

    /// Agent the entry is assigned to (manual modes)
    pub assigned_agent_id: Option<i64>,

    /// Dial priority (higher first)
    pub priority: i32,

    /// When the entry was created
    pub queued_at: DateTime<Utc>,

    /// When the dial was placed
    pub dialed_at: Option<DateTime<Utc>>,

    /// When the entry reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,

    /// Terminal outcome
    pub outcome: Option<DialOutcome>,

    /// Operator/agent notes
    pub notes: Option<String>,
}

impl DialQueueEntry {
    /// Create a new queued entry
    pub fn new(campaign_id: i64, contact_id: i64, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            contact_id,
            status: QueueEntryStatus::Queued,
            assigned_agent_id: None,
            priority,
            queued_at: Utc::now(),
            dialed_at: None,
            completed_at: None,
            outcome: None,
            notes: None,
        }
    }

    /// Check if the entry has finished
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(QueueEntryStatus::Completed.is_terminal());
        assert!(QueueEntryStatus::Failed.is_terminal());
        assert!(QueueEntryStatus::Abandoned.is_terminal());
        assert!(!QueueEntryStatus::Queued.is_terminal());
        assert!(!QueueEntryStatus::Dialing.is_terminal());
        assert!(!QueueEntryStatus::Connected.is_terminal());
    }

    #[test]
    fn test_new_entry() {
        let entry = DialQueueEntry::new(3, 99, 0);
        assert_eq!(entry.status, QueueEntryStatus::Queued);
        assert_eq!(entry.campaign_id, 3);
        assert_eq!(entry.contact_id, 99);
        assert!(entry.dialed_at.is_none());
    }

    #[test]
    fn test_status_roundtrip() {
        assert_eq!(QueueEntryStatus::from_str("dialing"), Some(QueueEntryStatus::Dialing));
        assert_eq!(QueueEntryStatus::Abandoned.to_string(), "abandoned");
    }
}
