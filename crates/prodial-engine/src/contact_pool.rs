//! Contact pool with eligibility selection and advisory locking
//!
//! The pool owns the in-memory contact table and is the sole mutual-exclusion
//! point preventing two simultaneous dials to the same contact. `lock` is a
//! single compare-and-set under the table guard; it never blocks and never
//! throws on contention. `release` is unconditional so a lock can never
//! outlive its dial attempt, and a TTL sweep reclaims locks whose holder
//! crashed.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use prodial_core::config::RetryConfig;
use prodial_core::models::{Contact, ContactStatus, DialOutcome};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Contact pool service
pub struct ContactPool {
    contacts: RwLock<HashMap<i64, Contact>>,
    /// campaign id -> lists attached to it
    campaign_lists: RwLock<HashMap<i64, Vec<i64>>>,
    retry: RetryConfig,
}

/// Pool-level counters for one campaign
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub eligible: usize,
    pub locked: usize,
    pub exhausted: usize,
}

impl ContactPool {
    /// Create an empty pool with the given retry backoff table
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            contacts: RwLock::new(HashMap::new()),
            campaign_lists: RwLock::new(HashMap::new()),
            retry,
        }
    }

    /// Attach a contact list to a campaign
    pub fn attach_list(&self, campaign_id: i64, list_id: i64) {
        let mut lists = self.campaign_lists.write();
        let entry = lists.entry(campaign_id).or_default();
        if !entry.contains(&list_id) {
            entry.push(list_id);
        }
    }

    /// Load a batch of contacts into the pool
    pub fn load_contacts(&self, batch: Vec<Contact>) -> usize {
        let mut contacts = self.contacts.write();
        let mut loaded = 0;
        for contact in batch {
            contacts.insert(contact.id, contact);
            loaded += 1;
        }
        info!("Loaded {} contacts into the pool", loaded);
        loaded
    }

    /// Get a snapshot of one contact
    pub fn get(&self, contact_id: i64) -> Option<Contact> {
        self.contacts.read().get(&contact_id).cloned()
    }

    /// Select up to `max_count` eligible contacts for a campaign
    ///
    /// Eligible means: list attached to the campaign, unlocked, selectable
    /// status, attempts below budget, and past `next_retry_at`. Ordering is
    /// fresh leads first (NotAttempted before RetryEligible), then lower
    /// attempt count, so fresh leads are exhausted before retries.
    pub fn select_eligible(&self, campaign_id: i64, max_count: usize) -> Vec<Contact> {
        let now = Utc::now();
        let list_ids: Vec<i64> = self
            .campaign_lists
            .read()
            .get(&campaign_id)
            .cloned()
            .unwrap_or_default();

        if list_ids.is_empty() {
            return Vec::new();
        }

        let max_count = max_count.min(crate::constants::MAX_SELECT_BATCH);
        let contacts = self.contacts.read();

        let mut eligible: Vec<&Contact> = contacts
            .values()
            .filter(|c| list_ids.contains(&c.list_id) && c.is_eligible(now))
            .collect();

        eligible.sort_by_key(|c| (tier(c.status), c.attempt_count, c.id));
        eligible.into_iter().take(max_count).cloned().collect()
    }

    /// Try to take the advisory lock on a contact
    ///
    /// Atomic compare-and-set: returns false with no side effect if the
    /// contact is already locked or unknown. A stale lock (older than the
    /// sweep TTL, see `reclaim_stale_locks`) is not special-cased here; the
    /// sweep clears it first.
    pub fn lock(&self, contact_id: i64, owner: &str) -> bool {
        let mut contacts = self.contacts.write();
        match contacts.get_mut(&contact_id) {
            Some(contact) if !contact.locked => {
                contact.locked = true;
                contact.locked_by = Some(owner.to_string());
                contact.locked_at = Some(Utc::now());
                debug!("Contact {} locked by {}", contact_id, owner);
                true
            }
            Some(contact) => {
                debug!(
                    "Contact {} lock refused, held by {:?}",
                    contact_id, contact.locked_by
                );
                false
            }
            None => {
                warn!("Lock requested for unknown contact {}", contact_id);
                false
            }
        }
    }

    /// Release a contact with the outcome of its dial attempt
    ///
    /// Unconditionally clears the lock, increments the attempt counter, and
    /// derives the new status/backoff from the outcome table. Safe to call
    /// for an unlocked contact (the outcome still lands).
    pub fn release(&self, contact_id: i64, outcome: DialOutcome) {
        let now = Utc::now();
        let mut contacts = self.contacts.write();
        match contacts.get_mut(&contact_id) {
            Some(contact) => {
                contact.locked = false;
                contact.locked_by = None;
                contact.locked_at = None;
                contact.apply_outcome(outcome, &self.retry, now);
                debug!(
                    "Contact {} released with outcome {}, status now {}",
                    contact_id, outcome, contact.status
                );
            }
            None => warn!("Release requested for unknown contact {}", contact_id),
        }
    }

    /// Unlock a contact without recording an attempt
    ///
    /// Used when a lock was taken but no dial was ever placed (e.g. pacing
    /// said stop between lock and placement).
    pub fn unlock(&self, contact_id: i64) {
        let mut contacts = self.contacts.write();
        if let Some(contact) = contacts.get_mut(&contact_id) {
            contact.locked = false;
            contact.locked_by = None;
            contact.locked_at = None;
        }
    }

    /// Force-release locks older than `ttl`
    ///
    /// Recovers contacts stranded by a crashed dialer or dropped webhook.
    /// The reclaimed attempt is recorded as `Failed` so the attempt budget
    /// still moves and the contact is rescheduled rather than hammered.
    pub fn reclaim_stale_locks(&self, ttl: Duration) -> usize {
        let now = Utc::now();
        let stale_ids: Vec<i64> = {
            let contacts = self.contacts.read();
            contacts
                .values()
                .filter(|c| c.lock_is_stale(ttl, now))
                .map(|c| c.id)
                .collect()
        };

        for contact_id in &stale_ids {
            warn!("Reclaiming stale lock on contact {}", contact_id);
            self.release(*contact_id, DialOutcome::Failed);
        }
        stale_ids.len()
    }

    /// Re-queue a contact that is out of auto-retry (voicemail, answered)
    ///
    /// Manual operator action; refuses terminally excluded contacts.
    pub fn requeue(&self, contact_id: i64) -> bool {
        let mut contacts = self.contacts.write();
        match contacts.get_mut(&contact_id) {
            Some(contact) if !contact.status.is_excluded() && !contact.locked => {
                contact.status = ContactStatus::RetryEligible;
                contact.next_retry_at = None;
                info!("Contact {} manually re-queued", contact_id);
                true
            }
            _ => false,
        }
    }

    /// Pool counters for a campaign
    pub fn stats(&self, campaign_id: i64) -> PoolStats {
        let now = Utc::now();
        let list_ids: Vec<i64> = self
            .campaign_lists
            .read()
            .get(&campaign_id)
            .cloned()
            .unwrap_or_default();

        let contacts = self.contacts.read();
        let mut stats = PoolStats::default();
        for c in contacts.values().filter(|c| list_ids.contains(&c.list_id)) {
            stats.total += 1;
            if c.locked {
                stats.locked += 1;
            }
            if c.is_eligible(now) {
                stats.eligible += 1;
            }
            if c.status.is_excluded() {
                stats.exhausted += 1;
            }
        }
        stats
    }
}

/// Selection tier: fresh leads sort before retries
fn tier(status: ContactStatus) -> u8 {
    match status {
        ContactStatus::NotAttempted => 0,
        _ => 1,
    }
}
