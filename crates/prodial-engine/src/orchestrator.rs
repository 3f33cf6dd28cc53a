//! Dial queue orchestration and the autodial control loop
//!
//! Owns the queue entry table and the per-campaign background loops. Each
//! active predictive campaign gets one tokio task that ticks on a fixed
//! interval: reclaim stale locks, ask the pacing controller how many calls to
//! place, lock that many contacts, and hand each one to the placement
//! service. A contact that cannot be locked is simply skipped; the loop never
//! blocks on contention.
//!
//! Manual campaigns do not tick. Agents pull work with `next_contact`, which
//! locks the contact under the agent's owner token and returns a queue entry
//! in `Dialing`.

use crate::constants::{AGENT_OWNER_PREFIX, AUTODIAL_OWNER_PREFIX, MIN_TICK_INTERVAL_SECS};
use crate::contact_pool::ContactPool;
use crate::lifecycle::CallLifecycle;
use crate::pacing::PacingController;
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use prodial_core::config::EngineConfig;
use prodial_core::models::{
    CallState, DialOutcome, DialQueueEntry, PredictiveDialerConfig, QueueEntryStatus,
};
use prodial_core::traits::{CallPlacementService, PlacementRequest};
use prodial_core::{DialerError, DialerResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Queue counters for one campaign
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub queued: usize,
    pub dialing: usize,
    pub connected: usize,
    pub completed: usize,
    pub failed: usize,
    pub abandoned: usize,
}

/// Dial queue orchestrator service
pub struct DialQueueOrchestrator {
    pool: Arc<ContactPool>,
    pacing: Arc<PacingController>,
    lifecycle: Arc<CallLifecycle>,
    placement: Arc<dyn CallPlacementService>,
    entries: RwLock<HashMap<Uuid, DialQueueEntry>>,
    /// queue entry id -> lifecycle call id, for entries the loop dialed
    entry_calls: RwLock<HashMap<Uuid, Uuid>>,
    loops: tokio::sync::RwLock<HashMap<i64, JoinHandle<()>>>,
    engine: EngineConfig,
}

impl DialQueueOrchestrator {
    /// Create the orchestrator wired to its collaborators
    pub fn new(
        pool: Arc<ContactPool>,
        pacing: Arc<PacingController>,
        lifecycle: Arc<CallLifecycle>,
        placement: Arc<dyn CallPlacementService>,
        engine: EngineConfig,
    ) -> Self {
        Self {
            pool,
            pacing,
            lifecycle,
            placement,
            entries: RwLock::new(HashMap::new()),
            entry_calls: RwLock::new(HashMap::new()),
            loops: tokio::sync::RwLock::new(HashMap::new()),
            engine,
        }
    }

    /// (Re)generate the pending queue for a campaign from the contact pool
    ///
    /// Discards the campaign's still-queued entries first so repeated
    /// generation is idempotent; in-flight and finished entries are kept.
    pub fn generate(&self, campaign_id: i64, max_records: usize) -> usize {
        let mut entries = self.entries.write();
        entries.retain(|_, e| {
            !(e.campaign_id == campaign_id && e.status == QueueEntryStatus::Queued)
        });

        let candidates = self.pool.select_eligible(campaign_id, max_records);
        let generated = candidates.len();
        for contact in candidates {
            let entry = DialQueueEntry::new(campaign_id, contact.id, 0);
            entries.insert(entry.id, entry);
        }
        info!(
            "Generated {} queue entries for campaign {}",
            generated, campaign_id
        );
        generated
    }

    /// Pull the next contact for an agent (manual dialing modes)
    ///
    /// Walks the campaign's queued entries in priority order and returns the
    /// first whose contact lock succeeds, marked `Dialing` and assigned to
    /// the agent. Falls back to the pool directly when the queue is empty.
    /// An exhausted pool returns None, not an error.
    pub fn next_contact(&self, campaign_id: i64, agent_id: i64) -> Option<DialQueueEntry> {
        let owner = format!("{}:{}", AGENT_OWNER_PREFIX, agent_id);

        let mut queued: Vec<Uuid> = {
            let entries = self.entries.read();
            let mut queued: Vec<&DialQueueEntry> = entries
                .values()
                .filter(|e| {
                    e.campaign_id == campaign_id && e.status == QueueEntryStatus::Queued
                })
                .collect();
            queued.sort_by_key(|e| (std::cmp::Reverse(e.priority), e.queued_at));
            queued.iter().map(|e| e.id).collect()
        };

        // Queue empty: pull straight from the pool
        if queued.is_empty() {
            for contact in self.pool.select_eligible(campaign_id, 5) {
                if self.pool.lock(contact.id, &owner) {
                    let mut entry = DialQueueEntry::new(campaign_id, contact.id, 0);
                    entry.status = QueueEntryStatus::Dialing;
                    entry.assigned_agent_id = Some(agent_id);
                    entry.dialed_at = Some(Utc::now());
                    self.entries.write().insert(entry.id, entry.clone());
                    debug!(
                        "Agent {} pulled contact {} from campaign {} pool",
                        agent_id, contact.id, campaign_id
                    );
                    return Some(entry);
                }
            }
            return None;
        }

        for entry_id in queued.drain(..) {
            let contact_id = match self.entries.read().get(&entry_id) {
                Some(e) if e.status == QueueEntryStatus::Queued => e.contact_id,
                _ => continue,
            };
            // Lock lost to another agent between snapshot and here: skip
            if !self.pool.lock(contact_id, &owner) {
                continue;
            }

            let mut entries = self.entries.write();
            match entries.get_mut(&entry_id) {
                Some(entry) if entry.status == QueueEntryStatus::Queued => {
                    entry.status = QueueEntryStatus::Dialing;
                    entry.assigned_agent_id = Some(agent_id);
                    entry.dialed_at = Some(Utc::now());
                    debug!(
                        "Agent {} took queue entry {} (contact {})",
                        agent_id, entry_id, contact_id
                    );
                    return Some(entry.clone());
                }
                _ => {
                    // Entry raced away after we locked the contact
                    drop(entries);
                    self.pool.unlock(contact_id);
                }
            }
        }
        None
    }

    /// Update a queue entry's status
    ///
    /// A terminal status stamps `completed_at` and ends the dial attempt.
    /// Entries backed by a lifecycle call are closed through the lifecycle so
    /// the contact release and pacing feed happen exactly once; standalone
    /// entries release the contact directly. Either way the contact lock does
    /// not outlive the entry.
    pub async fn update_status(
        &self,
        queue_id: Uuid,
        status: QueueEntryStatus,
        outcome: Option<DialOutcome>,
        notes: Option<String>,
    ) -> DialerResult<DialQueueEntry> {
        enum Cleanup {
            Release(i64, DialOutcome),
            CloseCall(Uuid, DialOutcome, Option<String>),
        }

        let (entry, cleanup) = {
            let mut entries = self.entries.write();
            let entry = entries
                .get_mut(&queue_id)
                .ok_or_else(|| DialerError::QueueEntryNotFound(queue_id.to_string()))?;

            if entry.is_terminal() {
                return Err(DialerError::InvalidInput(format!(
                    "queue entry {} is already {}",
                    queue_id, entry.status
                )));
            }

            entry.status = status;
            if notes.is_some() {
                entry.notes = notes.clone();
            }
            if status == QueueEntryStatus::Dialing && entry.dialed_at.is_none() {
                entry.dialed_at = Some(Utc::now());
            }

            let mut cleanup = None;
            if status.is_terminal() {
                entry.completed_at = Some(Utc::now());
                let outcome = outcome.unwrap_or(match status {
                    QueueEntryStatus::Abandoned => DialOutcome::Abandoned,
                    QueueEntryStatus::Failed => DialOutcome::Failed,
                    _ => DialOutcome::Answered,
                });
                entry.outcome = Some(outcome);
                cleanup = Some(match self.entry_calls.read().get(&queue_id) {
                    Some(call_id) => Cleanup::CloseCall(*call_id, outcome, notes),
                    None => Cleanup::Release(entry.contact_id, outcome),
                });
            }
            (entry.clone(), cleanup)
        };

        match cleanup {
            Some(Cleanup::Release(contact_id, outcome)) => {
                self.pool.release(contact_id, outcome);
            }
            Some(Cleanup::CloseCall(call_id, outcome, notes)) => {
                self.close_linked_call(call_id, status, outcome, notes).await;
            }
            None => {}
        }
        Ok(entry)
    }

    /// Terminate the lifecycle call behind a queue entry, if still live
    ///
    /// An operator can close a loop-dialed entry before any provider callback
    /// arrives. The linked call then still holds the contact lock, so it is
    /// driven to a matching terminal state here. A call that already
    /// terminated has released the contact and is left alone.
    async fn close_linked_call(
        &self,
        call_id: Uuid,
        status: QueueEntryStatus,
        outcome: DialOutcome,
        notes: Option<String>,
    ) {
        match self.lifecycle.call_state(call_id) {
            Some(state) if state.is_terminal() => {}
            Some(_) => {
                let closed = match status {
                    QueueEntryStatus::Abandoned => {
                        self.lifecycle
                            .fail_with_state(call_id, "closed from queue", CallState::Abandoned)
                            .await
                    }
                    QueueEntryStatus::Failed => {
                        self.lifecycle.fail(call_id, "closed from queue").await
                    }
                    _ => {
                        self.lifecycle
                            .complete(call_id, outcome, None, None, notes)
                            .await
                    }
                };
                if !closed {
                    debug!(
                        "Call {} raced to terminal while its queue entry was closed",
                        call_id
                    );
                }
            }
            None => {}
        }
    }

    /// Get a queue entry snapshot
    pub fn get_entry(&self, queue_id: Uuid) -> Option<DialQueueEntry> {
        self.entries.read().get(&queue_id).cloned()
    }

    /// All entries for a campaign
    pub fn entries_for_campaign(&self, campaign_id: i64) -> Vec<DialQueueEntry> {
        self.entries
            .read()
            .values()
            .filter(|e| e.campaign_id == campaign_id)
            .cloned()
            .collect()
    }

    /// Queue counters for a campaign
    pub fn queue_stats(&self, campaign_id: i64) -> QueueStats {
        let entries = self.entries.read();
        let mut stats = QueueStats::default();
        for e in entries.values().filter(|e| e.campaign_id == campaign_id) {
            stats.total += 1;
            match e.status {
                QueueEntryStatus::Queued => stats.queued += 1,
                QueueEntryStatus::Dialing => stats.dialing += 1,
                QueueEntryStatus::Connected => stats.connected += 1,
                QueueEntryStatus::Completed => stats.completed += 1,
                QueueEntryStatus::Failed => stats.failed += 1,
                QueueEntryStatus::Abandoned => stats.abandoned += 1,
            }
        }
        stats
    }

    // ==================== Autodial control loop ====================

    /// Start a campaign
    ///
    /// Registers the pacing configuration and, for predictive campaigns,
    /// spawns the tick loop. Starting an already-running campaign is an
    /// error; stop it first.
    pub async fn start_campaign(
        self: Arc<Self>,
        config: PredictiveDialerConfig,
    ) -> DialerResult<()> {
        let campaign_id = config.campaign_id;
        let mut loops = self.loops.write().await;
        if loops.contains_key(&campaign_id) {
            return Err(DialerError::CampaignAlreadyRunning(campaign_id));
        }

        let predictive = config.dial_method.is_predictive();
        self.pacing.register(config)?;
        self.pacing.set_active(campaign_id, true)?;

        if !predictive {
            info!(
                "Campaign {} started in manual mode, no dial loop",
                campaign_id
            );
            return Ok(());
        }

        let tick_secs = self.engine.tick_interval_secs.max(MIN_TICK_INTERVAL_SECS);
        let orchestrator = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(tick_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(
                "Autodial loop started for campaign {} (tick {}s)",
                campaign_id, tick_secs
            );
            loop {
                interval.tick().await;
                orchestrator.tick(campaign_id).await;
            }
        });

        loops.insert(campaign_id, handle);
        Ok(())
    }

    /// Stop a campaign's dial loop and deactivate its pacing
    pub async fn stop_campaign(&self, campaign_id: i64) -> bool {
        let mut loops = self.loops.write().await;
        let stopped = match loops.remove(&campaign_id) {
            Some(handle) => {
                handle.abort();
                info!("Autodial loop stopped for campaign {}", campaign_id);
                true
            }
            None => false,
        };
        if let Err(e) = self.pacing.set_active(campaign_id, false) {
            debug!("Deactivate pacing for campaign {}: {}", campaign_id, e);
        }
        stopped
    }

    /// Check whether a campaign's loop is running
    pub async fn is_running(&self, campaign_id: i64) -> bool {
        self.loops.read().await.contains_key(&campaign_id)
    }

    /// Stop all campaign loops
    pub async fn shutdown(&self) {
        let mut loops = self.loops.write().await;
        for (campaign_id, handle) in loops.drain() {
            handle.abort();
            info!("Autodial loop stopped for campaign {}", campaign_id);
        }
    }

    /// One pass of the autodial loop for a campaign
    ///
    /// Public so tests and operator tooling can drive the loop manually.
    pub async fn tick(&self, campaign_id: i64) {
        let reclaimed = self
            .pool
            .reclaim_stale_locks(Duration::seconds(self.engine.lock_ttl_secs));
        if reclaimed > 0 {
            warn!(
                "Campaign {} tick reclaimed {} stale contact locks",
                campaign_id, reclaimed
            );
        }

        self.sync_entries(campaign_id);
        self.prune_finished(campaign_id);

        let batch = self
            .pacing
            .calls_for_tick(campaign_id, self.engine.tick_interval_secs);
        if batch == 0 {
            debug!("Campaign {} tick: pacing says place 0 calls", campaign_id);
            return;
        }

        let owner = format!("{}:{}", AUTODIAL_OWNER_PREFIX, campaign_id);
        let candidates = self.pool.select_eligible(campaign_id, batch);
        let mut placed = 0usize;

        for contact in candidates {
            if !self.pool.lock(contact.id, &owner) {
                continue;
            }
            if self.dial_contact(campaign_id, contact.id, &contact.phone_number).await {
                placed += 1;
            }
        }

        debug!(
            "Campaign {} tick: placed {} of {} allowed calls",
            campaign_id, placed, batch
        );
    }

    /// Place one call for a locked contact
    ///
    /// The contact lock is held on entry. The queue entry starts `Queued` and
    /// flips to `Dialing` at the hand-off to the placement service. On
    /// placement failure the call is failed through the lifecycle, which
    /// releases the lock.
    async fn dial_contact(&self, campaign_id: i64, contact_id: i64, phone_number: &str) -> bool {
        let entry = DialQueueEntry::new(campaign_id, contact_id, 0);
        let entry_id = entry.id;

        let call_id = self
            .lifecycle
            .create(campaign_id, Some(contact_id), phone_number, 0, None);

        self.entries.write().insert(entry_id, entry);
        self.entry_calls.write().insert(entry_id, call_id);

        let request = PlacementRequest {
            call_id,
            phone_number: phone_number.to_string(),
            caller_id: self.engine.caller_id.clone(),
            campaign_id,
        };

        // Hand-off: the entry leaves the queue for the provider
        {
            let mut entries = self.entries.write();
            if let Some(entry) = entries.get_mut(&entry_id) {
                entry.status = QueueEntryStatus::Dialing;
                entry.dialed_at = Some(Utc::now());
            }
        }

        match self.placement.place_call(&request).await {
            Ok(provider_call_id) => {
                self.lifecycle
                    .set_provider_call_id(call_id, &provider_call_id);
                self.pacing.record_call_placed(campaign_id);
                true
            }
            Err(e) => {
                error!(
                    "Placement failed for contact {} (campaign {}): {}",
                    contact_id, campaign_id, e
                );
                // Releases the contact lock and records the failed attempt
                self.lifecycle.fail(call_id, "placement failed").await;
                let mut entries = self.entries.write();
                if let Some(entry) = entries.get_mut(&entry_id) {
                    entry.status = QueueEntryStatus::Failed;
                    entry.completed_at = Some(Utc::now());
                    entry.outcome = Some(DialOutcome::Failed);
                }
                false
            }
        }
    }

    /// Drop finished entries past the retention window
    ///
    /// Keeps the entry table bounded on long-running campaigns. The linked
    /// call mapping goes with the entry.
    fn prune_finished(&self, campaign_id: i64) -> usize {
        let cutoff = Utc::now() - Duration::seconds(self.engine.completed_retention_secs);
        let pruned: Vec<Uuid> = {
            let mut entries = self.entries.write();
            let ids: Vec<Uuid> = entries
                .values()
                .filter(|e| {
                    e.campaign_id == campaign_id
                        && e.is_terminal()
                        && e.completed_at.map(|t| t <= cutoff).unwrap_or(false)
                })
                .map(|e| e.id)
                .collect();
            for id in &ids {
                entries.remove(id);
            }
            ids
        };

        if !pruned.is_empty() {
            let mut entry_calls = self.entry_calls.write();
            for id in &pruned {
                entry_calls.remove(id);
            }
            debug!(
                "Campaign {} pruned {} finished queue entries",
                campaign_id,
                pruned.len()
            );
        }
        pruned.len()
    }

    /// Pull terminal call results into their queue entries
    fn sync_entries(&self, campaign_id: i64) {
        let dialing: Vec<Uuid> = {
            let entries = self.entries.read();
            entries
                .values()
                .filter(|e| {
                    e.campaign_id == campaign_id
                        && matches!(
                            e.status,
                            QueueEntryStatus::Dialing | QueueEntryStatus::Connected
                        )
                })
                .map(|e| e.id)
                .collect()
        };

        for entry_id in dialing {
            let call_id = match self.entry_calls.read().get(&entry_id) {
                Some(id) => *id,
                None => continue,
            };
            let call = match self.lifecycle.get_call(call_id) {
                Some(c) => c,
                None => continue,
            };

            let mut entries = self.entries.write();
            let entry = match entries.get_mut(&entry_id) {
                Some(e) => e,
                None => continue,
            };

            match call.state {
                CallState::Connected => entry.status = QueueEntryStatus::Connected,
                CallState::Completed => {
                    entry.status = QueueEntryStatus::Completed;
                    entry.completed_at = call.end_time;
                    entry.outcome = call.outcome;
                }
                CallState::Failed => {
                    entry.status = QueueEntryStatus::Failed;
                    entry.completed_at = call.end_time;
                    entry.outcome = call.outcome;
                }
                CallState::Abandoned => {
                    entry.status = QueueEntryStatus::Abandoned;
                    entry.completed_at = call.end_time;
                    entry.outcome = call.outcome;
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use prodial_core::config::{PacingConfig, RetryConfig};
    use prodial_core::models::{Contact, ContactStatus, DialMethod, DialerMetrics};
    use prodial_core::traits::NullRecordSink;

    /// Placement mock that records requests and can be told to fail
    #[derive(Default)]
    struct MockPlacement {
        requests: Mutex<Vec<PlacementRequest>>,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl CallPlacementService for MockPlacement {
        async fn place_call(&self, request: &PlacementRequest) -> Result<String, DialerError> {
            self.requests.lock().push(request.clone());
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                Err(DialerError::Placement("no route".to_string()))
            } else {
                Ok(format!("prov-{}", request.call_id))
            }
        }
    }

    struct Fixture {
        pool: Arc<ContactPool>,
        pacing: Arc<PacingController>,
        lifecycle: Arc<CallLifecycle>,
        placement: Arc<MockPlacement>,
        orch: Arc<DialQueueOrchestrator>,
    }

    fn fixture(contacts: Vec<Contact>) -> Fixture {
        fixture_with_retention(contacts, 3600)
    }

    fn fixture_with_retention(contacts: Vec<Contact>, retention_secs: i64) -> Fixture {
        let pool = Arc::new(ContactPool::new(RetryConfig::default()));
        pool.attach_list(1, 10);
        pool.load_contacts(contacts);

        let pacing = Arc::new(PacingController::new(PacingConfig::default()));
        let lifecycle = Arc::new(CallLifecycle::new(
            Arc::clone(&pool),
            Arc::clone(&pacing),
            Arc::new(NullRecordSink),
        ));
        let placement = Arc::new(MockPlacement::default());

        let orch = Arc::new(DialQueueOrchestrator::new(
            Arc::clone(&pool),
            Arc::clone(&pacing),
            Arc::clone(&lifecycle),
            Arc::clone(&placement) as Arc<dyn CallPlacementService>,
            EngineConfig {
                tick_interval_secs: 60,
                lock_ttl_secs: 300,
                caller_id: "18005550100".to_string(),
                completed_retention_secs: retention_secs,
            },
        ));

        Fixture {
            pool,
            pacing,
            lifecycle,
            placement,
            orch,
        }
    }

    fn contacts(n: i64) -> Vec<Contact> {
        (1..=n)
            .map(|i| Contact::new(i, 10, format!("155500000{:02}", i), 3))
            .collect()
    }

    fn seed_pacing(pacing: &PacingController, campaign_id: i64, agents: u32) {
        pacing
            .register(PredictiveDialerConfig::autodial(campaign_id, 100))
            .unwrap();
        pacing
            .update_metrics(
                campaign_id,
                &DialerMetrics {
                    available_agents: agents,
                    active_calls: 0,
                    average_call_time_secs: 120.0,
                    connection_rate: 0.3,
                    abandon_rate: 0.02,
                },
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_generate_is_idempotent() {
        let f = fixture(contacts(5));
        assert_eq!(f.orch.generate(1, 100), 5);
        assert_eq!(f.orch.generate(1, 100), 5);
        assert_eq!(f.orch.queue_stats(1).queued, 5);
    }

    #[tokio::test]
    async fn test_next_contact_locks_and_assigns() {
        let f = fixture(contacts(2));
        f.orch.generate(1, 100);

        let entry = f.orch.next_contact(1, 7).unwrap();
        assert_eq!(entry.status, QueueEntryStatus::Dialing);
        assert_eq!(entry.assigned_agent_id, Some(7));

        let contact = f.pool.get(entry.contact_id).unwrap();
        assert!(contact.locked);
        assert_eq!(contact.locked_by.as_deref(), Some("agent:7"));
    }

    #[tokio::test]
    async fn test_next_contact_skips_contested() {
        let f = fixture(contacts(2));
        f.orch.generate(1, 100);

        let first = f.orch.next_contact(1, 7).unwrap();
        let second = f.orch.next_contact(1, 8).unwrap();
        assert_ne!(first.contact_id, second.contact_id);
    }

    #[tokio::test]
    async fn test_next_contact_empty_pool_is_none() {
        let f = fixture(vec![]);
        assert!(f.orch.next_contact(1, 7).is_none());
    }

    #[tokio::test]
    async fn test_next_contact_exhausted_pool_is_none() {
        let f = fixture(contacts(1));
        f.orch.generate(1, 100);
        f.orch.next_contact(1, 7).unwrap();
        // Only contact is now locked by agent 7
        assert!(f.orch.next_contact(1, 8).is_none());
    }

    #[tokio::test]
    async fn test_update_status_terminal_releases_contact() {
        let f = fixture(contacts(1));
        f.orch.generate(1, 100);
        let entry = f.orch.next_contact(1, 7).unwrap();

        let updated = f
            .orch
            .update_status(
                entry.id,
                QueueEntryStatus::Completed,
                Some(DialOutcome::Answered),
                Some("sale".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(updated.status, QueueEntryStatus::Completed);
        assert!(updated.completed_at.is_some());

        let contact = f.pool.get(entry.contact_id).unwrap();
        assert!(!contact.locked);
        assert_eq!(contact.attempt_count, 1);
        assert_eq!(contact.status, ContactStatus::Answered);
    }

    #[tokio::test]
    async fn test_update_status_refuses_terminal_entry() {
        let f = fixture(contacts(1));
        f.orch.generate(1, 100);
        let entry = f.orch.next_contact(1, 7).unwrap();

        f.orch
            .update_status(entry.id, QueueEntryStatus::Failed, None, None)
            .await
            .unwrap();
        let err = f
            .orch
            .update_status(entry.id, QueueEntryStatus::Completed, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_input");

        // Attempt counted once, not twice
        assert_eq!(f.pool.get(entry.contact_id).unwrap().attempt_count, 1);
    }

    #[tokio::test]
    async fn test_update_status_unknown_entry() {
        let f = fixture(vec![]);
        let err = f
            .orch
            .update_status(Uuid::new_v4(), QueueEntryStatus::Completed, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "queue_entry_not_found");
    }

    #[tokio::test]
    async fn test_update_status_closes_live_loop_call() {
        let f = fixture(contacts(1));
        seed_pacing(&f.pacing, 1, 1);

        f.orch.tick(1).await;
        let entry = f.orch.entries_for_campaign(1).pop().unwrap();
        assert_eq!(entry.status, QueueEntryStatus::Dialing);
        assert!(f.pool.get(entry.contact_id).unwrap().locked);

        // Operator closes the entry before any provider callback
        f.orch
            .update_status(entry.id, QueueEntryStatus::Failed, None, None)
            .await
            .unwrap();

        let contact = f.pool.get(entry.contact_id).unwrap();
        assert!(!contact.locked);
        assert_eq!(contact.attempt_count, 1);
        assert_eq!(f.lifecycle.calls_by_state(CallState::Failed).len(), 1);
        assert!(f.lifecycle.active_calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_status_skips_release_when_call_terminal() {
        let f = fixture(contacts(1));
        seed_pacing(&f.pacing, 1, 1);

        f.orch.tick(1).await;
        let entry = f.orch.entries_for_campaign(1).pop().unwrap();
        let call = f.lifecycle.calls_by_state(CallState::Initiated).pop().unwrap();

        f.lifecycle
            .transition(call.id, CallState::Ringing, Default::default())
            .await;
        f.lifecycle
            .transition(call.id, CallState::Answered, Default::default())
            .await;
        f.lifecycle
            .complete(call.id, DialOutcome::Answered, None, None, None)
            .await;

        f.orch
            .update_status(entry.id, QueueEntryStatus::Completed, None, None)
            .await
            .unwrap();

        // The lifecycle released the contact once; the entry close adds nothing
        let contact = f.pool.get(entry.contact_id).unwrap();
        assert!(!contact.locked);
        assert_eq!(contact.attempt_count, 1);
        assert_eq!(contact.status, ContactStatus::Answered);
    }

    #[tokio::test]
    async fn test_tick_prunes_finished_entries() {
        let f = fixture_with_retention(contacts(1), 0);
        seed_pacing(&f.pacing, 1, 1);

        f.orch.tick(1).await;
        let entry = f.orch.entries_for_campaign(1).pop().unwrap();
        f.orch
            .update_status(entry.id, QueueEntryStatus::Failed, None, None)
            .await
            .unwrap();

        f.orch.tick(1).await;
        assert!(f.orch.get_entry(entry.id).is_none());
        assert_eq!(f.orch.queue_stats(1).total, 0);
    }

    #[tokio::test]
    async fn test_tick_places_paced_batch() {
        let f = fixture(contacts(20));
        seed_pacing(&f.pacing, 1, 5);

        f.orch.tick(1).await;

        // 5 agents / 120 s / 0.3 connect => ~8.33/min, floor 8 on a 60 s tick
        let placed = f.placement.requests.lock().len();
        assert_eq!(placed, 8);
        assert_eq!(f.orch.queue_stats(1).dialing, 8);
        assert_eq!(f.pool.stats(1).locked, 8);
        assert_eq!(f.lifecycle.calls_by_state(CallState::Initiated).len(), 8);
    }

    #[tokio::test]
    async fn test_tick_zero_agents_places_nothing() {
        let f = fixture(contacts(20));
        seed_pacing(&f.pacing, 1, 0);

        f.orch.tick(1).await;
        assert!(f.placement.requests.lock().is_empty());
        assert_eq!(f.pool.stats(1).locked, 0);
    }

    #[tokio::test]
    async fn test_tick_placement_failure_releases_contact() {
        let f = fixture(contacts(3));
        seed_pacing(&f.pacing, 1, 1);
        f.placement
            .fail
            .store(true, std::sync::atomic::Ordering::SeqCst);

        f.orch.tick(1).await;

        // Everything dialed failed; no locks left behind
        assert_eq!(f.pool.stats(1).locked, 0);
        let stats = f.orch.queue_stats(1);
        assert_eq!(stats.dialing, 0);
        assert_eq!(stats.failed, stats.total);
    }

    #[tokio::test]
    async fn test_tick_syncs_entries_from_call_results() {
        let f = fixture(contacts(1));
        seed_pacing(&f.pacing, 1, 1);

        f.orch.tick(1).await;
        let entry = f.orch.entries_for_campaign(1).pop().unwrap();
        assert_eq!(entry.status, QueueEntryStatus::Dialing);

        let call = f.lifecycle.calls_by_state(CallState::Initiated).pop().unwrap();
        f.lifecycle
            .transition(call.id, CallState::Ringing, Default::default())
            .await;
        f.lifecycle
            .transition(call.id, CallState::Answered, Default::default())
            .await;
        f.lifecycle
            .transition(call.id, CallState::Connected, Default::default())
            .await;
        f.lifecycle
            .complete(call.id, DialOutcome::Answered, None, None, None)
            .await;

        f.orch.tick(1).await;
        let entry = f.orch.get_entry(entry.id).unwrap();
        assert_eq!(entry.status, QueueEntryStatus::Completed);
        assert_eq!(entry.outcome, Some(DialOutcome::Answered));
    }

    #[tokio::test]
    async fn test_start_stop_campaign_loop() {
        let f = fixture(contacts(5));

        let mut config = PredictiveDialerConfig::autodial(1, 10);
        config.dial_method = DialMethod::Autodial;
        Arc::clone(&f.orch).start_campaign(config.clone()).await.unwrap();
        assert!(f.orch.is_running(1).await);

        let err = Arc::clone(&f.orch).start_campaign(config).await.unwrap_err();
        assert_eq!(err.error_code(), "campaign_already_running");

        assert!(f.orch.stop_campaign(1).await);
        assert!(!f.orch.is_running(1).await);
        assert!(!f.orch.stop_campaign(1).await);
    }

    #[tokio::test]
    async fn test_manual_campaign_has_no_loop() {
        let f = fixture(contacts(5));
        let mut config = PredictiveDialerConfig::autodial(1, 10);
        config.dial_method = DialMethod::ManualDial;

        Arc::clone(&f.orch).start_campaign(config).await.unwrap();
        assert!(!f.orch.is_running(1).await);
        assert!(f.pacing.config(1).unwrap().is_active);
    }
}
