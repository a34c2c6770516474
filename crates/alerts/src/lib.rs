use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{Alert, AlertCandidate, AlertEvent};

/// Dedup key: at most one alert per (card, scenario, event) triple for
/// the system's lifetime. Keys survive eviction and dismissal.
type DedupKey = (String, Option<String>, AlertEvent);

/// Converts engine outputs into deduplicated, emission-ordered alert
/// records and keeps the read/unread bookkeeping.
///
/// Shared across every symbol worker; all access goes through one
/// internal lock.
#[derive(Clone)]
pub struct AlertManager {
    inner: Arc<RwLock<AlertBook>>,
    capacity: usize,
}

struct AlertBook {
    /// Emission order, oldest at the front.
    alerts: VecDeque<Alert>,
    seen: HashSet<DedupKey>,
}

impl AlertManager {
    pub fn new(capacity: usize) -> Self {
        info!(capacity, "AlertManager initialized");
        Self {
            inner: Arc::new(RwLock::new(AlertBook {
                alerts: VecDeque::new(),
                seen: HashSet::new(),
            })),
            capacity,
        }
    }

    /// Emit an alert unless its dedup key has already been used.
    /// The timestamp is assigned here, at emission — display ordering is
    /// emission order even when ticks arrive with skew.
    pub async fn emit(&self, candidate: AlertCandidate) -> Option<Alert> {
        let key: DedupKey = (
            candidate.card_id.clone(),
            candidate.scenario_id.clone(),
            candidate.event,
        );

        let mut book = self.inner.write().await;
        if !book.seen.insert(key) {
            debug!(
                card_id = %candidate.card_id,
                event = ?candidate.event,
                "duplicate alert suppressed"
            );
            return None;
        }

        let alert = Alert {
            id: uuid::Uuid::new_v4().to_string(),
            card_id: candidate.card_id,
            scenario_id: candidate.scenario_id,
            event: candidate.event,
            severity: candidate.severity,
            title: candidate.title,
            message: candidate.message,
            created_at: Utc::now(),
            read: false,
        };
        book.alerts.push_back(alert.clone());

        // Capacity eviction: oldest first, read or unread.
        while book.alerts.len() > self.capacity {
            if let Some(evicted) = book.alerts.pop_front() {
                debug!(alert_id = %evicted.id, "alert evicted at capacity");
            }
        }

        Some(alert)
    }

    /// Alerts in emission order, optionally unread only.
    pub async fn list(&self, unread_only: bool) -> Vec<Alert> {
        let book = self.inner.read().await;
        book.alerts
            .iter()
            .filter(|a| !unread_only || !a.read)
            .cloned()
            .collect()
    }

    pub async fn unread_count(&self) -> usize {
        let book = self.inner.read().await;
        book.alerts.iter().filter(|a| !a.read).count()
    }

    /// One-way flag flip. Returns false for unknown ids.
    pub async fn mark_read(&self, alert_id: &str) -> bool {
        let mut book = self.inner.write().await;
        match book.alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.read = true;
                true
            }
            None => false,
        }
    }

    /// Remove an alert record. Its dedup key remains spent.
    pub async fn dismiss(&self, alert_id: &str) -> bool {
        let mut book = self.inner.write().await;
        let before = book.alerts.len();
        book.alerts.retain(|a| a.id != alert_id);
        book.alerts.len() != before
    }

    /// Current alert set for persistence write-back.
    pub async fn snapshot(&self) -> Vec<Alert> {
        let book = self.inner.read().await;
        book.alerts.iter().cloned().collect()
    }

    /// Reload persisted alerts at startup, re-seeding the dedup table so
    /// restarts never re-emit a spent key.
    pub async fn restore(&self, alerts: Vec<Alert>) {
        let mut book = self.inner.write().await;
        for alert in alerts {
            book.seen
                .insert((alert.card_id.clone(), alert.scenario_id.clone(), alert.event));
            book.alerts.push_back(alert);
        }
        while book.alerts.len() > self.capacity {
            book.alerts.pop_front();
        }
        info!(count = book.alerts.len(), "alerts restored from store");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AlertSeverity;

    fn candidate(card: &str, scenario: Option<&str>, event: AlertEvent) -> AlertCandidate {
        AlertCandidate {
            card_id: card.into(),
            scenario_id: scenario.map(Into::into),
            event,
            severity: AlertSeverity::Info,
            title: "t".into(),
            message: "m".into(),
        }
    }

    #[tokio::test]
    async fn duplicate_key_emits_at_most_once() {
        let mgr = AlertManager::new(10);
        assert!(mgr
            .emit(candidate("c1", Some("s1"), AlertEvent::Triggered))
            .await
            .is_some());
        assert!(mgr
            .emit(candidate("c1", Some("s1"), AlertEvent::Triggered))
            .await
            .is_none());
        assert_eq!(mgr.list(false).await.len(), 1);
    }

    #[tokio::test]
    async fn distinct_events_on_same_scenario_both_emit() {
        let mgr = AlertManager::new(10);
        assert!(mgr
            .emit(candidate("c1", Some("s1"), AlertEvent::Triggered))
            .await
            .is_some());
        assert!(mgr
            .emit(candidate("c1", Some("s1"), AlertEvent::StopBreached))
            .await
            .is_some());
        assert!(mgr
            .emit(candidate("c1", Some("s1"), AlertEvent::TargetHit(0)))
            .await
            .is_some());
        assert!(mgr
            .emit(candidate("c1", Some("s1"), AlertEvent::TargetHit(1)))
            .await
            .is_some());
        assert_eq!(mgr.list(false).await.len(), 4);
    }

    #[tokio::test]
    async fn listing_preserves_emission_order() {
        let mgr = AlertManager::new(10);
        for i in 0..5u8 {
            mgr.emit(candidate("c1", Some("s1"), AlertEvent::TargetHit(i)))
                .await;
        }
        let listed = mgr.list(false).await;
        let events: Vec<AlertEvent> = listed.iter().map(|a| a.event).collect();
        assert_eq!(
            events,
            (0..5u8).map(AlertEvent::TargetHit).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn eviction_drops_oldest_regardless_of_read_state() {
        let mgr = AlertManager::new(3);
        let first = mgr
            .emit(candidate("c0", None, AlertEvent::Closed))
            .await
            .unwrap();
        // the oldest alert is read; it must still be evicted first
        mgr.mark_read(&first.id).await;
        for card in ["c1", "c2", "c3"] {
            mgr.emit(candidate(card, None, AlertEvent::Closed)).await;
        }
        let listed = mgr.list(false).await;
        assert_eq!(listed.len(), 3);
        assert!(listed.iter().all(|a| a.id != first.id));
        assert_eq!(listed[0].card_id, "c1");
    }

    #[tokio::test]
    async fn mark_read_is_monotonic_and_counts_drop() {
        let mgr = AlertManager::new(10);
        let a = mgr
            .emit(candidate("c1", Some("s1"), AlertEvent::Triggered))
            .await
            .unwrap();
        mgr.emit(candidate("c2", Some("s2"), AlertEvent::Triggered))
            .await;
        assert_eq!(mgr.unread_count().await, 2);

        assert!(mgr.mark_read(&a.id).await);
        assert_eq!(mgr.unread_count().await, 1);
        // marking again is a harmless no-op
        assert!(mgr.mark_read(&a.id).await);
        assert_eq!(mgr.unread_count().await, 1);
        assert_eq!(mgr.list(true).await.len(), 1);

        assert!(!mgr.mark_read("nope").await);
    }

    #[tokio::test]
    async fn dismissal_removes_record_but_key_stays_spent() {
        let mgr = AlertManager::new(10);
        let a = mgr
            .emit(candidate("c1", Some("s1"), AlertEvent::Triggered))
            .await
            .unwrap();
        assert!(mgr.dismiss(&a.id).await);
        assert!(mgr.list(false).await.is_empty());

        // the same (card, scenario, event) never re-emits
        assert!(mgr
            .emit(candidate("c1", Some("s1"), AlertEvent::Triggered))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn restore_seeds_dedup_table() {
        let mgr = AlertManager::new(10);
        let emitted = mgr
            .emit(candidate("c1", Some("s1"), AlertEvent::Triggered))
            .await
            .unwrap();

        let fresh = AlertManager::new(10);
        fresh.restore(vec![emitted]).await;
        assert_eq!(fresh.list(false).await.len(), 1);
        assert!(fresh
            .emit(candidate("c1", Some("s1"), AlertEvent::Triggered))
            .await
            .is_none());
    }
}
