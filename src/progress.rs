//! Progress trackers: per-tracker stage, percent, history, and completion
//! estimates, held in a registry indexed by owner.
//!
//! Trackers are addressable independently of job identity: the queued path
//! and the streaming path both report through the same registry. Percent is
//! monotonically non-decreasing within a tracker's lifetime; a regression is
//! rejected rather than silently accepted.

use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use time::{Duration as TimeDuration, OffsetDateTime};
use uuid::Uuid;

/// Errors raised by the tracker registry.
#[derive(Debug, Error)]
pub enum ProgressError {
    /// Tracker id is unknown or has been purged.
    #[error("tracker {0} not found")]
    NotFound(Uuid),
    /// Update attempted to move percent backwards.
    #[error("percent regression: {from} -> {to}")]
    PercentRegression {
        /// Percent currently recorded on the tracker.
        from: u8,
        /// Rejected lower value.
        to: u8,
    },
    /// Registry lock was poisoned by a panicking writer.
    #[error("tracker registry lock poisoned")]
    Poisoned,
}

/// One append-only history entry.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    /// Stage label recorded with the update.
    pub stage: String,
    /// Percent at the time of the update.
    pub percent: u8,
    /// When the update was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Point-in-time view of a tracker.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    /// Tracker id.
    pub id: Uuid,
    /// Owner the tracker was created for.
    pub owner_id: String,
    /// Most recent stage label.
    pub stage: String,
    /// Current percent, `0..=100`.
    pub percent: u8,
    /// Estimated completion time extrapolated from progress so far.
    #[serde(with = "time::serde::rfc3339::option")]
    pub estimated_completion_at: Option<OffsetDateTime>,
}

/// Aggregate view across all live trackers.
#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMetrics {
    /// Trackers below 100 percent.
    pub active: usize,
    /// Trackers that reached 100 percent and await purging.
    pub completed: usize,
    /// Mean percent across all live trackers.
    pub average_percent: f64,
}

struct Tracker {
    owner_id: String,
    stage: String,
    percent: u8,
    history: Vec<ProgressEntry>,
    created_at: OffsetDateTime,
    finished_at: Option<OffsetDateTime>,
}

impl Tracker {
    fn estimate_completion(&self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        if self.percent == 0 || self.percent >= 100 {
            return None;
        }
        let elapsed = now - self.created_at;
        let projected = elapsed * (100.0 / f64::from(self.percent));
        Some(self.created_at + projected)
    }

    fn snapshot(&self, id: Uuid, now: OffsetDateTime) -> TrackerSnapshot {
        TrackerSnapshot {
            id,
            owner_id: self.owner_id.clone(),
            stage: self.stage.clone(),
            percent: self.percent,
            estimated_completion_at: self.estimate_completion(now),
        }
    }
}

/// Registry owning every live tracker, indexed by id and owner.
///
/// Constructed once at process start and shared through an `Arc`; all
/// operations are synchronous snapshot reads or short critical sections.
#[derive(Default)]
pub struct TrackerRegistry {
    trackers: RwLock<HashMap<Uuid, Tracker>>,
}

impl TrackerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker for `owner_id` and return its id.
    pub fn create(&self, owner_id: &str) -> Uuid {
        let id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let tracker = Tracker {
            owner_id: owner_id.to_string(),
            stage: "created".to_string(),
            percent: 0,
            history: vec![ProgressEntry {
                stage: "created".to_string(),
                percent: 0,
                timestamp: now,
            }],
            created_at: now,
            finished_at: None,
        };
        self.trackers
            .write()
            .expect("tracker registry lock poisoned")
            .insert(id, tracker);
        tracing::debug!(tracker = %id, owner = owner_id, "Tracker created");
        id
    }

    /// Record a stage transition.
    ///
    /// `percent` must be `>=` the tracker's current percent; equal values are
    /// legal and record the stage change without advancing the bar.
    pub fn update(&self, id: Uuid, percent: u8, stage: &str) -> Result<(), ProgressError> {
        let mut guard = self.trackers.write().map_err(|_| ProgressError::Poisoned)?;
        let tracker = guard.get_mut(&id).ok_or(ProgressError::NotFound(id))?;

        let percent = percent.min(100);
        if percent < tracker.percent {
            return Err(ProgressError::PercentRegression {
                from: tracker.percent,
                to: percent,
            });
        }

        let now = OffsetDateTime::now_utc();
        tracker.percent = percent;
        tracker.stage = stage.to_string();
        tracker.history.push(ProgressEntry {
            stage: stage.to_string(),
            percent,
            timestamp: now,
        });
        if percent == 100 && tracker.finished_at.is_none() {
            tracker.finished_at = Some(now);
        }
        Ok(())
    }

    /// Snapshot a tracker's current state.
    pub fn snapshot(&self, id: Uuid) -> Result<TrackerSnapshot, ProgressError> {
        let guard = self.trackers.read().map_err(|_| ProgressError::Poisoned)?;
        let tracker = guard.get(&id).ok_or(ProgressError::NotFound(id))?;
        Ok(tracker.snapshot(id, OffsetDateTime::now_utc()))
    }

    /// Return the most recent `limit` history entries, newest-last.
    pub fn history(&self, id: Uuid, limit: usize) -> Result<Vec<ProgressEntry>, ProgressError> {
        let guard = self.trackers.read().map_err(|_| ProgressError::Poisoned)?;
        let tracker = guard.get(&id).ok_or(ProgressError::NotFound(id))?;
        let skip = tracker.history.len().saturating_sub(limit);
        Ok(tracker.history[skip..].to_vec())
    }

    /// List tracker snapshots belonging to `owner_id`.
    pub fn list_for_owner(&self, owner_id: &str) -> Vec<TrackerSnapshot> {
        let guard = self.trackers.read().expect("tracker registry lock poisoned");
        let now = OffsetDateTime::now_utc();
        let mut snapshots: Vec<TrackerSnapshot> = guard
            .iter()
            .filter(|(_, tracker)| tracker.owner_id == owner_id)
            .map(|(id, tracker)| tracker.snapshot(*id, now))
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }

    /// Aggregate counts and rates across all live trackers.
    pub fn metrics(&self) -> ProgressMetrics {
        let guard = self.trackers.read().expect("tracker registry lock poisoned");
        let total = guard.len();
        let completed = guard
            .values()
            .filter(|tracker| tracker.percent >= 100)
            .count();
        let average_percent = if total == 0 {
            0.0
        } else {
            guard
                .values()
                .map(|tracker| f64::from(tracker.percent))
                .sum::<f64>()
                / total as f64
        };
        ProgressMetrics {
            active: total - completed,
            completed,
            average_percent,
        }
    }

    /// Remove finished trackers older than the retention window.
    pub fn purge_expired(&self, retention: std::time::Duration) -> usize {
        let cutoff = OffsetDateTime::now_utc()
            - TimeDuration::try_from(retention).unwrap_or(TimeDuration::ZERO);
        let mut guard = self.trackers.write().expect("tracker registry lock poisoned");
        let before = guard.len();
        guard.retain(|_, tracker| match tracker.finished_at {
            Some(finished) => finished > cutoff,
            None => true,
        });
        before - guard.len()
    }

    /// Drop a tracker regardless of state.
    pub fn remove(&self, id: Uuid) {
        self.trackers
            .write()
            .expect("tracker registry lock poisoned")
            .remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_monotonic_within_a_tracker() {
        let registry = TrackerRegistry::new();
        let id = registry.create("user-1");
        registry.update(id, 10, "extract").expect("update");
        registry.update(id, 10, "chunk").expect("equal percent is legal");
        registry.update(id, 60, "store").expect("update");

        let error = registry.update(id, 40, "rewind").unwrap_err();
        assert!(matches!(
            error,
            ProgressError::PercentRegression { from: 60, to: 40 }
        ));

        let history = registry.history(id, 16).expect("history");
        for window in history.windows(2) {
            assert!(window[0].percent <= window[1].percent);
        }
    }

    #[test]
    fn history_returns_newest_entries_last() {
        let registry = TrackerRegistry::new();
        let id = registry.create("user-1");
        for percent in [5u8, 25, 50, 75, 100] {
            registry
                .update(id, percent, &format!("stage-{percent}"))
                .expect("update");
        }
        let history = registry.history(id, 2).expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].percent, 75);
        assert_eq!(history[1].percent, 100);
    }

    #[test]
    fn unknown_tracker_reports_not_found() {
        let registry = TrackerRegistry::new();
        let missing = Uuid::new_v4();
        assert!(matches!(
            registry.snapshot(missing),
            Err(ProgressError::NotFound(_))
        ));
    }

    #[test]
    fn owner_index_lists_only_owned_trackers() {
        let registry = TrackerRegistry::new();
        let a = registry.create("alice");
        let _b = registry.create("bob");
        let listed = registry.list_for_owner("alice");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, a);
    }

    #[test]
    fn metrics_aggregate_across_trackers() {
        let registry = TrackerRegistry::new();
        let a = registry.create("alice");
        let b = registry.create("alice");
        registry.update(a, 100, "done").expect("update");
        registry.update(b, 50, "store").expect("update");

        let metrics = registry.metrics();
        assert_eq!(metrics.active, 1);
        assert_eq!(metrics.completed, 1);
        assert!((metrics.average_percent - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn estimate_appears_once_progress_is_underway() {
        let registry = TrackerRegistry::new();
        let id = registry.create("alice");
        assert!(
            registry
                .snapshot(id)
                .expect("snapshot")
                .estimated_completion_at
                .is_none()
        );
        registry.update(id, 50, "store").expect("update");
        assert!(
            registry
                .snapshot(id)
                .expect("snapshot")
                .estimated_completion_at
                .is_some()
        );
    }

    #[test]
    fn purge_removes_only_expired_finished_trackers() {
        let registry = TrackerRegistry::new();
        let done = registry.create("alice");
        let live = registry.create("alice");
        registry.update(done, 100, "done").expect("update");

        // zero retention: anything finished is already expired
        let purged = registry.purge_expired(std::time::Duration::ZERO);
        assert_eq!(purged, 1);
        assert!(matches!(
            registry.snapshot(done),
            Err(ProgressError::NotFound(_))
        ));
        assert!(registry.snapshot(live).is_ok());
    }
}
