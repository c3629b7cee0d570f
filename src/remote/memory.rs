use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{RemoteHit, RemotePoint, RemoteStore};
use crate::error::{RagsyncError, Result};
use crate::search::vector::cosine_similarity;

/// In-process remote store.
///
/// Used for offline runs and tests. Outages and per-chunk rejections can be
/// injected to exercise the sync state machine.
#[derive(Default)]
pub struct MemoryRemoteStore {
    points: Mutex<BTreeMap<String, RemotePoint>>,
    unavailable: AtomicBool,
    rejected: Mutex<HashSet<String>>,
    upserts: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While unavailable every call fails with a transient error.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Reject uploads of one fingerprint with a permanent error.
    pub fn fail_fingerprint(&self, fingerprint: &str) {
        lock(&self.rejected).insert(fingerprint.to_string());
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        lock(&self.points).contains_key(fingerprint)
    }

    pub fn len(&self) -> usize {
        lock(&self.points).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Successful upserts since creation, overwrites included.
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RagsyncError::TransientIo("remote store unavailable".into()));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ensure_ready(&self, _dimensions: usize) -> Result<()> {
        self.check_available()
    }

    async fn upsert(&self, point: &RemotePoint) -> Result<()> {
        self.check_available()?;
        if lock(&self.rejected).contains(&point.chunk.fingerprint) {
            return Err(RagsyncError::RemoteStore(format!(
                "rejected point {}",
                point.chunk.fingerprint
            )));
        }
        lock(&self.points).insert(point.chunk.fingerprint.clone(), point.clone());
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, fingerprints: &[String]) -> Result<()> {
        self.check_available()?;
        let mut points = lock(&self.points);
        for fingerprint in fingerprints {
            points.remove(fingerprint);
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<RemoteHit>> {
        self.check_available()?;
        let mut hits: Vec<RemoteHit> = lock(&self.points)
            .values()
            .map(|point| RemoteHit {
                chunk: point.chunk.clone(),
                score: cosine_similarity(vector, &point.vector),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.fingerprint.cmp(&b.chunk.fingerprint))
        });
        hits.truncate(k);
        Ok(hits)
    }
}
