//! Failure injection for archive calls.

use crate::seed::SimSeed;
use async_trait::async_trait;
use racelog_core::{CarData, CoreError, CoreResult, EventDescriptor, EventId, Frame, SpeedmapRecord};
use racelog_replay::ArchiveService;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Archive wrapper that fails selected `fetch_frames` calls.
///
/// Calls are numbered from 1 across all sources. Event listing and the
/// speedmap and car data side channels are passed through untouched.
pub struct FlakyArchive {
    inner: Arc<dyn ArchiveService>,
    failing_calls: BTreeSet<usize>,
    failing_sources: HashSet<EventId>,
    random: Option<(f64, Mutex<ChaCha8Rng>)>,
    calls: AtomicUsize,
    injected: AtomicUsize,
}

impl FlakyArchive {
    /// Wrap an archive without injecting anything
    #[must_use]
    pub fn new(inner: Arc<dyn ArchiveService>) -> Self {
        Self {
            inner,
            failing_calls: BTreeSet::new(),
            failing_sources: HashSet::new(),
            random: None,
            calls: AtomicUsize::new(0),
            injected: AtomicUsize::new(0),
        }
    }

    /// Fail the given call numbers
    #[must_use]
    pub fn failing_calls(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.failing_calls.extend(calls);
        self
    }

    /// Fail every call for `source`
    #[must_use]
    pub fn failing_source(mut self, source: EventId) -> Self {
        self.failing_sources.insert(source);
        self
    }

    /// Fail each call with `probability`, drawn from `seed`
    #[must_use]
    pub fn with_failure_rate(mut self, seed: &SimSeed, probability: f64) -> Self {
        self.random = Some((probability, Mutex::new(seed.rng())));
        self
    }

    /// `fetch_frames` calls seen so far
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Failures injected so far
    #[must_use]
    pub fn injected(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    fn should_fail(&self, call: usize, source: EventId) -> bool {
        if self.failing_calls.contains(&call) || self.failing_sources.contains(&source) {
            return true;
        }
        match &self.random {
            Some((probability, rng)) => {
                let mut rng = rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                rng.r#gen::<f64>() < *probability
            }
            None => false,
        }
    }
}

#[async_trait]
impl ArchiveService for FlakyArchive {
    async fn fetch_frames(
        &self,
        source: EventId,
        from: f64,
        max_count: usize,
    ) -> CoreResult<Vec<Frame>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.should_fail(call, source) {
            self.injected.fetch_add(1, Ordering::SeqCst);
            debug!(call, source = %source, "injected archive failure");
            return Err(CoreError::Archive {
                source_id: source.as_i64(),
                reason: format!("injected failure on call {}", call),
            });
        }
        self.inner.fetch_frames(source, from, max_count).await
    }

    async fn list_events(&self) -> CoreResult<Vec<EventDescriptor>> {
        self.inner.list_events().await
    }

    async fn fetch_speedmaps(
        &self,
        source: EventId,
        from: f64,
        max_count: usize,
    ) -> CoreResult<Vec<SpeedmapRecord>> {
        self.inner.fetch_speedmaps(source, from, max_count).await
    }

    async fn fetch_car_data(&self, source: EventId) -> CoreResult<Option<CarData>> {
        self.inner.fetch_car_data(source).await
    }
}

impl std::fmt::Debug for FlakyArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyArchive")
            .field("failing_calls", &self.failing_calls)
            .field("failing_sources", &self.failing_sources)
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}
