//! Load coordinator.
//!
//! Owns the load target and a generation counter. Every `request_load`
//! supersedes the previous target by bumping the generation; in-flight
//! decodes are never cancelled, they still land in the cache (subject to
//! the slot stamps) and their completion events are dropped by whoever
//! checks `is_current`.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use super::factory::ImageFactory;
use super::task::{self, LoadJob, LoadKind, LoadTarget};
use crate::cache::{ImageCache, SlotWrite};
use crate::config::LoaderConfig;
use crate::context::ContextId;
use crate::error::{LoadError, Result};
use crate::events::{self, Event, EventReceiver, EventSender};
use crate::image::ImageHandle;

/// Upper bound on load worker threads.
const MAX_LOAD_WORKERS: usize = 4;

#[derive(Debug, Default)]
struct TargetState {
    generation: u64,
    target: Option<LoadTarget>,
}

pub struct LoadCoordinator {
    cache: Arc<ImageCache>,
    factory: Arc<dyn ImageFactory>,
    owner: ContextId,
    state: Mutex<TargetState>,
    job_tx: Option<Sender<LoadJob>>,
    workers: Vec<JoinHandle<()>>,
    events_tx: EventSender,
    events_rx: EventReceiver,
}

impl LoadCoordinator {
    pub fn new(
        cache: Arc<ImageCache>,
        factory: Arc<dyn ImageFactory>,
        owner: ContextId,
        config: &LoaderConfig,
    ) -> Self {
        let (events_tx, events_rx) = events::channel();
        Self::with_events(cache, factory, owner, config, events_tx, events_rx)
    }

    /// Share an existing event queue (e.g. with the thumbnail pool).
    pub fn with_events(
        cache: Arc<ImageCache>,
        factory: Arc<dyn ImageFactory>,
        owner: ContextId,
        config: &LoaderConfig,
        events_tx: EventSender,
        events_rx: EventReceiver,
    ) -> Self {
        let num_workers = config.load_workers.clamp(1, MAX_LOAD_WORKERS);
        let (job_tx, job_rx) = flume::unbounded::<LoadJob>();

        let mut workers = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let rx = job_rx.clone();
            let tx = events_tx.clone();
            let factory = Arc::clone(&factory);

            let spawned = thread::Builder::new()
                .name(format!("load-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, rx, tx, factory, owner));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => error!(worker_id, error = ?e, "Failed to spawn load worker"),
            }
        }

        debug!(num_workers = workers.len(), "Started load workers");

        Self {
            cache,
            factory,
            owner,
            state: Mutex::new(TargetState::default()),
            job_tx: Some(job_tx),
            workers,
            events_tx,
            events_rx,
        }
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    pub fn owner(&self) -> ContextId {
        self.owner
    }

    pub fn events(&self) -> EventReceiver {
        self.events_rx.clone()
    }

    pub fn event_sender(&self) -> EventSender {
        self.events_tx.clone()
    }

    /// Make `index`/`path` the load target and dispatch a load for it.
    /// Never blocks on earlier loads. Returns the request generation.
    pub fn request_load(&self, index: usize, path: impl Into<PathBuf>) -> Result<u64> {
        let (target, slot) = self.supersede(index, path.into())?;
        let generation = target.generation;
        debug!(index, generation, path = ?target.path, "Load requested");

        self.dispatch(LoadJob {
            target,
            kind: LoadKind::Request,
            slot,
        })?;
        Ok(generation)
    }

    /// Warm `index` in the background without moving the target. Skipped
    /// when the slot already holds `path` or has a load in flight.
    pub fn prefetch(&self, index: usize, path: impl Into<PathBuf>) -> Result<bool> {
        let path = path.into();
        if self.cache.holds(index, &path)? || self.cache.is_pending(index)? {
            trace!(index, "Prefetch not needed");
            return Ok(false);
        }

        let generation = self.state.lock().generation;
        let slot = self.cache.reserve(index, generation, &path)?;
        self.dispatch(LoadJob {
            target: LoadTarget {
                index,
                path,
                generation,
            },
            kind: LoadKind::Prefetch,
            slot,
        })?;
        trace!(index, "Prefetch dispatched");
        Ok(true)
    }

    /// Load on the calling thread and wait. Meant for the first open, before
    /// there is anything on screen to give feedback.
    pub fn load_blocking(&self, index: usize, path: impl Into<PathBuf>) -> Result<ImageHandle> {
        let (target, slot) = self.supersede(index, path.into())?;
        debug!(index, generation = target.generation, "Blocking load");

        task::execute(&target, slot, self.factory.as_ref(), self.owner)?;
        self.cache.image(index)?.ok_or(LoadError::Decode {
            path: target.path,
            message: "slot was invalidated during load".to_string(),
        })
    }

    /// Install a collection of `len` sources. Everything in flight for the
    /// old collection becomes stale.
    pub fn set_collection(&self, len: usize) {
        {
            let mut state = self.state.lock();
            state.generation += 1;
            state.target = None;
            self.cache.reset(len, state.generation);
        }
        if self.events_tx.try_send(Event::CollectionChanged { len }).is_err() {
            warn!("Event queue closed, dropping collection change");
        }
    }

    pub fn current_target(&self) -> Option<LoadTarget> {
        self.state.lock().target.clone()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.state.lock().target.as_ref().map(|t| t.index)
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Relevance check: results from any other generation are stale.
    pub fn is_current(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.target.is_some() && state.generation == generation
    }

    /// Whether an event should be acted on. Only load results can go stale.
    pub fn is_relevant(&self, event: &Event) -> bool {
        match event {
            Event::LoadCompleted { generation, .. } | Event::LoadFailed { generation, .. } => {
                self.is_current(*generation)
            }
            _ => true,
        }
    }

    fn supersede(&self, index: usize, path: PathBuf) -> Result<(LoadTarget, SlotWrite)> {
        let mut state = self.state.lock();
        let generation = state.generation + 1;
        // reserve first so a bad index leaves the target untouched
        let slot = self.cache.reserve(index, generation, &path)?;
        state.generation = generation;
        let target = LoadTarget {
            index,
            path,
            generation,
        };
        state.target = Some(target.clone());
        Ok((target, slot))
    }

    fn dispatch(&self, job: LoadJob) -> Result<()> {
        let tx = self.job_tx.as_ref().ok_or(LoadError::Disconnected)?;
        tx.send(job).map_err(|_| LoadError::Disconnected)
    }

    /// Stop accepting work and join the workers once the queue drains.
    pub fn shutdown(&mut self) {
        if self.job_tx.take().is_none() {
            return;
        }
        debug!("Shutting down load workers");
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for LoadCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    worker_id: usize,
    rx: Receiver<LoadJob>,
    tx: EventSender,
    factory: Arc<dyn ImageFactory>,
    owner: ContextId,
) {
    debug!(worker_id, "Load worker started");

    while let Ok(job) = rx.recv() {
        let event = task::run(job, factory.as_ref(), owner);
        if tx.send_blocking(event).is_err() {
            warn!(worker_id, "Event queue closed");
            break;
        }
    }

    debug!(worker_id, "Load worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{collect_events, MockFactory};
    use std::path::Path;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn coordinator(len: usize, factory: MockFactory) -> (LoadCoordinator, Arc<MockFactory>) {
        let factory = Arc::new(factory);
        let cache = Arc::new(ImageCache::new(len));
        let config = LoaderConfig::default().load_workers(4);
        let coordinator =
            LoadCoordinator::new(cache, factory.clone(), ContextId::current(), &config);
        (coordinator, factory)
    }

    #[test]
    fn test_request_returns_immediately() {
        let (loader, _) = coordinator(3, MockFactory::new().with_delay("/slow.png", 300));
        let started = std::time::Instant::now();
        let generation = loader.request_load(0, "/slow.png").unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(loader.current_index(), Some(0));
        assert!(loader.is_current(generation));

        let events = collect_events(&loader.events(), 1, WAIT);
        assert!(matches!(events[0], Event::LoadCompleted { index: 0, .. }));
    }

    #[test]
    fn test_newer_request_supersedes() {
        let (loader, _) = coordinator(5, MockFactory::new());
        let g1 = loader.request_load(1, "/a.png").unwrap();
        let g2 = loader.request_load(2, "/b.png").unwrap();
        assert!(g2 > g1);
        assert!(!loader.is_current(g1));
        assert!(loader.is_current(g2));
        assert_eq!(
            loader.current_target(),
            Some(LoadTarget {
                index: 2,
                path: PathBuf::from("/b.png"),
                generation: g2
            })
        );
    }

    #[test]
    fn test_same_slot_latest_source_wins() {
        let factory = MockFactory::new()
            .with_delay("/A.png", 250)
            .with_delay("/B.png", 10);
        let (loader, _) = coordinator(6, factory);
        loader.request_load(5, "/A.png").unwrap();
        let g2 = loader.request_load(5, "/B.png").unwrap();

        let events = collect_events(&loader.events(), 2, WAIT);
        let relevant: Vec<_> = events.iter().filter(|e| loader.is_relevant(e)).collect();
        assert_eq!(relevant.len(), 1);
        assert!(matches!(relevant[0], Event::LoadCompleted { index: 5, generation } if *generation == g2));
        assert!(loader.cache().holds(5, Path::new("/B.png")).unwrap());
    }

    #[test]
    fn test_failure_does_not_stall_pipeline() {
        let (loader, _) = coordinator(6, MockFactory::new().with_failure("/broken.png"));
        let g3 = loader.request_load(3, "/broken.png").unwrap();
        let events = collect_events(&loader.events(), 1, WAIT);
        assert!(matches!(&events[0], Event::LoadFailed { index: 3, generation, .. } if *generation == g3));

        let g4 = loader.request_load(4, "/ok.png").unwrap();
        let events = collect_events(&loader.events(), 1, WAIT);
        assert!(matches!(&events[0], Event::LoadCompleted { index: 4, generation } if *generation == g4));
        assert!(loader.cache().is_loaded(4).unwrap());
        assert!(!loader.cache().is_loaded(3).unwrap());
    }

    #[test]
    fn test_concurrent_requests_populate_both_slots() {
        let factory = MockFactory::new()
            .with_delay("/two.png", 100)
            .with_delay("/seven.png", 100);
        let (loader, _) = coordinator(8, factory);
        loader.request_load(2, "/two.png").unwrap();
        loader.request_load(7, "/seven.png").unwrap();

        collect_events(&loader.events(), 2, WAIT);
        assert!(loader.cache().is_loaded(2).unwrap());
        assert!(loader.cache().is_loaded(7).unwrap());
    }

    #[test]
    fn test_revisit_uses_fast_path() {
        let (loader, factory) = coordinator(3, MockFactory::new());
        loader.request_load(0, "/a.png").unwrap();
        collect_events(&loader.events(), 1, WAIT);
        loader.request_load(1, "/b.png").unwrap();
        collect_events(&loader.events(), 1, WAIT);
        let g = loader.request_load(0, "/a.png").unwrap();
        let events = collect_events(&loader.events(), 1, WAIT);

        // re-requesting the same index yields a fresh, current completion
        assert!(matches!(events[0], Event::LoadCompleted { index: 0, generation } if generation == g));
        assert!(loader.is_relevant(&events[0]));
        assert_eq!(factory.decodes(Path::new("/a.png")), 1);
    }

    #[test]
    fn test_out_of_range_request_keeps_target() {
        let (loader, _) = coordinator(2, MockFactory::new());
        let g = loader.request_load(1, "/a.png").unwrap();
        assert!(matches!(
            loader.request_load(9, "/x.png"),
            Err(LoadError::IndexOutOfRange { index: 9, len: 2 })
        ));
        assert!(loader.is_current(g));
    }

    #[test]
    fn test_prefetch_does_not_move_target() {
        let (loader, factory) = coordinator(4, MockFactory::new());
        let g = loader.request_load(1, "/b.png").unwrap();
        assert!(loader.prefetch(2, "/c.png").unwrap());

        let events = collect_events(&loader.events(), 2, WAIT);
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::Prefetched { index: 2, error: None })));
        assert!(loader.is_current(g));
        assert!(!loader.prefetch(2, "/c.png").unwrap());
        assert_eq!(factory.decodes(Path::new("/c.png")), 1);
    }

    #[test]
    fn test_navigating_onto_prefetch_decodes_once() {
        let (loader, factory) = coordinator(3, MockFactory::new().with_delay("/b.png", 200));
        assert!(loader.prefetch(1, "/b.png").unwrap());
        std::thread::sleep(Duration::from_millis(30));
        let g = loader.request_load(1, "/b.png").unwrap();

        let events = collect_events(&loader.events(), 2, WAIT);
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::Prefetched { index: 1, error: None })));
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::LoadCompleted { index: 1, generation } if *generation == g)));
        assert_eq!(factory.decodes(Path::new("/b.png")), 1);
        assert!(loader.cache().holds(1, Path::new("/b.png")).unwrap());
    }

    #[test]
    fn test_load_blocking() {
        let (loader, _) = coordinator(2, MockFactory::new());
        let handle = loader.load_blocking(1, "/first.png").unwrap();
        assert_eq!(handle.path(), Path::new("/first.png"));
        assert_eq!(handle.owner(), ContextId::current());
        assert_eq!(loader.current_index(), Some(1));

        let broken = MockFactory::new().with_failure("/bad.png");
        let (loader, _) = coordinator(1, broken);
        assert!(loader.load_blocking(0, "/bad.png").is_err());
    }

    #[test]
    fn test_collection_change_drops_in_flight_results() {
        let (loader, _) = coordinator(3, MockFactory::new().with_delay("/old.png", 200));
        let g = loader.request_load(0, "/old.png").unwrap();
        loader.set_collection(5);
        assert!(!loader.is_current(g));
        assert_eq!(loader.current_target(), None);

        let events = collect_events(&loader.events(), 2, WAIT);
        assert!(matches!(events[0], Event::CollectionChanged { len: 5 }));
        assert!(!loader.is_relevant(&events[1]));
        assert_eq!(loader.cache().len(), 5);
        assert!(!loader.cache().is_loaded(0).unwrap());
    }

    #[test]
    fn test_rapid_navigation_settles_on_last() {
        let mut factory = MockFactory::new();
        for i in 0..6 {
            // earlier requests are slower so completions arrive out of order
            factory = factory.with_delay(&format!("/{}.png", i), 30 * (6 - i as u64));
        }
        let (loader, _) = coordinator(6, factory);
        let mut last = 0;
        for i in 0..6 {
            last = loader.request_load(i, format!("/{}.png", i)).unwrap();
        }

        let events = collect_events(&loader.events(), 6, WAIT);
        let relevant: Vec<_> = events.iter().filter(|e| loader.is_relevant(e)).collect();
        assert_eq!(relevant.len(), 1);
        assert!(matches!(relevant[0], Event::LoadCompleted { index: 5, generation } if *generation == last));
        assert!(loader.cache().holds(5, Path::new("/5.png")).unwrap());
        // superseded loads still warmed their slots
        assert_eq!(loader.cache().loaded_count(), 6);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (mut loader, _) = coordinator(1, MockFactory::new());
        loader.shutdown();
        loader.shutdown();
        assert!(matches!(
            loader.request_load(0, "/a.png"),
            Err(LoadError::Disconnected)
        ));
    }
}
