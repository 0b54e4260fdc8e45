//! Fan-out worker pool for thumbnail generation.
//!
//! - Pool sized from available parallelism, several decodes in flight
//! - Requests are keyed by slot index and deduplicated while pending
//! - Results go out on the shared event queue as `ThumbnailReady` or
//!   `ThumbnailFailed`, never through the image cache

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, Sender};
use parking_lot::RwLock;
use tracing::{debug, error, trace, warn};

use super::cache::ThumbnailCache;
use crate::config::LoaderConfig;
use crate::events::{Event, EventSender};
use crate::loader::ImageFactory;

/// Upper bound on worker threads.
const MAX_WORKERS: usize = 8;

/// How long an idle worker waits before re-checking the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailRequest {
    pub index: usize,
    pub path: PathBuf,
    pub squared: bool,
}

impl ThumbnailRequest {
    pub fn new(index: usize, path: impl Into<PathBuf>, squared: bool) -> Self {
        Self {
            index,
            path: path.into(),
            squared,
        }
    }
}

struct Job {
    request: ThumbnailRequest,
    epoch: u64,
}

/// State shared between the pool handle and its workers.
struct Shared {
    pending: RwLock<HashSet<usize>>,
    epoch: AtomicU64,
    shutdown: AtomicBool,
    active: AtomicUsize,
}

impl Shared {
    /// Drop `index` from the pending set unless a cancel happened since `epoch`.
    /// Returns whether the job is still current.
    fn finish(&self, index: usize, epoch: u64) -> bool {
        let mut pending = self.pending.write();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }
        pending.remove(&index);
        true
    }
}

pub struct ThumbnailPool {
    request_tx: Sender<Job>,
    /// Kept to drain queued jobs on cancel.
    request_rx: Receiver<Job>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
    cache: ThumbnailCache,
}

impl ThumbnailPool {
    pub fn new(
        factory: Arc<dyn ImageFactory>,
        cache: ThumbnailCache,
        config: &LoaderConfig,
        events: EventSender,
    ) -> Self {
        let num_workers = config
            .thumbnail_workers
            .unwrap_or_else(|| {
                thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(2)
            })
            .clamp(1, MAX_WORKERS);

        let (request_tx, request_rx) = flume::unbounded();
        let shared = Arc::new(Shared {
            pending: RwLock::new(HashSet::new()),
            epoch: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            active: AtomicUsize::new(0),
        });

        let mut workers = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let rx = request_rx.clone();
            let events = events.clone();
            let shared = Arc::clone(&shared);
            let cache = cache.clone();
            let factory = Arc::clone(&factory);

            let spawned = thread::Builder::new()
                .name(format!("thumb-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, rx, events, shared, cache, factory));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => error!(worker_id, error = ?e, "Failed to spawn thumbnail worker"),
            }
        }

        debug!(num_workers = workers.len(), "Started thumbnail worker pool");

        Self {
            request_tx,
            request_rx,
            workers,
            shared,
            cache,
        }
    }

    /// Queue a thumbnail for `index`.
    ///
    /// Returns false if the index already has a pending request or the pool
    /// is shut down.
    pub fn request(&self, index: usize, path: impl Into<PathBuf>, squared: bool) -> bool {
        self.submit(ThumbnailRequest::new(index, path, squared))
    }

    pub fn submit(&self, req: ThumbnailRequest) -> bool {
        if self.shared.shutdown.load(Ordering::Relaxed) {
            return false;
        }

        let epoch = {
            let mut pending = self.shared.pending.write();
            if !pending.insert(req.index) {
                trace!(index = req.index, "Request already pending");
                return false;
            }
            self.shared.epoch.load(Ordering::SeqCst)
        };

        let index = req.index;
        match self.request_tx.send(Job {
            request: req,
            epoch,
        }) {
            Ok(()) => true,
            Err(_) => {
                error!("Thumbnail queue disconnected");
                self.shared.pending.write().remove(&index);
                false
            }
        }
    }

    /// Queue several requests, returning how many were accepted.
    pub fn request_batch(&self, requests: impl IntoIterator<Item = ThumbnailRequest>) -> usize {
        requests
            .into_iter()
            .map(|req| self.submit(req))
            .filter(|&accepted| accepted)
            .count()
    }

    pub fn cache(&self) -> &ThumbnailCache {
        &self.cache
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.read().len()
    }

    pub fn active_worker_count(&self) -> usize {
        self.shared.active.load(Ordering::Relaxed)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn is_busy(&self) -> bool {
        !self.shared.pending.read().is_empty() || self.active_worker_count() > 0
    }

    /// Drop queued requests and discard results of jobs already running.
    ///
    /// Cancelled requests produce no event. Indices become requestable again
    /// immediately.
    pub fn cancel_all(&self) {
        let mut pending = self.shared.pending.write();
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        let drained = self.request_rx.drain().count();
        pending.clear();
        debug!(drained, "Cancelled pending thumbnail requests");
    }

    pub fn shutdown(&mut self) {
        debug!("Shutting down thumbnail pool");
        self.shared.shutdown.store(true, Ordering::SeqCst);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        debug!("Thumbnail pool shutdown complete");
    }
}

impl Drop for ThumbnailPool {
    fn drop(&mut self) {
        if !self.shared.shutdown.load(Ordering::Relaxed) {
            self.shutdown();
        }
    }
}

fn worker_loop(
    worker_id: usize,
    rx: Receiver<Job>,
    events: EventSender,
    shared: Arc<Shared>,
    cache: ThumbnailCache,
    factory: Arc<dyn ImageFactory>,
) {
    debug!(worker_id, "Thumbnail worker started");

    loop {
        if shared.shutdown.load(Ordering::Relaxed) {
            break;
        }

        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(job) => {
                if shared.epoch.load(Ordering::SeqCst) != job.epoch {
                    continue;
                }
                shared.active.fetch_add(1, Ordering::Relaxed);
                let event = process_request(&job.request, &cache, factory.as_ref());
                let current = shared.finish(job.request.index, job.epoch);
                shared.active.fetch_sub(1, Ordering::Relaxed);

                if !current {
                    trace!(index = job.request.index, "Dropping cancelled thumbnail");
                    continue;
                }
                if let Err(e) = events.send_blocking(event) {
                    warn!(worker_id, error = ?e, "Failed to send thumbnail result");
                }
            }
            Err(flume::RecvTimeoutError::Timeout) => continue,
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(worker_id, "Thumbnail worker stopped");
}

fn process_request(
    req: &ThumbnailRequest,
    cache: &ThumbnailCache,
    factory: &dyn ImageFactory,
) -> Event {
    trace!(index = req.index, ?req.path, "Processing thumbnail request");

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        cache.get_or_generate(factory, &req.path, req.squared)
    }));
    match result {
        Ok(Ok(thumbnail)) => Event::ThumbnailReady {
            index: req.index,
            thumbnail,
        },
        Ok(Err(e)) => {
            warn!(?req.path, error = %e, "Failed to generate thumbnail");
            Event::ThumbnailFailed {
                index: req.index,
                error: e.to_string(),
            }
        }
        Err(_) => {
            warn!(?req.path, "Thumbnail decoder panicked");
            Event::ThumbnailFailed {
                index: req.index,
                error: "decoder panicked".to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::testing::{collect_events, MockFactory};
    use std::collections::HashMap;

    fn pool_with(factory: MockFactory, workers: usize) -> (ThumbnailPool, events::EventReceiver) {
        let (tx, rx) = events::channel();
        let config = LoaderConfig::default().thumbnail_workers(workers).thumbnail_size(2);
        let cache = ThumbnailCache::in_memory(4, config.thumbnail_size);
        let pool = ThumbnailPool::new(Arc::new(factory), cache, &config, tx);
        (pool, rx)
    }

    #[test]
    fn test_worker_count_is_clamped() {
        let (pool, _rx) = pool_with(MockFactory::new(), 64);
        assert_eq!(pool.worker_count(), MAX_WORKERS);
    }

    #[test]
    fn test_each_index_delivers_once() {
        let factory = MockFactory::new().with_failure("/src/3.png");
        let (pool, rx) = pool_with(factory, 4);

        let n = 10;
        let accepted = pool.request_batch(
            (0..n).map(|i| ThumbnailRequest::new(i, format!("/src/{}.png", i), true)),
        );
        assert_eq!(accepted, n);

        let events = collect_events(&rx, n, Duration::from_secs(5));
        let mut seen: HashMap<usize, usize> = HashMap::new();
        for event in &events {
            match event {
                Event::ThumbnailReady { index, thumbnail } => {
                    assert!(thumbnail.squared);
                    *seen.entry(*index).or_default() += 1;
                }
                Event::ThumbnailFailed { index, .. } => {
                    assert_eq!(*index, 3);
                    *seen.entry(*index).or_default() += 1;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(seen.len(), n);
        assert!(seen.values().all(|&count| count == 1));

        std::thread::sleep(Duration::from_millis(100));
        assert!(rx.try_recv().is_err());
        assert_eq!(pool.pending_count(), 0);
    }

    #[test]
    fn test_duplicate_index_is_rejected_while_pending() {
        let factory = MockFactory::new().with_delay("/slow.png", 200);
        let (pool, rx) = pool_with(factory, 1);

        assert!(pool.request(0, "/slow.png", false));
        assert!(!pool.request(0, "/slow.png", false));
        assert!(pool.is_busy());

        collect_events(&rx, 1, Duration::from_secs(5));
        std::thread::sleep(Duration::from_millis(50));
        assert!(pool.request(0, "/slow.png", false));
    }

    #[test]
    fn test_cancel_all_suppresses_results() {
        let factory = MockFactory::new().with_delay("/slow.png", 150);
        let (pool, rx) = pool_with(factory, 1);

        pool.request(0, "/slow.png", false);
        for i in 1..5 {
            pool.request(i, format!("/queued/{}.png", i), false);
        }
        // let the single worker pick up the slow job
        std::thread::sleep(Duration::from_millis(30));
        pool.cancel_all();
        assert_eq!(pool.pending_count(), 0);

        std::thread::sleep(Duration::from_millis(300));
        assert!(rx.try_recv().is_err());

        assert!(pool.request(7, "/after.png", false));
        let events = collect_events(&rx, 1, Duration::from_secs(5));
        assert_eq!(events[0].index(), Some(7));
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let (mut pool, _rx) = pool_with(MockFactory::new(), 2);
        pool.shutdown();
        assert!(!pool.request(0, "/a.png", false));
    }
}
