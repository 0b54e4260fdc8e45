//! The owning-context side of the loader.
//!
//! `ViewSession` lives on the thread that paints. It turns navigation into
//! load requests, applies the relevance check to every event coming back
//! from the workers, and is the only place surfaces are built.

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::cache::ImageCache;
use crate::config::LoaderConfig;
use crate::context::{OwnerContext, Surface};
use crate::error::{LoadError, Result};
use crate::events::{self, Event, EventReceiver};
use crate::image::ImageHandle;
use crate::loader::{ImageFactory, LoadCoordinator};
use crate::models::SourceCollection;
use crate::thumbnails::{Thumbnail, ThumbnailCache, ThumbnailPool, ThumbnailRequest};

/// What changed on screen after handling an event.
#[derive(Debug, Clone)]
pub enum ViewUpdate {
    Displayed {
        index: usize,
        dimensions: (u32, u32),
        animated: bool,
    },
    /// The current request failed; the previous image stays displayed.
    LoadFailed { index: usize, error: String },
    FrameAdvanced { index: usize },
    Thumbnail { index: usize, thumbnail: Thumbnail },
    ThumbnailFailed { index: usize, error: String },
    CollectionChanged { len: usize },
}

struct Displayed {
    index: usize,
    handle: ImageHandle,
    surface: Surface,
}

pub struct ViewSession {
    owner: OwnerContext,
    config: LoaderConfig,
    collection: SourceCollection,
    loader: LoadCoordinator,
    thumbnails: ThumbnailPool,
    events: EventReceiver,
    displayed: Option<Displayed>,
}

impl ViewSession {
    /// Claims the calling thread as the owning context.
    pub fn new(factory: Arc<dyn ImageFactory>, config: LoaderConfig) -> Self {
        let owner = OwnerContext::current();
        let (events_tx, events_rx) = events::channel();

        let loader = LoadCoordinator::with_events(
            Arc::new(ImageCache::new(0)),
            Arc::clone(&factory),
            owner.id(),
            &config,
            events_tx.clone(),
            events_rx.clone(),
        );
        let thumb_cache = ThumbnailCache::new(
            config.thumbnail_cache_dir.clone(),
            config.thumbnail_memory_mb,
            config.thumbnail_size,
        );
        let thumbnails = ThumbnailPool::new(factory, thumb_cache, &config, events_tx);

        Self {
            owner,
            config,
            collection: SourceCollection::from_paths(Vec::new()),
            loader,
            thumbnails,
            events: events_rx,
            displayed: None,
        }
    }

    /// Open `path` together with the rest of its directory.
    pub fn open(&mut self, path: &Path) -> anyhow::Result<ViewUpdate> {
        let (collection, index) = SourceCollection::for_file(path)?;
        Ok(self.open_collection(collection, index)?)
    }

    /// Replace the collection and load `start` on the calling thread.
    pub fn open_collection(
        &mut self,
        collection: SourceCollection,
        start: usize,
    ) -> Result<ViewUpdate> {
        let len = collection.len();
        let path = collection
            .path(start)
            .map(Path::to_path_buf)
            .ok_or(LoadError::IndexOutOfRange { index: start, len })?;

        self.stop_playback();
        self.displayed = None;
        self.thumbnails.cancel_all();
        self.loader.set_collection(len);
        self.collection = collection;
        debug!(len, start, "Opened collection");

        let handle = self.loader.load_blocking(start, path)?;
        self.show(start, handle)
    }

    /// Request `index` for display. The result arrives as an event.
    pub fn go_to(&mut self, index: usize) -> Result<u64> {
        let path = self
            .collection
            .path(index)
            .ok_or(LoadError::IndexOutOfRange {
                index,
                len: self.collection.len(),
            })?
            .to_path_buf();
        let generation = self.loader.request_load(index, path)?;
        self.loader
            .cache()
            .trim(index, self.config.effective_cache_radius());
        Ok(generation)
    }

    /// Advance, wrapping at the end. `None` for an empty collection.
    pub fn next(&mut self) -> Result<Option<u64>> {
        let target = match self.current_index() {
            Some(i) => self.collection.next_index(i),
            None => (!self.collection.is_empty()).then_some(0),
        };
        target.map(|i| self.go_to(i)).transpose()
    }

    /// Step back, wrapping at the start.
    pub fn prev(&mut self) -> Result<Option<u64>> {
        let target = match self.current_index() {
            Some(i) => self.collection.prev_index(i),
            None => (!self.collection.is_empty()).then_some(0),
        };
        target.map(|i| self.go_to(i)).transpose()
    }

    /// Rotate the displayed image and rebuild its surface.
    pub fn rotate(&mut self, degrees: i32) -> Result<Option<ViewUpdate>> {
        let Some(displayed) = self.displayed.as_mut() else {
            return Ok(None);
        };
        displayed.handle.image().rotate(degrees);
        displayed.surface = self.owner.surface(&displayed.handle)?;
        Ok(Some(ViewUpdate::Displayed {
            index: displayed.index,
            dimensions: displayed.surface.dimensions(),
            animated: displayed.handle.is_animated(),
        }))
    }

    /// Queue thumbnails for every index of `range` inside the collection.
    pub fn request_thumbnails(&self, range: Range<usize>, squared: bool) -> usize {
        let end = range.end.min(self.collection.len());
        let requests = (range.start..end).filter_map(|index| {
            self.collection
                .path(index)
                .map(|path| ThumbnailRequest::new(index, path, squared))
        });
        self.thumbnails.request_batch(requests)
    }

    pub fn cancel_thumbnails(&self) {
        self.thumbnails.cancel_all();
    }

    /// Handle everything already queued without waiting.
    pub fn process_events(&mut self) -> Vec<ViewUpdate> {
        let mut updates = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            updates.extend(self.handle_event(event));
        }
        updates
    }

    /// Wait for the next event that changes something.
    pub async fn next_update(&mut self) -> Option<ViewUpdate> {
        loop {
            let event = self.events.recv().await.ok()?;
            if let Some(update) = self.handle_event(event) {
                return Some(update);
            }
        }
    }

    pub fn handle_event(&mut self, event: Event) -> Option<ViewUpdate> {
        if !self.loader.is_relevant(&event) {
            trace!(index = ?event.index(), "Ignoring stale load result");
            return None;
        }

        match event {
            Event::CollectionChanged { len } => Some(ViewUpdate::CollectionChanged { len }),
            Event::LoadCompleted { index, .. } => {
                let handle = match self.loader.cache().image(index) {
                    Ok(Some(handle)) => handle,
                    Ok(None) => {
                        warn!(index, "Completed slot is empty");
                        return None;
                    }
                    Err(e) => {
                        warn!(index, error = %e, "Completed slot is gone");
                        return None;
                    }
                };
                match self.show(index, handle) {
                    Ok(update) => Some(update),
                    Err(e) => {
                        warn!(index, error = %e, "Failed to display image");
                        None
                    }
                }
            }
            Event::LoadFailed { index, error, .. } => {
                debug!(index, %error, "Keeping previous image after failed load");
                Some(ViewUpdate::LoadFailed { index, error })
            }
            Event::Prefetched { index, error } => {
                if let Some(error) = error {
                    debug!(index, %error, "Neighbour failed to prefetch");
                }
                None
            }
            Event::ThumbnailReady { index, thumbnail } => {
                Some(ViewUpdate::Thumbnail { index, thumbnail })
            }
            Event::ThumbnailFailed { index, error } => {
                Some(ViewUpdate::ThumbnailFailed { index, error })
            }
            Event::FrameChanged { index, frame } => {
                let displayed = self.displayed.as_mut()?;
                let playing = displayed
                    .handle
                    .as_animated()
                    .is_some_and(|a| a.is_playing());
                if displayed.index != index || !playing {
                    return None;
                }
                match self.owner.surface_for_frame(frame) {
                    Ok(surface) => {
                        displayed.surface = surface;
                        Some(ViewUpdate::FrameAdvanced { index })
                    }
                    Err(e) => {
                        warn!(index, error = %e, "Dropping frame");
                        None
                    }
                }
            }
        }
    }

    fn show(&mut self, index: usize, handle: ImageHandle) -> Result<ViewUpdate> {
        self.stop_playback();
        let surface = self.owner.surface(&handle)?;
        let animated = handle.is_animated();
        if let Some(animation) = handle.as_animated() {
            animation.start_animation(index, self.loader.event_sender());
        }
        let dimensions = surface.dimensions();
        debug!(index, ?dimensions, animated, "Displaying image");

        self.displayed = Some(Displayed {
            index,
            handle,
            surface,
        });
        self.loader
            .cache()
            .trim(index, self.config.effective_cache_radius());
        self.prefetch_around(index);

        Ok(ViewUpdate::Displayed {
            index,
            dimensions,
            animated,
        })
    }

    fn prefetch_around(&self, index: usize) {
        let len = self.collection.len();
        for distance in 1..=self.config.preload_radius {
            let neighbours = [index.checked_sub(distance), index.checked_add(distance)];
            for neighbour in neighbours.into_iter().flatten().filter(|&n| n < len) {
                let Some(path) = self.collection.path(neighbour) else {
                    continue;
                };
                if let Err(e) = self.loader.prefetch(neighbour, path) {
                    warn!(index = neighbour, error = %e, "Failed to dispatch prefetch");
                }
            }
        }
    }

    fn stop_playback(&self) {
        if let Some(animation) = self.displayed.as_ref().and_then(|d| d.handle.as_animated()) {
            animation.stop_animation();
        }
    }

    pub fn collection(&self) -> &SourceCollection {
        &self.collection
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        self.loader.cache()
    }

    pub fn loader(&self) -> &LoadCoordinator {
        &self.loader
    }

    pub fn thumbnails(&self) -> &ThumbnailPool {
        &self.thumbnails
    }

    /// Index of the latest request, falling back to what is on screen.
    pub fn current_index(&self) -> Option<usize> {
        self.loader
            .current_index()
            .or_else(|| self.displayed_index())
    }

    pub fn displayed_index(&self) -> Option<usize> {
        self.displayed.as_ref().map(|d| d.index)
    }

    pub fn displayed_image(&self) -> Option<&ImageHandle> {
        self.displayed.as_ref().map(|d| &d.handle)
    }

    pub fn surface(&self) -> Option<&Surface> {
        self.displayed.as_ref().map(|d| &d.surface)
    }
}

impl Drop for ViewSession {
    fn drop(&mut self) {
        self.stop_playback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::DefaultFactory;
    use crate::testing::{write_gif, write_png, MockFactory};
    use std::path::PathBuf;
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    const WAIT: Duration = Duration::from_secs(5);

    fn session(factory: MockFactory) -> ViewSession {
        let config = LoaderConfig::default()
            .load_workers(4)
            .thumbnail_workers(2)
            .thumbnail_size(2);
        ViewSession::new(Arc::new(factory), config)
    }

    fn numbered(prefix: &str, n: usize) -> SourceCollection {
        SourceCollection::from_paths(
            (0..n)
                .map(|i| PathBuf::from(format!("/{}{}.png", prefix, i)))
                .collect(),
        )
    }

    /// Handle events until `done` matches one of the updates.
    fn pump_until(
        session: &mut ViewSession,
        mut done: impl FnMut(&ViewUpdate) -> bool,
    ) -> Vec<ViewUpdate> {
        let deadline = Instant::now() + WAIT;
        let mut seen = Vec::new();
        loop {
            for update in session.process_events() {
                let hit = done(&update);
                seen.push(update);
                if hit {
                    return seen;
                }
            }
            assert!(Instant::now() < deadline, "timed out, saw {:?}", seen);
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn settle(session: &mut ViewSession, ms: u64) -> Vec<ViewUpdate> {
        thread::sleep(Duration::from_millis(ms));
        session.process_events()
    }

    #[test]
    fn test_open_collection_displays_and_prefetches() {
        let mut session = session(MockFactory::new());
        let update = session.open_collection(numbered("img", 6), 2).unwrap();
        assert!(matches!(
            update,
            ViewUpdate::Displayed { index: 2, dimensions: (4, 4), animated: false }
        ));
        assert_eq!(session.displayed_index(), Some(2));
        assert_eq!(session.surface().unwrap().dimensions(), (4, 4));

        let deadline = Instant::now() + WAIT;
        while !(session.cache().is_loaded(1).unwrap() && session.cache().is_loaded(3).unwrap()) {
            assert!(Instant::now() < deadline);
            session.process_events();
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!session.cache().is_loaded(0).unwrap());
        assert!(!session.cache().is_loaded(4).unwrap());
    }

    #[test]
    fn test_rapid_navigation_displays_last_request() {
        let factory = MockFactory::new()
            .with_delay("/img1.png", 200)
            .with_delay("/img2.png", 100)
            .with_delay("/img3.png", 10);
        let mut session = session(factory);
        session.open_collection(numbered("img", 8), 0).unwrap();

        session.go_to(1).unwrap();
        session.go_to(2).unwrap();
        session.go_to(3).unwrap();

        pump_until(&mut session, |u| matches!(u, ViewUpdate::Displayed { index: 3, .. }));
        let late = settle(&mut session, 300);
        assert!(
            !late.iter().any(|u| matches!(u, ViewUpdate::Displayed { .. })),
            "stale result displayed: {:?}",
            late
        );
        assert_eq!(session.displayed_index(), Some(3));
        // superseded loads still landed in the cache
        assert!(session.cache().is_loaded(2).unwrap());
    }

    #[test]
    fn test_failed_load_keeps_display_then_recovers() {
        let mut session = session(MockFactory::new().with_failure("/img3.png"));
        session.open_collection(numbered("img", 6), 2).unwrap();

        session.go_to(3).unwrap();
        let updates = pump_until(&mut session, |u| matches!(u, ViewUpdate::LoadFailed { .. }));
        assert!(matches!(updates.last(), Some(ViewUpdate::LoadFailed { index: 3, .. })));
        assert_eq!(session.displayed_index(), Some(2));
        assert!(!session.cache().is_loaded(3).unwrap());

        session.go_to(4).unwrap();
        pump_until(&mut session, |u| matches!(u, ViewUpdate::Displayed { index: 4, .. }));
        assert_eq!(session.displayed_index(), Some(4));
    }

    #[test]
    fn test_next_and_prev_wrap() {
        let mut session = session(MockFactory::new());
        session.open_collection(numbered("img", 3), 2).unwrap();

        session.next().unwrap();
        assert_eq!(session.current_index(), Some(0));
        pump_until(&mut session, |u| matches!(u, ViewUpdate::Displayed { index: 0, .. }));

        session.prev().unwrap();
        assert_eq!(session.current_index(), Some(2));
        pump_until(&mut session, |u| matches!(u, ViewUpdate::Displayed { index: 2, .. }));
    }

    #[test]
    fn test_out_of_range_navigation() {
        let mut session = session(MockFactory::new());
        session.open_collection(numbered("img", 2), 0).unwrap();
        assert!(matches!(
            session.go_to(5),
            Err(LoadError::IndexOutOfRange { index: 5, len: 2 })
        ));
        assert_eq!(session.current_index(), Some(0));
        assert!(session.open_collection(numbered("x", 0), 0).is_err());
    }

    #[test]
    fn test_new_collection_discards_old_results() {
        let mut session = session(MockFactory::new().with_delay("/a1.png", 200));
        session.open_collection(numbered("a", 4), 0).unwrap();
        session.go_to(1).unwrap();

        session.open_collection(numbered("b", 4), 0).unwrap();
        let late = settle(&mut session, 350);
        assert!(!late.iter().any(|u| matches!(u, ViewUpdate::Displayed { .. })));
        assert_eq!(session.displayed_image().unwrap().path(), Path::new("/b0.png"));
        assert!(!session.cache().holds(1, Path::new("/a1.png")).unwrap());
        assert!(late
            .iter()
            .any(|u| matches!(u, ViewUpdate::CollectionChanged { len: 4 })));
    }

    #[test]
    fn test_thumbnails_for_visible_range() {
        let mut session = session(MockFactory::new().with_failure("/img4.png"));
        session.open_collection(numbered("img", 6), 0).unwrap();

        assert_eq!(session.request_thumbnails(0..10, true), 6);
        let mut ready = Vec::new();
        let mut failed = Vec::new();
        let deadline = Instant::now() + WAIT;
        while ready.len() + failed.len() < 6 {
            assert!(Instant::now() < deadline);
            for update in session.process_events() {
                match update {
                    ViewUpdate::Thumbnail { index, thumbnail } => {
                        assert_eq!(thumbnail.frame.dimensions(), (2, 2));
                        ready.push(index);
                    }
                    ViewUpdate::ThumbnailFailed { index, .. } => failed.push(index),
                    _ => {}
                }
            }
            thread::sleep(Duration::from_millis(5));
        }
        ready.sort();
        assert_eq!(ready, vec![0, 1, 2, 3, 5]);
        assert_eq!(failed, vec![4]);
    }

    #[test]
    fn test_open_and_rotate_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wide.png");
        write_png(&path, 6, 3);

        let mut session = ViewSession::new(Arc::new(DefaultFactory::new()), LoaderConfig::default());
        let update = session.open(&path).unwrap();
        assert!(matches!(update, ViewUpdate::Displayed { dimensions: (6, 3), .. }));

        let rotated = session.rotate(90).unwrap().unwrap();
        assert!(matches!(rotated, ViewUpdate::Displayed { dimensions: (3, 6), .. }));
        assert_eq!(session.surface().unwrap().dimensions(), (3, 6));
    }

    #[test]
    fn test_animation_plays_and_stops_on_navigation() {
        let dir = tempdir().unwrap();
        let gif = dir.path().join("a.gif");
        write_gif(&gif, 3, 30);
        write_png(&dir.path().join("b.png"), 2, 2);

        let mut session = ViewSession::new(Arc::new(DefaultFactory::new()), LoaderConfig::default());
        let update = session.open(&gif).unwrap();
        assert!(matches!(update, ViewUpdate::Displayed { index: 0, animated: true, .. }));
        let handle = session.displayed_image().unwrap().clone();
        let animation = handle.as_animated().unwrap();
        assert!(animation.is_playing());

        pump_until(&mut session, |u| matches!(u, ViewUpdate::FrameAdvanced { index: 0 }));

        session.next().unwrap();
        pump_until(&mut session, |u| matches!(u, ViewUpdate::Displayed { index: 1, .. }));
        assert!(!animation.is_playing());
        assert_eq!(animation.frame_index(), 0);

        let late = settle(&mut session, 100);
        assert!(!late
            .iter()
            .any(|u| matches!(u, ViewUpdate::FrameAdvanced { .. })));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_next_update_skips_silent_events() {
        let mut session = session(MockFactory::new().with_delay("/img1.png", 20));
        session.open_collection(numbered("img", 4), 0).unwrap();
        session.go_to(1).unwrap();

        let update = tokio::time::timeout(WAIT, async {
            loop {
                match session.next_update().await {
                    Some(ViewUpdate::Displayed { index, .. }) => break index,
                    Some(_) => continue,
                    None => panic!("event queue closed"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(update, 1);
    }
}
