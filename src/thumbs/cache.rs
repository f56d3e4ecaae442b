//! In-memory thumbnail cache
//!
//! Lookups never block on decoding. A miss schedules a decode job on the
//! blocking pool and hands back a `PendingThumbnail`; the UI shows a
//! placeholder until it resolves.
//!
//! Every request is made on behalf of a display surface and carries that
//! surface's newest token. When a job finishes, its result is only delivered
//! if the token is still the surface's current one, so a surface that has
//! since asked for another image (or been released) never receives stale work.
//! A surface's token is dropped once its newest request is answered, so only
//! surfaces with an outstanding request are tracked. Hosts that abandon a
//! `PendingThumbnail` without waiting on it should call `release_surface`.

use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

use super::decode::{decode_thumbnail, DecodeFailure, Thumbnail};

/// Number of decoded thumbnails kept in memory by default
pub const DEFAULT_CAPACITY: usize = 64;

/// What to decode: an image file at a display size
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThumbnailKey {
    pub source: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl ThumbnailKey {
    pub fn new(source: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            source: source.into(),
            width,
            height,
        }
    }
}

/// A place on screen that displays one thumbnail at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

/// Decode function used by the cache
pub type Decoder = Arc<dyn Fn(&ThumbnailKey) -> Result<Thumbnail, DecodeFailure> + Send + Sync>;

type JobResult = Result<Arc<Thumbnail>, DecodeFailure>;

/// Answer to `ThumbnailCache::request`
#[derive(Debug)]
pub enum ThumbnailRequest {
    /// Cache hit
    Ready(Arc<Thumbnail>),
    /// A decode is running; show a placeholder meanwhile
    Pending(PendingThumbnail),
}

/// How a pending request ended
#[derive(Debug, Clone)]
pub enum Delivery {
    Delivered(Arc<Thumbnail>),
    /// The surface moved on; the result must not be shown there
    Superseded,
    /// Decoding failed; show the "not available" placeholder
    Unavailable(DecodeFailure),
}

struct CacheState {
    entries: LruCache<ThumbnailKey, Arc<Thumbnail>>,
    /// Callers waiting on each running decode job
    in_flight: HashMap<ThumbnailKey, Vec<oneshot::Sender<JobResult>>>,
    /// Newest request token of each surface with an outstanding request
    surfaces: HashMap<SurfaceId, u64>,
    next_token: u64,
}

struct Shared {
    state: Mutex<CacheState>,
    decoder: Decoder,
    decode_jobs: AtomicUsize,
}

/// Bounded LRU cache of decoded thumbnails, shared across sessions
#[derive(Clone)]
pub struct ThumbnailCache {
    shared: Arc<Shared>,
}

impl ThumbnailCache {
    /// A cache that decodes image files with `decode_thumbnail`
    pub fn new(capacity: usize) -> Self {
        Self::with_decoder(
            capacity,
            Arc::new(|key: &ThumbnailKey| decode_thumbnail(&key.source, key.width, key.height)),
        )
    }

    pub fn with_decoder(capacity: usize, decoder: Decoder) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState {
                    entries: LruCache::new(capacity),
                    in_flight: HashMap::new(),
                    surfaces: HashMap::new(),
                    next_token: 0,
                }),
                decoder,
                decode_jobs: AtomicUsize::new(0),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached thumbnail for `key`, if any. Counts as a use for eviction.
    pub fn get(&self, key: &ThumbnailKey) -> Option<Arc<Thumbnail>> {
        self.state().entries.get(key).cloned()
    }

    /// Ask for `key` to be shown on `surface`
    ///
    /// Supersedes whatever the surface asked for before. Identical keys
    /// requested while a decode is running share that one decode.
    pub fn request(&self, surface: SurfaceId, key: ThumbnailKey) -> ThumbnailRequest {
        let mut state = self.state();

        let token = state.next_token;
        state.next_token += 1;
        state.surfaces.insert(surface, token);

        if let Some(hit) = state.entries.get(&key).cloned() {
            tracing::trace!("thumbnail cache hit for {}", key.source.display());
            // Answered right away; older requests from this surface stay superseded
            state.surfaces.remove(&surface);
            return ThumbnailRequest::Ready(hit);
        }

        let (sender, receiver) = oneshot::channel();
        let start_job = match state.in_flight.get_mut(&key) {
            Some(waiters) => {
                waiters.push(sender);
                false
            }
            None => {
                state.in_flight.insert(key.clone(), vec![sender]);
                true
            }
        };
        drop(state);

        if start_job {
            tracing::debug!("thumbnail cache miss for {}, decoding", key.source.display());
            self.spawn_decode(key.clone());
        }

        ThumbnailRequest::Pending(PendingThumbnail {
            cache: self.clone(),
            surface,
            token,
            key,
            receiver,
        })
    }

    /// Forget a surface; its outstanding requests resolve as superseded
    pub fn release_surface(&self, surface: SurfaceId) {
        self.state().surfaces.remove(&surface);
    }

    /// Whether `token` is still the surface's newest request; if so the
    /// surface stops being tracked
    fn settle(&self, surface: SurfaceId, token: u64) -> bool {
        let mut state = self.state();
        if state.surfaces.get(&surface) != Some(&token) {
            return false;
        }
        state.surfaces.remove(&surface);
        true
    }

    fn spawn_decode(&self, key: ThumbnailKey) {
        self.shared.decode_jobs.fetch_add(1, Ordering::Relaxed);

        let cache = self.clone();
        let job = move || {
            let decoder = cache.shared.decoder.clone();
            let result = panic::catch_unwind(AssertUnwindSafe(|| decoder(&key)))
                .unwrap_or_else(|_| Err(DecodeFailure::Worker("decoder panicked".to_string())))
                .map(Arc::new);
            cache.complete(key, result);
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            Err(_) => {
                std::thread::spawn(job);
            }
        }
    }

    fn complete(&self, key: ThumbnailKey, result: JobResult) {
        let waiters = {
            let mut state = self.state();
            match &result {
                Ok(thumbnail) => {
                    state.entries.put(key.clone(), thumbnail.clone());
                }
                // Failures are not cached; the next request retries
                Err(e) => tracing::warn!("thumbnail decode failed: {}", e),
            }
            state.in_flight.remove(&key).unwrap_or_default()
        };

        for waiter in waiters {
            // A dropped receiver just means nobody is waiting anymore
            let _ = waiter.send(result.clone());
        }
    }

    /// Number of cached thumbnails
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state().entries.cap().get()
    }

    /// Whether `key` is cached, without touching its recency
    pub fn contains(&self, key: &ThumbnailKey) -> bool {
        self.state().entries.contains(key)
    }

    /// Number of decode jobs started so far
    pub fn decode_jobs(&self) -> usize {
        self.shared.decode_jobs.load(Ordering::Relaxed)
    }
}

impl Default for ThumbnailCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for ThumbnailCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// A thumbnail that is still being decoded
#[derive(Debug)]
pub struct PendingThumbnail {
    cache: ThumbnailCache,
    surface: SurfaceId,
    token: u64,
    key: ThumbnailKey,
    receiver: oneshot::Receiver<JobResult>,
}

impl PendingThumbnail {
    pub fn key(&self) -> &ThumbnailKey {
        &self.key
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    /// Wait for the decode job, then check the surface still wants it
    pub async fn wait(self) -> Delivery {
        let result = self
            .receiver
            .await
            .unwrap_or_else(|_| Err(DecodeFailure::Worker("decode job was dropped".to_string())));

        if !self.cache.settle(self.surface, self.token) {
            tracing::debug!(
                surface = self.surface.0,
                "discarding stale thumbnail for {}",
                self.key.source.display()
            );
            return Delivery::Superseded;
        }

        match result {
            Ok(thumbnail) => Delivery::Delivered(thumbnail),
            Err(e) => Delivery::Unavailable(e),
        }
    }
}
