//! Tour progression and exhibit identification engine
//!
//! A visitor photographs an exhibit; the engine narrows the tour to nearby
//! items, asks an external identifier which one it is, applies the tour's
//! ordering rules and tracks progress to completion. Thumbnails for the
//! tour's images are decoded off the caller's thread and kept in a small
//! shared cache.
//!
//! ## Module structure
//! - `state` - tours, tour files, progress and saved sessions
//! - `geo` - distances and the proximity filter
//! - `follow` - the follow session and the capabilities it consumes
//! - `thumbs` - thumbnail decoding and caching
//! - `config` - engine configuration

pub mod config;
pub mod follow;
pub mod geo;
pub mod state;
pub mod thumbs;

pub use config::EngineConfig;
pub use follow::{FollowSession, IdentificationOutcome, IdentificationReport, LocationPolicy};
pub use geo::{filter_candidates, Position};
pub use state::catalog::{LoadError, LoadWarning, LoadedTour, SaveError, TourCatalog};
pub use state::data::{ItemId, Tour, TourItem};
pub use state::progress::{ProgressState, ProgressTracker, SessionSnapshot};
pub use state::sessions::SessionStore;
pub use thumbs::{ThumbnailCache, ThumbnailKey};
