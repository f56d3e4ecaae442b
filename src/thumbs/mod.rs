/// Thumbnail module
///
/// This module handles:
/// - Decoding images at display size (power-of-two downsampling)
/// - Correcting orientation from embedded metadata
/// - Keeping recently shown thumbnails in a bounded in-memory cache

pub mod cache;
pub mod decode;

pub use cache::{Delivery, PendingThumbnail, SurfaceId, ThumbnailCache, ThumbnailKey, ThumbnailRequest};
pub use decode::{DecodeFailure, Thumbnail};
