/// External capabilities consumed by a follow session
///
/// The engine never locates the device or matches pixels itself. The host
/// application plugs those in through these two traits.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::Path;

use crate::geo::Position;
use crate::state::data::ItemId;

/// Opaque failure reported by a capability
pub type CapabilityError = Box<dyn std::error::Error + Send + Sync>;

/// Best-effort source of the device position
pub trait LocationProvider: Send + Sync {
    /// Current position, or None when no fix is available
    fn current_location(&self) -> impl Future<Output = Option<Position>> + Send;
}

/// Image recognition: which of the candidate items is in the photo
pub trait ObjectIdentifier: Send + Sync {
    /// Best matching candidate, `Ok(None)` when nothing matches
    fn identify_object(
        &self,
        photo: &Path,
        candidates: &BTreeSet<ItemId>,
    ) -> impl Future<Output = Result<Option<ItemId>, CapabilityError>> + Send;
}

/// A location provider that always reports the same answer
///
/// Useful for tours without GPS and for hosts that push positions in
/// themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLocation(pub Option<Position>);

impl LocationProvider for FixedLocation {
    async fn current_location(&self) -> Option<Position> {
        self.0
    }
}
