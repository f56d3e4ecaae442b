/// Following a tour
///
/// This module handles:
/// - The capabilities the host plugs in (location, image recognition)
/// - The per-visitor session that turns photos into tour progress

pub mod capabilities;
pub mod session;

pub use capabilities::{CapabilityError, FixedLocation, LocationProvider, ObjectIdentifier};
pub use session::{FollowSession, IdentificationOutcome, IdentificationReport, LocationPolicy};
