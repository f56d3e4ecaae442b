/// A follow session: one visitor walking one tour
///
/// Each photo goes through the same stages:
/// 1. acquire a location fix (only when the tour uses GPS)
/// 2. narrow the tour to nearby candidates
/// 3. ask the identifier which candidate is in the photo
/// 4. apply the tour's ordering policy
/// 5. report the outcome and advance progress
///
/// `identify` takes `&mut self`, so attempts on one session run one at a time
/// and are applied in the order they were started.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use super::capabilities::{LocationProvider, ObjectIdentifier};
use crate::config::EngineConfig;
use crate::geo::{filter_candidates, Position};
use crate::state::data::{ItemId, Tour, TourItem};
use crate::state::progress::{ProgressState, ProgressTracker, SessionSnapshot};

/// How hard to try for a location fix before giving up
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationPolicy {
    /// Tries per photo; zero is treated as one
    pub attempts: u32,
    pub timeout: Duration,
    pub retry_delay: Duration,
    /// Without a fix, refuse (true) or fall back to the whole tour (false)
    pub require_location: bool,
}

impl Default for LocationPolicy {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for LocationPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            attempts: config.location_attempts.max(1),
            timeout: config.location_timeout,
            retry_delay: config.location_retry_delay,
            require_location: config.require_location,
        }
    }
}

/// What happened to one photo
#[derive(Debug, Clone, PartialEq)]
pub enum IdentificationOutcome {
    /// The photo shows this item and progress moved to it
    Accepted(TourItem),
    /// A real item was recognised, but not the one an ordered tour expects
    Rejected {
        identified: ItemId,
        expected: Option<ItemId>,
    },
    NoMatch,
    /// The tour needs GPS and no fix could be obtained; the user may retry
    LocationRequiredButUnavailable,
}

/// Outcome of an identification attempt plus what the UI needs to react
#[derive(Debug, Clone, PartialEq)]
pub struct IdentificationReport {
    pub outcome: IdentificationOutcome,
    /// Number of items submitted to the identifier
    pub candidates: usize,
    /// Whether the candidates were narrowed by distance
    pub proximity_filtered: bool,
    /// Set when an accepted item has audio the UI should start playing
    pub play_audio_for: Option<ItemId>,
    pub progress: ProgressState,
}

/// Session context: owns the tour, its progress and the capabilities
pub struct FollowSession<L, I> {
    tour: Tour,
    tracker: ProgressTracker,
    locator: L,
    identifier: I,
    policy: LocationPolicy,
}

impl<L, I> FollowSession<L, I>
where
    L: LocationProvider,
    I: ObjectIdentifier,
{
    /// Start following `tour` from the beginning
    pub fn new(tour: Tour, locator: L, identifier: I, policy: LocationPolicy) -> Self {
        let tracker = ProgressTracker::new(&tour);
        Self {
            tour,
            tracker,
            locator,
            identifier,
            policy,
        }
    }

    /// Pick up a session from a saved snapshot
    pub fn resume(
        tour: Tour,
        snapshot: &SessionSnapshot,
        locator: L,
        identifier: I,
        policy: LocationPolicy,
    ) -> Self {
        let tracker = ProgressTracker::restore(&tour, snapshot);
        Self {
            tour,
            tracker,
            locator,
            identifier,
            policy,
        }
    }

    /// Identify the item in `photo` and progress accordingly
    pub async fn identify(&mut self, photo: &Path) -> IdentificationReport {
        let (candidate_ids, proximity_filtered) = if self.tour.gps_enabled() {
            match self.acquire_location().await {
                Some(position) => {
                    self.tracker.set_last_position(Some(position));
                    (self.nearby_ids(&position), true)
                }
                None if self.policy.require_location => {
                    tracing::warn!(tour = %self.tour.name(), "couldn't determine location");
                    return self.report(IdentificationOutcome::LocationRequiredButUnavailable, 0, false);
                }
                None => {
                    tracing::info!("no location fix, skipping proximity filter");
                    (self.all_ids(), false)
                }
            }
        } else {
            (self.all_ids(), false)
        };

        let candidates = candidate_ids.len();
        if candidate_ids.is_empty() {
            tracing::debug!("no candidate items nearby");
            return self.report(IdentificationOutcome::NoMatch, 0, proximity_filtered);
        }

        let detected = match self.identifier.identify_object(photo, &candidate_ids).await {
            Ok(detected) => detected,
            Err(e) => {
                tracing::warn!("identification failed for {}: {}", photo.display(), e);
                None
            }
        };

        let Some(detected) = detected else {
            tracing::info!("no tour item detected");
            return self.report(IdentificationOutcome::NoMatch, candidates, proximity_filtered);
        };

        if !self.tour.contains(detected) {
            tracing::warn!("identifier returned unknown item {}", detected);
            return self.report(IdentificationOutcome::NoMatch, candidates, proximity_filtered);
        }

        let outcome = self.apply_ordering_policy(detected);
        self.report(outcome, candidates, proximity_filtered)
    }

    /// Ask the location provider for a fix, within the configured policy
    async fn acquire_location(&self) -> Option<Position> {
        let attempts = self.policy.attempts.max(1);
        for attempt in 1..=attempts {
            match tokio::time::timeout(self.policy.timeout, self.locator.current_location()).await {
                Ok(Some(position)) => return Some(position),
                Ok(None) => tracing::debug!(attempt, "location provider had no fix"),
                Err(_) => tracing::debug!(attempt, "location request timed out"),
            }

            if attempt < attempts {
                tokio::time::sleep(self.policy.retry_delay).await;
            }
        }
        None
    }

    fn nearby_ids(&self, position: &Position) -> BTreeSet<ItemId> {
        filter_candidates(self.tour.items(), position, self.tour.item_range())
            .into_iter()
            .map(TourItem::id)
            .collect()
    }

    fn all_ids(&self) -> BTreeSet<ItemId> {
        self.tour.item_ids().into_iter().collect()
    }

    /// Accept or reject a recognised item, advancing progress on acceptance
    fn apply_ordering_policy(&mut self, detected: ItemId) -> IdentificationOutcome {
        if self.tour.enforce_order() {
            let expected = self.tracker.next_item();
            if expected != Some(detected) {
                tracing::info!("detected item {} out of order (expected {:?})", detected, expected);
                return IdentificationOutcome::Rejected {
                    identified: detected,
                    expected,
                };
            }
        }

        if let Err(e) = self.tracker.advance(detected) {
            // Only reachable if the tracker and tour disagree about the catalog
            tracing::warn!("{}", e);
            return IdentificationOutcome::NoMatch;
        }

        match self.tour.item(detected) {
            Some(item) => {
                tracing::info!(item = %item.name(), "reached tour item {}", detected);
                IdentificationOutcome::Accepted(item.clone())
            }
            None => IdentificationOutcome::NoMatch,
        }
    }

    fn report(
        &self,
        outcome: IdentificationOutcome,
        candidates: usize,
        proximity_filtered: bool,
    ) -> IdentificationReport {
        let play_audio_for = match &outcome {
            IdentificationOutcome::Accepted(item) if item.has_audio() => Some(item.id()),
            _ => None,
        };

        IdentificationReport {
            outcome,
            candidates,
            proximity_filtered,
            play_audio_for,
            progress: self.tracker.state(),
        }
    }
}

impl<L, I> FollowSession<L, I> {
    pub fn tour(&self) -> &Tour {
        &self.tour
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn state(&self) -> ProgressState {
        self.tracker.state()
    }

    pub fn current_item(&self) -> Option<&TourItem> {
        self.tracker.current().and_then(|id| self.tour.item(id))
    }

    /// Next item of an ordered tour, None once the tour is over
    pub fn next_item(&self) -> Option<&TourItem> {
        self.tracker.next_item().and_then(|id| self.tour.item(id))
    }

    /// Items still to visit, in catalog order
    pub fn remaining_items(&self) -> Vec<&TourItem> {
        self.tracker
            .remaining()
            .into_iter()
            .filter_map(|id| self.tour.item(id))
            .collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.tracker.snapshot()
    }

    /// End the session, handing the tour back
    pub fn into_tour(self) -> Tour {
        self.tour
    }
}
