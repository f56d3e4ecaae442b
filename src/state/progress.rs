/// Follow-session progress
///
/// Tracks which items of a tour have been visited, which one is current,
/// and whether the tour is finished. Ordered tours finish when nothing is
/// left after the current item; free-roam tours finish when every item has
/// been visited.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::data::{ItemId, Tour};
use crate::geo::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    NotStarted,
    InProgress,
    Complete,
}

#[derive(Debug, Error, PartialEq)]
pub enum ProgressError {
    #[error("item {0} is not part of this tour")]
    UnknownItem(ItemId),
}

/// Flat record of a session, enough to resume it after the UI is recreated
///
/// `visited_item_ids` has set semantics; it is written sorted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub visited_item_ids: Vec<ItemId>,
    #[serde(default)]
    pub current_item_id: Option<ItemId>,
    #[serde(default)]
    pub last_position: Option<Position>,
}

impl SessionSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Visited/remaining bookkeeping for one follow session
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    /// Item ids in catalog order
    order: Vec<ItemId>,
    enforce_order: bool,
    visited: HashSet<ItemId>,
    current: Option<ItemId>,
    last_position: Option<Position>,
}

impl ProgressTracker {
    /// Start a fresh session over `tour`
    pub fn new(tour: &Tour) -> Self {
        Self {
            order: tour.item_ids(),
            enforce_order: tour.enforce_order(),
            visited: HashSet::new(),
            current: None,
            last_position: None,
        }
    }

    /// Resume a session from a snapshot
    ///
    /// Ids the tour no longer contains are dropped.
    pub fn restore(tour: &Tour, snapshot: &SessionSnapshot) -> Self {
        let mut tracker = Self::new(tour);

        for &id in &snapshot.visited_item_ids {
            if tour.contains(id) {
                tracker.visited.insert(id);
            } else {
                tracing::warn!(tour = %tour.name(), "dropping unknown visited item {} from snapshot", id);
            }
        }

        tracker.current = match snapshot.current_item_id {
            Some(id) if tour.contains(id) => Some(id),
            Some(id) => {
                tracing::warn!(tour = %tour.name(), "dropping unknown current item {} from snapshot", id);
                None
            }
            None => None,
        };
        tracker.last_position = snapshot.last_position;
        tracker
    }

    /// Mark an item as reached and make it current
    ///
    /// Re-visiting an item is allowed: it becomes current again but the
    /// visited set is unchanged.
    pub fn advance(&mut self, id: ItemId) -> Result<ProgressState, ProgressError> {
        if !self.order.contains(&id) {
            return Err(ProgressError::UnknownItem(id));
        }

        self.current = Some(id);
        if !self.visited.insert(id) {
            tracing::debug!("item {} was already visited", id);
        }
        Ok(self.state())
    }

    pub fn state(&self) -> ProgressState {
        if self.is_complete() {
            ProgressState::Complete
        } else if self.visited.is_empty() && self.current.is_none() {
            ProgressState::NotStarted
        } else {
            ProgressState::InProgress
        }
    }

    pub fn is_complete(&self) -> bool {
        if self.enforce_order {
            self.next_item().is_none()
        } else {
            self.order.iter().all(|id| self.visited.contains(id))
        }
    }

    /// The item an ordered tour expects next
    ///
    /// The first unvisited item after the current one in catalog order, or
    /// the first unvisited item of the tour when nothing is current yet.
    pub fn next_item(&self) -> Option<ItemId> {
        let start = match self.current {
            None => 0,
            Some(current) => self.order.iter().position(|&id| id == current)? + 1,
        };

        self.order[start..]
            .iter()
            .copied()
            .find(|id| !self.visited.contains(id))
    }

    /// Unvisited items in catalog order
    pub fn remaining(&self) -> Vec<ItemId> {
        self.order
            .iter()
            .copied()
            .filter(|id| !self.visited.contains(id))
            .collect()
    }

    pub fn is_visited(&self, id: ItemId) -> bool {
        self.visited.contains(&id)
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    pub fn current(&self) -> Option<ItemId> {
        self.current
    }

    pub fn enforce_order(&self) -> bool {
        self.enforce_order
    }

    pub fn last_position(&self) -> Option<Position> {
        self.last_position
    }

    pub fn set_last_position(&mut self, position: Option<Position>) {
        self.last_position = position;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut visited_item_ids: Vec<ItemId> = self.visited.iter().copied().collect();
        visited_item_ids.sort();

        SessionSnapshot {
            visited_item_ids,
            current_item_id: self.current,
            last_position: self.last_position,
        }
    }
}
