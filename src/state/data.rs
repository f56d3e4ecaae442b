/// Shared data structures for the tour state
///
/// These structs represent the data model that flows between
/// the catalog files, the follow session and the UI layer.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::Position;

/// Proximity threshold used when a tour file doesn't specify one
pub const DEFAULT_ITEM_RANGE_M: f64 = 100.0;

/// Stable identifier of a tour item, unique within one tour
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Rejected authoring changes
#[derive(Debug, Error, PartialEq)]
pub enum TourEditError {
    #[error("item range must be a positive number of meters, got {0}")]
    InvalidRange(f64),
    #[error("no tour item with id {0}")]
    UnknownItem(ItemId),
}

/// One exhibit in a tour
#[derive(Debug, Clone, PartialEq)]
pub struct TourItem {
    id: ItemId,
    name: String,
    description: String,
    /// None means the item is a candidate wherever the visitor is
    location: Option<Position>,
    /// Only shown when the tour enforces order
    directions: String,
    image: Option<String>,
    audio: Option<String>,
}

impl TourItem {
    pub fn new(id: ItemId, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            location: None,
            directions: String::new(),
            image: None,
            audio: None,
        }
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn location(&self) -> Option<&Position> {
        self.location.as_ref()
    }

    pub fn directions(&self) -> &str {
        &self.directions
    }

    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    pub fn audio(&self) -> Option<&str> {
        self.audio.as_deref()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn set_location(&mut self, location: Option<Position>) {
        self.location = location;
    }

    pub fn set_directions(&mut self, directions: impl Into<String>) {
        self.directions = directions.into();
    }

    pub fn set_image(&mut self, image: Option<String>) {
        self.image = image;
    }

    pub fn set_audio(&mut self, audio: Option<String>) {
        self.audio = audio;
    }
}

/// A named, ordered collection of tour items plus traversal settings
#[derive(Debug, Clone)]
pub struct Tour {
    name: String,
    gps_enabled: bool,
    enforce_order: bool,
    item_range: f64,
    items: Vec<TourItem>,
    /// Next id handed out by `add_item`; None once `u64::MAX` is taken
    next_id: Option<u64>,
}

impl Default for Tour {
    fn default() -> Self {
        Self::new("Unnamed tour")
    }
}

impl Tour {
    /// Create an empty tour with default settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gps_enabled: false,
            enforce_order: false,
            item_range: DEFAULT_ITEM_RANGE_M,
            items: Vec::new(),
            next_id: Some(0),
        }
    }

    /// Build a tour from already identified items (used by the catalog loader)
    ///
    /// Callers guarantee id uniqueness.
    pub(crate) fn from_parts(
        name: String,
        gps_enabled: bool,
        enforce_order: bool,
        item_range: f64,
        items: Vec<TourItem>,
    ) -> Self {
        let next_id = match items.iter().map(|i| i.id.0).max() {
            Some(max) => max.checked_add(1),
            None => Some(0),
        };
        Self {
            name,
            gps_enabled,
            enforce_order,
            item_range,
            items,
            next_id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gps_enabled(&self) -> bool {
        self.gps_enabled
    }

    pub fn enforce_order(&self) -> bool {
        self.enforce_order
    }

    /// Proximity threshold in meters
    pub fn item_range(&self) -> f64 {
        self.item_range
    }

    pub fn items(&self) -> &[TourItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_gps_enabled(&mut self, enabled: bool) {
        self.gps_enabled = enabled;
    }

    pub fn set_enforce_order(&mut self, enforce: bool) {
        self.enforce_order = enforce;
    }

    pub fn set_item_range(&mut self, meters: f64) -> Result<(), TourEditError> {
        if !valid_range(meters) {
            return Err(TourEditError::InvalidRange(meters));
        }
        self.item_range = meters;
        Ok(())
    }

    /// Append a new item with a fresh id and return that id
    ///
    /// Ids count up and are not reused. Once an item holds `u64::MAX` the
    /// lowest id not held by any item is used instead.
    pub fn add_item(&mut self, name: impl Into<String>, description: impl Into<String>) -> ItemId {
        let id = match self.next_id {
            Some(next) => {
                self.next_id = next.checked_add(1);
                ItemId(next)
            }
            None => self.lowest_unused_id(),
        };
        self.items.push(TourItem::new(id, name, description));
        id
    }

    fn lowest_unused_id(&self) -> ItemId {
        let mut ids: Vec<u64> = self.items.iter().map(|i| i.id.0).collect();
        ids.sort_unstable();

        let mut candidate = 0u64;
        for id in ids {
            if id != candidate {
                break;
            }
            candidate = candidate.saturating_add(1);
        }
        ItemId(candidate)
    }

    /// Remove an item, returning it
    pub fn remove_item(&mut self, id: ItemId) -> Result<TourItem, TourEditError> {
        let index = self.position_of(id).ok_or(TourEditError::UnknownItem(id))?;
        Ok(self.items.remove(index))
    }

    pub fn item(&self, id: ItemId) -> Option<&TourItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn item_mut(&mut self, id: ItemId) -> Option<&mut TourItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    /// Catalog position of an item
    pub fn position_of(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|i| i.id == id)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.position_of(id).is_some()
    }

    /// Item ids in catalog order
    pub fn item_ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|i| i.id).collect()
    }
}

// Id allocation state is not part of a tour's identity
impl PartialEq for Tour {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.gps_enabled == other.gps_enabled
            && self.enforce_order == other.enforce_order
            && self.item_range == other.item_range
            && self.items == other.items
    }
}

impl fmt::Display for Tour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

pub(crate) fn valid_range(meters: f64) -> bool {
    meters.is_finite() && meters > 0.0
}
