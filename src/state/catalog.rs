/// Tour files on disk
///
/// A tour is stored as a JSON mapping:
/// `{name, gps_enabled, enforce_order?, item_range?, items: [...]}`.
/// Loading tolerates broken item records: each one is skipped and reported
/// as a `LoadWarning`, the rest of the tour still loads.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use walkdir::WalkDir;

use super::data::{valid_range, ItemId, Tour, TourItem, DEFAULT_ITEM_RANGE_M};
use crate::geo::Position;

/// Extension of tour files
pub const TOUR_FILE_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("tour file not found: {}", .path.display())]
    NotFound { path: PathBuf },
    #[error("malformed tour: {reason}")]
    Malformed { reason: String },
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LoadError {
    fn malformed(reason: impl Into<String>) -> Self {
        LoadError::Malformed {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize tour: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// An item record that was skipped during loading
#[derive(Debug, Clone, PartialEq)]
pub struct LoadWarning {
    /// Position of the record in the file's `items` array
    pub index: usize,
    pub reason: String,
}

/// Result of loading a tour: the tour plus any skipped-item warnings
#[derive(Debug, Clone)]
pub struct LoadedTour {
    pub tour: Tour,
    pub warnings: Vec<LoadWarning>,
    /// File the tour came from, if any
    pub source: Option<PathBuf>,
}

/// On-disk shape of one tour item
#[derive(Serialize, Deserialize, Debug)]
struct ItemRecord {
    #[serde(default)]
    id: Option<u64>,
    name: String,
    description: String,
    #[serde(default)]
    location: Option<Position>,
    #[serde(default)]
    directions: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    audio: Option<String>,
}

impl ItemRecord {
    fn from_item(item: &TourItem) -> Self {
        Self {
            id: Some(item.id().0),
            name: item.name().to_string(),
            description: item.description().to_string(),
            location: item.location().copied(),
            directions: Some(item.directions().to_string()),
            image: item.image().map(str::to_string),
            audio: item.audio().map(str::to_string),
        }
    }

    fn into_item(self, id: ItemId) -> TourItem {
        let mut item = TourItem::new(id, self.name, self.description);
        item.set_location(self.location);
        item.set_directions(self.directions.unwrap_or_default());
        item.set_image(self.image);
        item.set_audio(self.audio);
        item
    }
}

/// On-disk shape of a whole tour (used for saving)
#[derive(Serialize, Debug)]
struct TourRecord {
    name: String,
    gps_enabled: bool,
    enforce_order: bool,
    item_range: f64,
    items: Vec<ItemRecord>,
}

/// Loads, saves and discovers tour files
#[derive(Debug, Clone)]
pub struct TourCatalog {
    /// Range applied to tours whose file omits `item_range`
    default_item_range: f64,
}

impl Default for TourCatalog {
    fn default() -> Self {
        Self {
            default_item_range: DEFAULT_ITEM_RANGE_M,
        }
    }
}

impl TourCatalog {
    pub fn new(default_item_range: f64) -> Self {
        Self { default_item_range }
    }

    /// Load a tour from a JSON file
    pub fn load(&self, path: &Path) -> Result<LoadedTour, LoadError> {
        let text = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => LoadError::NotFound {
                path: path.to_path_buf(),
            },
            _ => LoadError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| LoadError::malformed(format!("invalid JSON: {}", e)))?;

        let mut loaded = self.load_from_value(&value)?;
        loaded.source = Some(path.to_path_buf());

        tracing::info!(
            tour = %loaded.tour.name(),
            items = loaded.tour.len(),
            skipped = loaded.warnings.len(),
            "loaded tour from {}",
            path.display()
        );
        Ok(loaded)
    }

    /// Build a tour from an already parsed mapping
    pub fn load_from_value(&self, value: &Value) -> Result<LoadedTour, LoadError> {
        let map = value
            .as_object()
            .ok_or_else(|| LoadError::malformed("top level is not a mapping"))?;

        let name = required(map, "name", Value::as_str)?.to_string();
        let gps_enabled = required(map, "gps_enabled", Value::as_bool)?;
        let records = required(map, "items", Value::as_array)?;
        let enforce_order = optional(map, "enforce_order", Value::as_bool)?.unwrap_or(false);
        let item_range = match optional(map, "item_range", Value::as_f64)? {
            Some(range) if !valid_range(range) => {
                return Err(LoadError::malformed(format!(
                    "`item_range` must be positive, got {}",
                    range
                )))
            }
            Some(range) => range,
            None => self.default_item_range,
        };

        let (items, warnings) = parse_items(records);
        for warning in &warnings {
            tracing::warn!(tour = %name, index = warning.index, "skipping tour item: {}", warning.reason);
        }

        let tour = Tour::from_parts(name, gps_enabled, enforce_order, item_range, items);
        Ok(LoadedTour {
            tour,
            warnings,
            source: None,
        })
    }

    /// Convert a tour to its persisted mapping
    pub fn save_to_value(&self, tour: &Tour) -> Result<Value, SaveError> {
        let record = TourRecord {
            name: tour.name().to_string(),
            gps_enabled: tour.gps_enabled(),
            enforce_order: tour.enforce_order(),
            item_range: tour.item_range(),
            items: tour.items().iter().map(ItemRecord::from_item).collect(),
        };
        Ok(serde_json::to_value(record)?)
    }

    /// Write a tour to a JSON file, creating parent directories as needed
    pub fn save(&self, tour: &Tour, path: &Path) -> Result<(), SaveError> {
        let io_err = |source| SaveError::Io {
            path: path.to_path_buf(),
            source,
        };

        let value = self.save_to_value(tour)?;
        let text = serde_json::to_string_pretty(&value)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, text).map_err(io_err)?;

        tracing::info!(tour = %tour.name(), "saved tour to {}", path.display());
        Ok(())
    }

    /// Find and load every tour file under `dir`
    ///
    /// Looks at `dir/*.json` and one level of sub folders (extracted tour
    /// archives keep their `tour.json` in a folder of their own). Files that
    /// fail to load are skipped.
    pub fn discover(&self, dir: &Path) -> Vec<LoadedTour> {
        if !dir.is_dir() {
            tracing::debug!("tour directory {} does not exist", dir.display());
            return Vec::new();
        }

        let mut tours = Vec::new();
        for entry in WalkDir::new(dir)
            .follow_links(true)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_tour_file = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case(TOUR_FILE_EXTENSION))
                .unwrap_or(false);
            if !is_tour_file {
                continue;
            }

            match self.load(path) {
                Ok(loaded) => tours.push(loaded),
                Err(e) => tracing::warn!("ignoring {}: {}", path.display(), e),
            }
        }

        tours.sort_by(|a, b| a.tour.name().cmp(b.tour.name()));
        tours
    }
}

fn required<'a, T>(
    map: &'a Map<String, Value>,
    key: &str,
    read: impl Fn(&'a Value) -> Option<T>,
) -> Result<T, LoadError> {
    let value = map
        .get(key)
        .ok_or_else(|| LoadError::malformed(format!("missing `{}`", key)))?;
    read(value).ok_or_else(|| LoadError::malformed(format!("`{}` has the wrong type", key)))
}

fn optional<'a, T>(
    map: &'a Map<String, Value>,
    key: &str,
    read: impl Fn(&'a Value) -> Option<T>,
) -> Result<Option<T>, LoadError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => read(value)
            .map(Some)
            .ok_or_else(|| LoadError::malformed(format!("`{}` has the wrong type", key))),
    }
}

/// Parse item records, skipping broken ones
///
/// Explicit ids are kept; records without one get ids above the highest
/// explicit id, in file order. Records that would need an id past `u64::MAX`
/// are skipped.
fn parse_items(records: &[Value]) -> (Vec<TourItem>, Vec<LoadWarning>) {
    let mut warnings = Vec::new();
    let mut parsed = Vec::with_capacity(records.len());
    let mut seen = HashSet::new();

    for (index, raw) in records.iter().enumerate() {
        let record: ItemRecord = match serde_json::from_value(raw.clone()) {
            Ok(record) => record,
            Err(e) => {
                warnings.push(LoadWarning {
                    index,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if let Some(id) = record.id {
            if !seen.insert(id) {
                warnings.push(LoadWarning {
                    index,
                    reason: format!("duplicate item id {}", id),
                });
                continue;
            }
        }
        parsed.push((index, record));
    }

    let mut next_id = match seen.iter().max() {
        Some(max) => max.checked_add(1),
        None => Some(0),
    };
    let mut items = Vec::with_capacity(parsed.len());
    for (index, record) in parsed {
        let id = match (record.id, next_id) {
            (Some(id), _) => id,
            (None, Some(id)) => {
                next_id = id.checked_add(1);
                id
            }
            (None, None) => {
                warnings.push(LoadWarning {
                    index,
                    reason: "no item id left to assign".to_string(),
                });
                continue;
            }
        };
        items.push(record.into_item(ItemId(id)));
    }
    warnings.sort_by_key(|w| w.index);

    (items, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_tour() -> Tour {
        let mut tour = Tour::new("Sculpture Garden");
        tour.set_gps_enabled(true);
        tour.set_enforce_order(true);
        tour.set_item_range(75.5).unwrap();

        let a = tour.add_item("Thinker", "Bronze, 1904");
        let b = tour.add_item("Fountain", "Marble basin");
        tour.add_item("Bench", "Plain wooden bench");

        let item = tour.item_mut(a).unwrap();
        item.set_location(Some(Position::new(40.6985, -75.2107)));
        item.set_image(Some("images/thinker.jpg".into()));
        item.set_audio(Some("audio/thinker.mp3".into()));

        let item = tour.item_mut(b).unwrap();
        item.set_directions("Walk past the hedge");
        tour
    }

    #[test]
    fn test_save_then_load_restores_tour() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garden").join("tour.json");
        let catalog = TourCatalog::default();
        let tour = sample_tour();

        catalog.save(&tour, &path).unwrap();
        let loaded = catalog.load(&path).unwrap();

        assert!(loaded.warnings.is_empty());
        assert_eq!(loaded.tour, tour);
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_full_precision_coordinates_survive_save_and_load() {
        let catalog = TourCatalog::default();
        let mut state = 0x9E37_79B9_7F4A_7C15u64;
        let mut next_unit = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 11) as f64 / (1u64 << 53) as f64
        };

        for round in 0..200 {
            let mut tour = Tour::new(format!("Walk {}", round));
            tour.set_gps_enabled(true);
            tour.set_item_range(1.0 + next_unit() * 999.0).unwrap();
            for n in 0..5 {
                let id = tour.add_item(format!("stop {}", n), "");
                let position = Position::new(next_unit() * 180.0 - 90.0, next_unit() * 360.0 - 180.0);
                tour.item_mut(id).unwrap().set_location(Some(position));
            }
            let id = tour.add_item("pier", "");
            tour.item_mut(id)
                .unwrap()
                .set_location(Some(Position::new(-33.85678912345671, 125.67006746896203)));

            let text = serde_json::to_string_pretty(&catalog.save_to_value(&tour).unwrap()).unwrap();
            let value: Value = serde_json::from_str(&text).unwrap();
            let loaded = catalog.load_from_value(&value).unwrap();
            assert_eq!(loaded.tour, tour, "{}", text);
        }
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = TourCatalog::default()
            .load(&dir.path().join("nope.json"))
            .unwrap_err();
        assert!(matches!(err, LoadError::NotFound { .. }));
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let err = TourCatalog::default().load(&path).unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));
    }

    #[test]
    fn test_missing_required_keys() {
        let catalog = TourCatalog::default();
        for value in [
            json!({"gps_enabled": false, "items": []}),
            json!({"name": "x", "items": []}),
            json!({"name": "x", "gps_enabled": false}),
            json!({"name": 3, "gps_enabled": false, "items": []}),
            json!({"name": "x", "gps_enabled": "yes", "items": []}),
            json!(["not", "a", "map"]),
        ] {
            let err = catalog.load_from_value(&value).unwrap_err();
            assert!(matches!(err, LoadError::Malformed { .. }), "{}", value);
        }
    }

    #[test]
    fn test_optional_settings_default() {
        let catalog = TourCatalog::new(42.0);
        let loaded = catalog
            .load_from_value(&json!({"name": "x", "gps_enabled": true, "items": []}))
            .unwrap();
        assert!(!loaded.tour.enforce_order());
        assert_eq!(loaded.tour.item_range(), 42.0);
    }

    #[test]
    fn test_invalid_item_range_is_malformed() {
        let err = TourCatalog::default()
            .load_from_value(&json!({
                "name": "x", "gps_enabled": true, "item_range": -1.0, "items": []
            }))
            .unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));
    }

    #[test]
    fn test_broken_items_are_skipped_with_warnings() {
        let value = json!({
            "name": "Partial",
            "gps_enabled": false,
            "items": [
                {"id": 1, "name": "Good", "description": "ok"},
                {"id": 2, "description": "no name"},
                {"id": 3, "name": "Bad location", "description": "", "location": {"lat": "north"}},
                {"id": 1, "name": "Duplicate", "description": ""},
                {"id": 4, "name": "Also good", "description": "", "directions": null}
            ]
        });

        let loaded = TourCatalog::default().load_from_value(&value).unwrap();
        let names: Vec<&str> = loaded.tour.items().iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["Good", "Also good"]);

        let skipped: Vec<usize> = loaded.warnings.iter().map(|w| w.index).collect();
        assert_eq!(skipped, vec![1, 2, 3]);
    }

    #[test]
    fn test_missing_ids_are_assigned_fresh_values() {
        let value = json!({
            "name": "Ids",
            "gps_enabled": false,
            "items": [
                {"name": "a", "description": ""},
                {"id": 10, "name": "b", "description": ""},
                {"name": "c", "description": ""},
                {"id": 3, "name": "d", "description": ""}
            ]
        });

        let loaded = TourCatalog::default().load_from_value(&value).unwrap();
        let ids: Vec<u64> = loaded.tour.items().iter().map(|i| i.id().0).collect();
        assert_eq!(ids, vec![11, 10, 12, 3]);
    }

    #[test]
    fn test_fresh_ids_stop_at_the_largest_id() {
        let value = json!({
            "name": "Edge",
            "gps_enabled": false,
            "items": [
                {"id": 0, "name": "zero", "description": ""},
                {"id": u64::MAX, "name": "last", "description": ""},
                {"name": "no id", "description": ""}
            ]
        });

        let loaded = TourCatalog::default().load_from_value(&value).unwrap();
        let ids: Vec<u64> = loaded.tour.items().iter().map(|i| i.id().0).collect();
        assert_eq!(ids, vec![0, u64::MAX]);
        assert_eq!(loaded.warnings.len(), 1);
        assert_eq!(loaded.warnings[0].index, 2);
    }

    #[test]
    fn test_fresh_id_may_be_the_largest_id() {
        let value = json!({
            "name": "Edge",
            "gps_enabled": false,
            "items": [
                {"id": u64::MAX - 1, "name": "a", "description": ""},
                {"name": "b", "description": ""},
                {"name": "c", "description": ""}
            ]
        });

        let loaded = TourCatalog::default().load_from_value(&value).unwrap();
        let ids: Vec<u64> = loaded.tour.items().iter().map(|i| i.id().0).collect();
        assert_eq!(ids, vec![u64::MAX - 1, u64::MAX]);
        assert_eq!(loaded.warnings.len(), 1);
        assert_eq!(loaded.warnings[0].index, 2);
    }

    #[test]
    fn test_saved_mapping_shape() {
        let value = TourCatalog::default().save_to_value(&sample_tour()).unwrap();
        assert_eq!(value["name"], "Sculpture Garden");
        assert_eq!(value["gps_enabled"], true);
        assert_eq!(value["items"][0]["location"]["lat"], 40.6985);
        assert_eq!(value["items"][1]["location"], Value::Null);
        assert_eq!(value["items"][2]["audio"], Value::Null);
    }

    #[test]
    fn test_discover_finds_tours_in_folders() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = TourCatalog::default();

        let mut zoo = Tour::new("Zoo");
        zoo.add_item("Lion", "");
        catalog.save(&zoo, &dir.path().join("zoo.json")).unwrap();
        catalog
            .save(&sample_tour(), &dir.path().join("garden").join("tour.json"))
            .unwrap();
        fs::write(dir.path().join("notes.txt"), "not a tour").unwrap();
        fs::write(dir.path().join("broken.json"), "{}").unwrap();

        let names: Vec<String> = catalog
            .discover(dir.path())
            .into_iter()
            .map(|l| l.tour.name().to_string())
            .collect();
        assert_eq!(names, vec!["Sculpture Garden", "Zoo"]);
    }

    #[test]
    fn test_discover_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TourCatalog::default()
            .discover(&dir.path().join("absent"))
            .is_empty());
    }
}
