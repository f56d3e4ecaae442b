/// State management module
///
/// This module handles all tour state, including:
/// - The tour and item data model (data.rs)
/// - Loading, saving and discovering tour files (catalog.rs)
/// - Follow-session progress and snapshots (progress.rs)
/// - Saved sessions in SQLite (sessions.rs)

pub mod catalog;
pub mod data;
pub mod progress;
pub mod sessions;
