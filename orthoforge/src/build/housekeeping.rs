//! Post-commit cleanup of orphaned textures.
//!
//! Reruns at different zoom levels or providers leave packaged textures
//! behind that no terrain definition references any more. After a commit
//! the orchestrator sweeps those in the background; every error here is
//! logged and swallowed, a failed sweep never fails a build.

use crate::tile::BuildTarget;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

/// Result of one housekeeping sweep.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Textures referenced by a terrain definition.
    pub referenced: usize,
    /// Orphaned textures removed.
    pub removed: usize,
}

/// Removes packaged textures no terrain definition references.
///
/// Blocking; run it on a blocking thread.
pub fn sweep_orphaned_textures(target: &BuildTarget) -> SweepStats {
    let referenced = referenced_textures(&target.terrain_dir());
    let mut stats = SweepStats {
        referenced: referenced.len(),
        removed: 0,
    };

    let textures_dir = target.textures_dir();
    let entries = match std::fs::read_dir(&textures_dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %textures_dir.display(), error = %e, "no textures to sweep");
            return stats;
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.ends_with(".dds") || referenced.contains(name.as_ref()) {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(texture = %name, "removed orphaned texture");
                stats.removed += 1;
            }
            Err(e) => {
                warn!(texture = %name, error = %e, "failed to remove orphaned texture");
            }
        }
    }
    stats
}

// Collects the texture file names referenced by terrain definitions.
fn referenced_textures(terrain_dir: &Path) -> HashSet<String> {
    let mut referenced = HashSet::new();
    let entries = match std::fs::read_dir(terrain_dir) {
        Ok(entries) => entries,
        Err(_) => return referenced,
    };

    for entry in entries.flatten() {
        if entry.path().extension().map_or(true, |ext| ext != "ter") {
            continue;
        }
        let body = match std::fs::read_to_string(entry.path()) {
            Ok(body) => body,
            Err(e) => {
                warn!(file = %entry.path().display(), error = %e, "unreadable terrain definition");
                continue;
            }
        };
        for line in body.lines() {
            if let Some(rest) = line.trim().strip_prefix("BASE_TEX_NOWRAP") {
                if let Some(name) = rest.trim().rsplit('/').next() {
                    referenced.insert(name.to_string());
                }
            }
        }
    }
    referenced
}
