/**
 * Durable, crash-safe persistence of the replicated `WorldView`.
 *
 * The State Store calls `save` after every mutation, before it publishes any
 * outputs, and calls `load` once at startup. The write is atomic with
 * respect to process crashes: the new content lands in a temp file in the
 * same directory (so the final rename is same-filesystem), is flushed and
 * synced, then renamed over the target path. A crash at any point before the
 * rename leaves the previous snapshot (or nothing) on disk, never a
 * half-written file.
 *
 * # Fields
 * None: this module is a pair of free functions, not a long-lived task.
 */

/***************************************/
/*        3rd party libraries          */
/***************************************/
use log::{debug, warn};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/***************************************/
/*           Local modules             */
/***************************************/
use crate::shared::WorldView;

/***************************************/
/*             Public API              */
/***************************************/

/// Overwrites `path` with `world` as JSON. Failures are transient I/O errors:
/// logged and swallowed, since the in-memory WorldView remains authoritative
/// and the next mutation will retry the write.
pub fn save(path: &str, world: &WorldView) {
    if let Err(e) = save_inner(path, world) {
        warn!("failed to write snapshot to {}: {}", path, e);
    }
}

fn save_inner(path: &str, world: &WorldView) -> std::io::Result<()> {
    let target = Path::new(path);
    let dir = target.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        target.file_name().and_then(|n| n.to_str()).unwrap_or("world_view")
    ));

    let serialized = serde_json::to_string(world)?;
    {
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(serialized.as_bytes())?;
        tmp_file.sync_all()?;
    }
    fs::rename(&tmp_path, target)?;
    debug!("wrote snapshot to {}", path);
    Ok(())
}

/// Loads a previously saved `WorldView`, if `path` exists and parses. A
/// missing file is the normal fresh-start case, not an error; a present but
/// corrupt file is logged and treated the same as absent so the node still
/// boots.
pub fn load(path: &str) -> Option<WorldView> {
    if !Path::new(path).exists() {
        return None;
    }
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(world) => Some(world),
            Err(e) => {
                warn!("failed to parse snapshot at {}: {}", path, e);
                None
            }
        },
        Err(e) => {
            warn!("failed to read snapshot at {}: {}", path, e);
            None
        }
    }
}

/***************************************/
/*              Unit tests             */
/***************************************/
