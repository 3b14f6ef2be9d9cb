//! Small filesystem helpers shared by the snapshot cache and the catalog.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::Result;

/// Render an arbitrary name safe for use as a file stem: anything that
/// is not alphanumeric, `-`, `_`, or `.` becomes `-`. In particular,
/// path separators cannot escape the containing directory.
pub(crate) fn sanitize_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Atomically replace `path` with `bytes`.
///
/// Writes to a temp file in the same directory, syncs it, then renames
/// over the destination. Readers observe either the old content or the
/// new content, never a partial write.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    // Sync before rename; a crash must not leave a truncated file behind
    // the new name.
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
