use crate::{Error, Result};

use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Replaces `path` with `contents` so that readers see either the old or
/// the new file, never a partial one.
///
/// The temp file lives next to the target so the final rename stays on one
/// filesystem. An existing file keeps its permissions.
pub fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    let failure = |source: std::io::Error| Error::WriteFailure {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(dir).map_err(failure)?;
    file.write_all(contents.as_bytes()).map_err(failure)?;
    file.as_file().sync_all().map_err(failure)?;

    if let Ok(metadata) = std::fs::metadata(path) {
        file.as_file()
            .set_permissions(metadata.permissions())
            .map_err(failure)?;
    }

    file.persist(path).map_err(|err| failure(err.error))?;
    debug!("Wrote {} bytes to {}", contents.len(), path.display());
    Ok(())
}
