//! Atomic JSON persistence shared by the settings file and the autostart
//! ledger.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;

/// Serialises `value` as pretty JSON and atomically replaces `path`.
///
/// The document is written to a temporary file in the destination directory,
/// synced, then renamed over the target so readers never observe a partial
/// write. Missing parent directories are created.
///
/// # Errors
///
/// Returns the underlying I/O error when the directory cannot be created, the
/// value cannot be serialised, or the rename fails.
pub fn write_json_atomically<T>(path: &Path, value: &T) -> io::Result<()>
where
    T: Serialize + ?Sized,
{
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut staging = NamedTempFile::new_in(parent)?;
    serde_json::to_writer_pretty(&mut staging, value).map_err(io::Error::from)?;
    staging.write_all(b"\n")?;
    staging.as_file().sync_all()?;
    staging.persist(path).map_err(|error| error.error)?;
    Ok(())
}
