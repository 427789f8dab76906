//! Write-then-rename file replacement.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use lode_core::error::{LodeError, Result};
use tracing::warn;

/// Sibling path used while `path` is being rewritten.
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replace `path` with whatever `write` produces. The data is fsynced to a
/// temp file first, so a crash leaves either the old file or the new one.
/// The temp file is removed again if any step fails.
pub(crate) fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let temp = temp_path(path);
    let result = write_and_rename(&temp, path, write);
    if result.is_err() {
        if let Err(e) = std::fs::remove_file(&temp) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %temp.display(), error = %e, "Failed to remove temp file");
            }
        }
    }
    result
}

fn write_and_rename<F>(temp: &Path, path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let mut writer = BufWriter::new(File::create(temp)?);
    write(&mut writer)?;
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| LodeError::Io(e.into_error()))?;
    file.sync_all()?;
    std::fs::rename(temp, path)?;
    Ok(())
}
