//! Atomic CSV writer
//!
//! Rows are written to a temporary file next to the target and the file
//! is renamed over the target only once every row has been flushed, so a
//! failed write leaves the previous contents (or no file) in place.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use cpc_core::{CpcError, Result};

pub(crate) fn write_csv_atomically<F>(path: &Path, write_rows: F) -> Result<()>
where
    F: FnOnce(&mut csv::Writer<&mut File>) -> csv::Result<()>,
{
    let target = path.display().to_string();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    fs::create_dir_all(dir).map_err(|e| CpcError::write(&target, e))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| CpcError::write(&target, e))?;

    {
        let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
        write_rows(&mut writer).map_err(|e| CpcError::write(&target, e))?;
        writer.flush().map_err(|e| CpcError::write(&target, e))?;
    }

    tmp.as_file_mut()
        .flush()
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| CpcError::write(&target, e))?;

    tmp.persist(path)
        .map_err(|e| CpcError::write(&target, e.error))?;

    Ok(())
}
