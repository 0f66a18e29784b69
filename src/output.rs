/// File output helpers
///
/// Every output goes to `<path>.tmp` first and is renamed into place only
/// when the whole content was written, so an aborted run never leaves a
/// truncated library, vocabulary or table behind.
use crate::error::{AnalyzerError, Result};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// `<path><suffix>`, e.g. `template_lib.csv` -> `template_lib.csv.old`
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Write through a buffered writer into `<path>.tmp`, then rename over `path`
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .map_err(|e| AnalyzerError::io(e, format!("creating {}", dir.display())))?;
    }

    let tmp = with_suffix(path, ".tmp");
    let file = File::create(&tmp)
        .map_err(|e| AnalyzerError::io(e, format!("creating {}", tmp.display())))?;
    let mut writer = BufWriter::new(file);

    if let Err(e) = write(&mut writer) {
        drop(writer);
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    writer
        .flush()
        .map_err(|e| AnalyzerError::io(e, format!("flushing {}", tmp.display())))?;
    drop(writer);

    fs::rename(&tmp, path)
        .map_err(|e| AnalyzerError::io(e, format!("renaming {} into place", tmp.display())))?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Write lines (already terminated) atomically
pub fn write_lines<I, S>(path: &Path, lines: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    write_atomic(path, |w| {
        for line in lines {
            w.write_all(line.as_ref().as_bytes())
                .map_err(|e| AnalyzerError::io(e, format!("writing {}", path.display())))?;
        }
        Ok(())
    })
}

/// Rename an existing file to `<path>.old`, replacing an older backup
///
/// # Returns
/// `true` if there was a file to back up
pub fn backup_existing(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let old = with_suffix(path, ".old");
    fs::rename(path, &old)
        .map_err(|e| AnalyzerError::io(e, format!("backing up {}", path.display())))?;
    debug!("Backed up {} to {}", path.display(), old.display());
    Ok(true)
}
