//! Atomic file writing via tempfile + rename.
//!
//! Uses [`tempfile::NamedTempFile`] to write to a temporary file in the same
//! directory as the target, then atomically renames it, so a report is either
//! fully present or absent.

use std::io::{self, Write};
use std::path::Path;

/// Atomically write `content` to `path`.
///
/// The parent directory must already exist.
///
/// # Errors
///
/// Returns the underlying I/O error if the temp file cannot be created,
/// written, or renamed into place.
pub fn atomic_write(path: &Path, content: &str) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no parent directory for {}", path.display()),
        )
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_existing_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.md");
        atomic_write(&path, "first").expect("write 1");
        atomic_write(&path, "second").expect("write 2");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "second");
        // No stray temp files left behind.
        assert_eq!(std::fs::read_dir(dir.path()).expect("ls").count(), 1);
    }

    #[test]
    fn missing_parent_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent/report.md");
        assert!(atomic_write(&path, "x").is_err());
    }
}
