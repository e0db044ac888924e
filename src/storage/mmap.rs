//! Memory-mapped file access for persisted segments.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use memmap2::{Mmap, MmapOptions};

use crate::error::{Result, StrataError};

/// Map a segment file read-only.
///
/// Empty files cannot be mapped; they are reported as corrupt segments
/// rather than I/O errors since no valid segment is empty.
pub fn map_file<P: AsRef<Path>>(path: P) -> Result<Mmap> {
    let path = path.as_ref();
    let file = File::open(path)?;

    let len = file.metadata()?.len();
    if len == 0 {
        return Err(StrataError::corrupt(format!(
            "segment file {} is empty",
            path.display()
        )));
    }

    // The mapping is read-only and segment files are never modified after
    // they are written.
    let mmap = unsafe { MmapOptions::new().map(&file)? };

    Ok(mmap)
}

/// Create (or truncate) a segment file for writing.
pub fn create_output<P: AsRef<Path>>(path: P) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path.as_ref())?;

    Ok(BufWriter::new(file))
}

/// Flush buffered bytes and sync the file to disk.
pub fn finish_output(mut output: BufWriter<File>) -> Result<()> {
    output.flush()?;
    let file = output
        .into_inner()
        .map_err(|e| StrataError::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(())
}

/// Write a complete in-memory segment image to `path`.
pub fn write_file<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let result = create_output(path).and_then(|mut output| {
        output.write_all(bytes)?;
        finish_output(output)
    });

    if result.is_err() {
        remove_partial(path);
    }
    result
}

/// Best-effort removal of a partially written file.
pub fn remove_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("failed to remove partial segment {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_then_map() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.strata");

        write_file(&path, b"segment bytes").unwrap();
        let mmap = map_file(&path).unwrap();
        assert_eq!(&mmap[..], b"segment bytes");
    }

    #[test]
    fn test_map_empty_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.strata");
        std::fs::write(&path, b"").unwrap();

        assert!(map_file(&path).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_map_missing_file_is_io() {
        let dir = tempdir().unwrap();
        let err = map_file(dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, StrataError::Io(_)));
    }
}
