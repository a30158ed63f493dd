//! Disk I/O helpers: load from file and atomic write.
//!
//! The rename-over approach is close to atomic on most platforms. On NTFS
//! (Windows) it's reliable; on FAT32 or network shares there are no hard
//! guarantees. Callers that need more than that should keep backups.

use crate::error::{Error, Result};
use crate::model::Document;
use crate::serializer::Serializer;
use std::io::Write;
use std::path::Path;

/// Reads and deserializes the document at `path`. Returns `None` if the file
/// is missing or empty, [`Error::Corrupt`] if it doesn't parse.
pub fn load<S: Serializer>(path: &Path, serializer: &S) -> Result<Option<Document>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(format!("{}: {e}", path.display()))),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serializer.deserialize(&bytes).map(Some)
}

/// Write `bytes` to `tmp` and then rename over `path`. A crash mid-write
/// leaves the previous document intact; only a fully written file is ever
/// moved into place. Missing parent directories are created.
pub fn atomic_write(path: &Path, tmp: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::Io(format!("{}: {e}", parent.display())))?;
    }
    let write_tmp = || -> std::io::Result<()> {
        let mut file = std::fs::File::create(tmp)?;
        file.write_all(bytes)?;
        file.sync_all()
    };
    if let Err(e) = write_tmp() {
        let _ = std::fs::remove_file(tmp);
        return Err(Error::Io(format!("{}: {e}", tmp.display())));
    }
    std::fs::rename(tmp, path).map_err(|e| Error::Io(format!("{}: {e}", path.display())))
}
