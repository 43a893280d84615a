//! Archive timestamps and the atomically replaced output file.

use std::fs::{self, Permissions};
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use time::OffsetDateTime;
use tracing::warn;

use crate::error::{Error, Result};

pub const SOURCE_DATE_EPOCH: &str = "SOURCE_DATE_EPOCH";

const OUTPUT_MODE: u32 = 0o644;

/// Timestamp stamped on every archive entry, as a 32-bit cpio mtime.
///
/// Honors `$SOURCE_DATE_EPOCH` (seconds since 1970) for reproducible builds,
/// see <https://reproducible-builds.org/docs/source-date-epoch/>. Any integer
/// is accepted and clamped; only a non-integer value falls back to now.
pub fn modification_time(source_date_epoch: Option<&str>) -> u32 {
    if let Some(raw) = source_date_epoch.filter(|raw| !raw.is_empty()) {
        match raw.parse::<i64>() {
            Ok(secs) => return cpio_mtime(secs),
            Err(_) => warn!("unable to parse ${SOURCE_DATE_EPOCH} value '{raw}'"),
        }
    }
    cpio_mtime(OffsetDateTime::now_utc().unix_timestamp())
}

/// Converts Unix seconds to the 32-bit cpio mtime, saturating outside
/// 1970..2106.
pub fn cpio_mtime(secs: i64) -> u32 {
    u32::try_from(secs.max(0)).unwrap_or(u32::MAX)
}

/// A file that only appears at its destination once `commit` succeeds.
///
/// Data goes to a temporary file next to the destination; dropping an
/// uncommitted `AtomicFile` deletes the temporary file and leaves any
/// existing destination untouched.
pub struct AtomicFile {
    dest: PathBuf,
    inner: BufWriter<NamedTempFile>,
}

impl AtomicFile {
    pub fn create(dest: &Path) -> Result<AtomicFile> {
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let write_err = |source: io::Error| Error::Write {
            path: dest.to_path_buf(),
            source,
        };

        let tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.as_file()
            .set_permissions(Permissions::from_mode(OUTPUT_MODE))
            .map_err(write_err)?;

        Ok(AtomicFile {
            dest: dest.to_path_buf(),
            inner: BufWriter::new(tmp),
        })
    }

    pub fn path(&self) -> &Path {
        &self.dest
    }

    /// Flushes, syncs and renames the temporary file over the destination.
    pub fn commit(self) -> Result<()> {
        let dest = self.dest;
        let write_err = |source: io::Error| Error::Write {
            path: dest.clone(),
            source,
        };

        let tmp = self
            .inner
            .into_inner()
            .map_err(|err| write_err(err.into_error()))?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&dest).map_err(|err| write_err(err.error))?;

        // make the rename itself durable
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        if let Err(err) = fs::File::open(dir).and_then(|dir| dir.sync_all()) {
            warn!(dir = %dir.display(), "failed to sync output directory: {err}");
        }
        Ok(())
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
