//! Locates microcode blobs installed on the host.

use std::fs;
use std::path::{Path, PathBuf};

use glob::Pattern;
use tracing::debug;

use crate::cpu::{Signature, Vendor};
use crate::error::{Error, Result};

pub const HOST_UCODE_DIR_INTEL: &str = "/lib/firmware/intel-ucode";
pub const HOST_UCODE_DIR_AMD: &str = "/lib/firmware/amd-ucode";

/// AMD ships one container per family starting with family 15h.
const AMD_PER_FAMILY_SINCE: u32 = 0x15;

/// Where the vendor microcode directories live on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLayout {
    pub intel_dir: PathBuf,
    pub amd_dir: PathBuf,
}

impl Default for HostLayout {
    fn default() -> Self {
        HostLayout {
            intel_dir: PathBuf::from(HOST_UCODE_DIR_INTEL),
            amd_dir: PathBuf::from(HOST_UCODE_DIR_AMD),
        }
    }
}

impl HostLayout {
    pub fn vendor_dir(&self, vendor: Vendor) -> &Path {
        match vendor {
            Vendor::Intel => &self.intel_dir,
            Vendor::Amd => &self.amd_dir,
        }
    }

    /// Glob matching every file in the vendor directory.
    pub fn all_files_pattern(&self, vendor: Vendor) -> String {
        format!("{}/*", escape_dir(self.vendor_dir(vendor)))
    }

    /// Path of the single file holding microcode for `sig`.
    pub fn host_file(&self, sig: &Signature) -> PathBuf {
        let name = match sig.vendor {
            Vendor::Intel => format!("{:02x}-{:02x}-{:02x}", sig.family, sig.model, sig.stepping),
            Vendor::Amd if sig.family >= AMD_PER_FAMILY_SINCE => {
                format!("microcode_amd_fam{:x}h.bin", sig.family)
            }
            Vendor::Amd => "microcode_amd.bin".to_owned(),
        };
        self.vendor_dir(sig.vendor).join(name)
    }
}

fn escape_dir(dir: &Path) -> String {
    Pattern::escape(&dir.to_string_lossy())
}

/// Exact-match pattern for a single path.
pub fn literal_pattern(path: &Path) -> String {
    escape_dir(path)
}

/// Concatenates every file matching `pattern`, in lexical path order.
///
/// Directories matched by the pattern are skipped.
pub fn read_files_content(pattern: &str) -> Result<Vec<u8>> {
    let paths = glob::glob(pattern).map_err(|source| Error::Pattern {
        pattern: pattern.to_owned(),
        source,
    })?;

    let mut content = Vec::new();
    let mut matched = 0usize;
    for entry in paths {
        let path = entry.map_err(|err| Error::Read {
            path: err.path().to_path_buf(),
            source: err.into(),
        })?;
        if path.is_dir() {
            debug!(path = %path.display(), "skipping directory");
            continue;
        }
        let bytes = fs::read(&path).map_err(|source| Error::Read {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), size = bytes.len(), "read microcode file");
        content.extend_from_slice(&bytes);
        matched += 1;
    }

    if matched == 0 {
        return Err(Error::NoFiles(pattern.to_owned()));
    }
    Ok(content)
}
