use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unable to find microcode for processor vendor {0}")]
    UnsupportedVendor(String),

    #[error("CPU detection is only supported on x86 and x86_64")]
    UnsupportedArch,

    #[error("CPUID leaf 1 (family/model/stepping) is not available")]
    MissingFeatureInfo,

    #[error("invalid CPU signature '{0}', expected <intel|amd>:<family>-<model>-<stepping> in hex")]
    InvalidSignature(String),

    #[error("no files found for {0}")]
    NoFiles(String),

    #[error("invalid file pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("microcode for {name} is {size} bytes, larger than a cpio entry can hold")]
    TooLarge { name: String, size: usize },

    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write archive entry {name}")]
    Archive {
        name: String,
        #[source]
        source: io::Error,
    },
}
