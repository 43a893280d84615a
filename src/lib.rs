//! Builds the uncompressed CPIO archive the Linux kernel scans for early
//! microcode updates (`kernel/x86/microcode/<vendor>.bin`).

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use tracing::{info, warn};

use crate::image::{vendor_image_path, IMAGE_UCODE_DIR};

pub mod cpu;
pub mod error;
pub mod firmware;
pub mod image;
pub mod newc;
pub mod output;

pub use cpu::{Signature, Vendor};
pub use error::{Error, Result};
pub use firmware::HostLayout;
pub use image::Image;
pub use newc::Builder as NewcBuilder;
pub use newc::Reader as NewcReader;

/// Which microcode ends up in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Every microcode file of every vendor found on the host.
    Universal,
    /// Only the blob matching one CPU; `None` means the running one.
    Host(Option<Signature>),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub output: PathBuf,
    pub mode: Mode,
    pub layout: HostLayout,
    /// Raw `$SOURCE_DATE_EPOCH`, if set.
    pub source_date_epoch: Option<String>,
}

/// Writes the microcode archive described by `config` to `config.output`.
///
/// The output only changes if the whole archive was produced.
pub fn generate(config: &Config) -> Result<()> {
    let mtime = output::modification_time(config.source_date_epoch.as_deref());
    let file = output::AtomicFile::create(&config.output)?;
    let mut image = Image::new(file, mtime);

    image.mkpath(IMAGE_UCODE_DIR)?;
    match config.mode {
        Mode::Universal => add_all_ucode_files(&mut image, &config.layout)?,
        Mode::Host(sig) => {
            let sig = match sig {
                Some(sig) => sig,
                None => cpu::detect()?,
            };
            add_host_ucode_file(&mut image, &config.layout, &sig)?;
        }
    }

    let file = image.finish()?;
    let dest = file.path().to_path_buf();
    file.commit()?;
    info!(output = %dest.display(), "wrote microcode image");
    Ok(())
}

fn add_all_ucode_files<W: Write>(image: &mut Image<W>, layout: &HostLayout) -> Result<()> {
    for vendor in [Vendor::Intel, Vendor::Amd] {
        let dir = layout.vendor_dir(vendor);
        match fs::metadata(dir) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(dir = %dir.display(), "no {vendor} microcode directory, skipping");
                continue;
            }
            Err(source) => {
                return Err(Error::Read {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        }
        let content = firmware::read_files_content(&layout.all_files_pattern(vendor))?;
        info!(%vendor, size = content.len(), "adding all microcode");
        image.append_file(vendor_image_path(vendor), &content)?;
    }
    Ok(())
}

fn add_host_ucode_file<W: Write>(
    image: &mut Image<W>,
    layout: &HostLayout,
    sig: &Signature,
) -> Result<()> {
    let path = layout.host_file(sig);
    info!(cpu = %sig, file = %path.display(), "adding host microcode");
    let content = firmware::read_files_content(&firmware::literal_pattern(&path))?;
    image.append_file(vendor_image_path(sig.vendor), &content)
}
