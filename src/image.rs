//! Lays microcode out the way the kernel's early loader looks for it.

use std::io::{self, Write};

use tracing::debug;

use crate::cpu::Vendor;
use crate::error::{Error, Result};
use crate::newc::{self, Builder, ModeFileType};

pub const IMAGE_UCODE_DIR: &str = "kernel/x86/microcode";
pub const IMAGE_UCODE_INTEL: &str = "kernel/x86/microcode/GenuineIntel.bin";
pub const IMAGE_UCODE_AMD: &str = "kernel/x86/microcode/AuthenticAMD.bin";

const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

/// In-archive path of the blob for `vendor`.
pub fn vendor_image_path(vendor: Vendor) -> &'static str {
    match vendor {
        Vendor::Intel => IMAGE_UCODE_INTEL,
        Vendor::Amd => IMAGE_UCODE_AMD,
    }
}

fn archive_err(name: &str) -> impl FnOnce(io::Error) -> Error + '_ {
    move |source| Error::Archive {
        name: name.to_owned(),
        source,
    }
}

/// An early microcode archive being written to `W`.
///
/// Every entry carries the same modification time and a fresh inode number.
pub struct Image<W: Write> {
    out: W,
    mtime: u32,
    next_ino: u32,
}

impl<W: Write> Image<W> {
    pub fn new(out: W, mtime: u32) -> Image<W> {
        Image {
            out,
            mtime,
            next_ino: 1,
        }
    }

    fn entry(&mut self, name: &str, file_type: ModeFileType, perm: u32) -> Builder {
        let ino = self.next_ino;
        self.next_ino += 1;
        let nlink = if file_type == ModeFileType::Directory { 2 } else { 1 };
        Builder::new(name)
            .ino(ino)
            .mode(perm)
            .file_type(file_type)
            .nlink(nlink)
            .mtime(self.mtime)
    }

    /// Writes a directory entry for every prefix of `dir`, outermost first.
    pub fn mkpath(&mut self, dir: &str) -> Result<()> {
        let mut curr = String::new();
        for elem in dir.split('/').filter(|elem| !elem.is_empty()) {
            if !curr.is_empty() {
                curr.push('/');
            }
            curr.push_str(elem);

            let builder = self.entry(&curr, ModeFileType::Directory, DIR_MODE);
            builder
                .write(&mut self.out, 0)
                .finish()
                .map_err(archive_err(&curr))?;
            debug!(name = %curr, "added directory");
        }
        Ok(())
    }

    /// Writes one regular file entry holding `content`.
    pub fn append_file(&mut self, name: &str, content: &[u8]) -> Result<()> {
        let size = u32::try_from(content.len()).map_err(|_| Error::TooLarge {
            name: name.to_owned(),
            size: content.len(),
        })?;

        let builder = self.entry(name, ModeFileType::Regular, FILE_MODE);
        let mut writer = builder.write(&mut self.out, size);
        writer.write_all(content).map_err(archive_err(name))?;
        writer.finish().map_err(archive_err(name))?;
        debug!(name, size, "added file");
        Ok(())
    }

    /// Writes the trailer and returns the underlying stream.
    pub fn finish(mut self) -> Result<W> {
        newc::trailer(&mut self.out).map_err(archive_err("TRAILER!!!"))?;
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newc::Reader;
    use std::io::Read;

    struct Listed {
        name: String,
        ino: u32,
        mode: u32,
        mtime: u32,
        data: Vec<u8>,
    }

    fn list(mut archive: &[u8]) -> Vec<Listed> {
        let mut entries = Vec::new();
        loop {
            let mut reader = Reader::new(archive).unwrap();
            if reader.entry().is_trailer() {
                return entries;
            }
            let mut data = Vec::new();
            reader.read_to_end(&mut data).unwrap();
            let entry = reader.entry();
            assert_eq!((entry.uid(), entry.gid()), (0, 0));
            entries.push(Listed {
                name: entry.name().to_owned(),
                ino: entry.ino(),
                mode: entry.mode(),
                mtime: entry.mtime(),
                data,
            });
            archive = reader.finish().unwrap();
        }
    }

    #[test]
    fn microcode_layout() {
        let mut image = Image::new(Vec::new(), 1_520_598_896);
        image.mkpath(IMAGE_UCODE_DIR).unwrap();
        image.append_file(IMAGE_UCODE_INTEL, b"intel").unwrap();
        image.append_file(IMAGE_UCODE_AMD, b"amd blob").unwrap();
        let archive = image.finish().unwrap();

        let entries = list(&archive);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "kernel",
                "kernel/x86",
                "kernel/x86/microcode",
                IMAGE_UCODE_INTEL,
                IMAGE_UCODE_AMD,
            ]
        );

        for (idx, entry) in entries.iter().enumerate() {
            assert_eq!(entry.ino, idx as u32 + 1);
            assert_eq!(entry.mtime, 1_520_598_896);
        }
        assert_eq!(entries[0].mode, 0o040755);
        assert_eq!(entries[3].mode, 0o100644);
        assert_eq!(entries[3].data, b"intel");
        assert_eq!(entries[4].data, b"amd blob");
    }

    #[test]
    fn mkpath_ignores_stray_slashes() {
        let mut image = Image::new(Vec::new(), 0);
        image.mkpath("/kernel//x86/").unwrap();
        let archive = image.finish().unwrap();

        let names: Vec<_> = list(&archive).into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["kernel", "kernel/x86"]);
    }

    #[test]
    fn empty_file_entry() {
        let mut image = Image::new(Vec::new(), 0);
        image.append_file(IMAGE_UCODE_AMD, &[]).unwrap();
        let archive = image.finish().unwrap();
        assert_eq!(archive.len() % 4, 0);

        let entries = list(&archive);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].data.is_empty());
    }
}
