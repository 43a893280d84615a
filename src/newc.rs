//! Read/write `newc` (SVR4, magic `070701`) format archives.
//!
//! This is the format the Linux kernel unpacks for the initramfs, including
//! the uncompressed early microcode archive prepended to it.

use std::io::{self, Read, Write};

const HEADER_LEN: usize = 110;

const MAGIC_NUMBER: &[u8] = b"070701";

const TRAILER_NAME: &str = "TRAILER!!!";

/// File type bits of an entry's mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeFileType {
    Fifo,
    Char,
    Directory,
    Block,
    Regular,
    NetworkSpecial,
    Symlink,
    Socket,
}

impl ModeFileType {
    pub const MASK: u32 = 0o170000;
}

impl From<ModeFileType> for u32 {
    fn from(m: ModeFileType) -> u32 {
        match m {
            ModeFileType::Fifo => 0o010000,
            ModeFileType::Char => 0o020000,
            ModeFileType::Directory => 0o040000,
            ModeFileType::Block => 0o060000,
            ModeFileType::Regular => 0o100000,
            ModeFileType::NetworkSpecial => 0o110000,
            ModeFileType::Symlink => 0o120000,
            ModeFileType::Socket => 0o140000,
        }
    }
}

/// Number of zero bytes needed to bring `len` to a 4 byte boundary.
fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

fn invalid_data(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Builds metadata for one entry to be written into an archive.
///
/// Owner, device and checksum fields are always written as zero.
#[derive(Debug, Clone)]
pub struct Builder {
    name: String,
    ino: u32,
    mode: u32,
    nlink: u32,
    mtime: u32,
}

impl Builder {
    pub fn new(name: &str) -> Builder {
        Builder {
            name: name.to_string(),
            ino: 0,
            mode: 0,
            nlink: 1,
            mtime: 0,
        }
    }

    pub fn ino(mut self, ino: u32) -> Builder {
        self.ino = ino;
        self
    }

    /// Sets the full mode, file type bits included.
    pub fn mode(mut self, mode: u32) -> Builder {
        self.mode = mode;
        self
    }

    pub fn nlink(mut self, nlink: u32) -> Builder {
        self.nlink = nlink;
        self
    }

    /// Sets the modification time, in seconds since the Unix epoch.
    pub fn mtime(mut self, mtime: u32) -> Builder {
        self.mtime = mtime;
        self
    }

    /// Replaces the file type bits, leaving the permission bits alone.
    pub fn file_type(mut self, file_type: ModeFileType) -> Builder {
        self.mode = (self.mode & !ModeFileType::MASK) | u32::from(file_type);
        self
    }

    /// Starts an entry whose body is exactly `file_size` bytes long.
    pub fn write<W: Write>(self, inner: W, file_size: u32) -> Writer<W> {
        Writer {
            inner,
            pending_header: Some(self.encode_header(file_size)),
            written: 0,
            file_size,
        }
    }

    fn encode_header(&self, file_size: u32) -> Vec<u8> {
        let name_len = self.name.len() + 1;
        let fields = [
            self.ino,
            self.mode,
            // entries are always owned by root
            0,
            0,
            self.nlink,
            self.mtime,
            file_size,
            // dev and rdev major/minor
            0,
            0,
            0,
            0,
            name_len as u32,
            // c_check is only meaningful for the "070702" variant
            0,
        ];

        let mut header = Vec::with_capacity(HEADER_LEN + name_len + 3);
        header.extend_from_slice(MAGIC_NUMBER);
        for field in fields {
            header.extend_from_slice(format!("{field:08x}").as_bytes());
        }
        header.extend_from_slice(self.name.as_bytes());
        header.push(0);
        header.resize(header.len() + padding(HEADER_LEN + name_len), 0);
        header
    }
}

/// Writes one entry header/data into an archive.
///
/// The header is emitted lazily on the first body write or on `finish`.
pub struct Writer<W: Write> {
    inner: W,
    pending_header: Option<Vec<u8>>,
    written: u32,
    file_size: u32,
}

impl<W: Write> Writer<W> {
    fn flush_header(&mut self) -> io::Result<()> {
        if let Some(header) = self.pending_header.take() {
            self.inner.write_all(&header)?;
        }
        Ok(())
    }

    /// Pads the body and hands back the underlying stream, positioned for
    /// the next entry.
    pub fn finish(mut self) -> io::Result<W> {
        self.flush_header()?;
        if self.written != self.file_size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "entry body is {} bytes short of its declared size",
                    self.file_size - self.written
                ),
            ));
        }
        let pad = padding(self.file_size as usize);
        if pad > 0 {
            self.inner.write_all(&[0u8; 3][..pad])?;
        }
        Ok(self.inner)
    }
}

impl<W: Write> Write for Writer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let remaining = (self.file_size - self.written) as usize;
        if buf.len() > remaining {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "trying to write more than the specified file size",
            ));
        }
        self.flush_header()?;
        let n = self.inner.write(buf)?;
        self.written += n as u32;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Writes a trailer entry into an archive.
pub fn trailer<W: Write>(w: W) -> io::Result<W> {
    Builder::new(TRAILER_NAME).write(w, 0).finish()
}

/// Metadata about one entry from an archive.
#[derive(Debug, Clone)]
pub struct Entry {
    name: String,
    ino: u32,
    mode: u32,
    uid: u32,
    gid: u32,
    nlink: u32,
    mtime: u32,
    file_size: u32,
}

impl Entry {
    /// Returns the name of the file.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the inode number of the file.
    pub fn ino(&self) -> u32 {
        self.ino
    }

    /// Returns the full mode, file type bits included.
    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Returns the UID of the file's owner.
    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// Returns the GID of the file's group.
    pub fn gid(&self) -> u32 {
        self.gid
    }

    /// Returns the number of links to the file.
    pub fn nlink(&self) -> u32 {
        self.nlink
    }

    /// Returns the modification time, in seconds since the Unix epoch.
    pub fn mtime(&self) -> u32 {
        self.mtime
    }

    /// Returns the size of the file body, in bytes.
    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.mode & ModeFileType::MASK == u32::from(ModeFileType::Regular)
    }

    /// Returns true if this is the trailer entry ending the archive.
    pub fn is_trailer(&self) -> bool {
        self.name == TRAILER_NAME
    }
}

fn read_hex_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    let text = std::str::from_utf8(&bytes).map_err(|_| invalid_data("non-ASCII header field"))?;
    u32::from_str_radix(text, 16).map_err(|_| invalid_data("invalid hex header field"))
}

fn skip<R: Read>(reader: &mut R, len: u64) -> io::Result<()> {
    let skipped = io::copy(&mut reader.by_ref().take(len), &mut io::sink())?;
    if skipped != len {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(())
}

/// Reads one entry header/data from an archive.
pub struct Reader<R: Read> {
    inner: R,
    entry: Entry,
    bytes_read: u32,
}

impl<R: Read> Reader<R> {
    /// Parses the next entry header and returns a reader over its body.
    pub fn new(mut inner: R) -> io::Result<Reader<R>> {
        let mut magic = [0u8; 6];
        inner.read_exact(&mut magic)?;
        if magic != MAGIC_NUMBER {
            return Err(invalid_data("invalid magic number"));
        }

        let mut fields = [0u32; 13];
        for field in fields.iter_mut() {
            *field = read_hex_u32(&mut inner)?;
        }
        let [ino, mode, uid, gid, nlink, mtime, file_size, _, _, _, _, name_len, _] = fields;
        let name_len = name_len as usize;

        let mut name = vec![0u8; name_len];
        inner.read_exact(&mut name)?;
        if name.pop() != Some(0) {
            return Err(invalid_data("entry name was not NUL-terminated"));
        }
        // some writers pad the name itself with extra NULs
        while name.last() == Some(&0) {
            name.pop();
        }
        let name = String::from_utf8(name).map_err(|_| invalid_data("entry name was not UTF-8"))?;
        skip(&mut inner, padding(HEADER_LEN + name_len) as u64)?;

        Ok(Reader {
            inner,
            entry: Entry {
                name,
                ino,
                mode,
                uid,
                gid,
                nlink,
                mtime,
                file_size,
            },
            bytes_read: 0,
        })
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Skips whatever is left of the body and returns the underlying reader
    /// positioned at the next entry.
    pub fn finish(mut self) -> io::Result<R> {
        let remaining = u64::from(self.entry.file_size - self.bytes_read);
        let pad = padding(self.entry.file_size as usize) as u64;
        skip(&mut self.inner, remaining + pad)?;
        Ok(self.inner)
    }
}

impl<R: Read> Read for Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = (self.entry.file_size - self.bytes_read) as usize;
        let limit = buf.len().min(remaining);
        if limit == 0 {
            return Ok(0);
        }
        let n = self.inner.read(&mut buf[..limit])?;
        self.bytes_read += n as u32;
        Ok(n)
    }
}
