//! The file-source boundary.
//!
//! The sender needs a byte-addressable, length-known data source; the
//! receiver produces an equivalently-shaped reconstructed object plus the
//! declared name and MIME type. [`MemorySource`] serves data already in
//! memory; [`DiskSource`] streams from a file with positional reads so an
//! arbitrary-size file never loads fully into memory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::Mutex;

use crate::error::Result;

/// Default MIME type when the caller declares none.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// A readable data source for one outgoing file.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Declared file name.
    fn name(&self) -> &str;

    /// Declared MIME type.
    fn mime_type(&self) -> &str;

    /// Total length in bytes.
    fn len(&self) -> u64;

    /// Whether the source is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Callers only request ranges inside `[0, len())`; implementations
    /// should fail rather than short-read.
    async fn read_range(&self, offset: u64, len: usize) -> Result<Bytes>;
}

/// A file already resident in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    mime_type: String,
    data: Bytes,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
impl FileSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, offset: u64, len: usize) -> Result<Bytes> {
        let start = offset as usize;
        let end = start
            .checked_add(len)
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("range {offset}+{len} past end of {}-byte source", self.data.len()),
                )
            })?;
        Ok(self.data.slice(start..end))
    }
}

/// A file on disk, read with positional seek + read so only the requested
/// slice is ever held in memory.
pub struct DiskSource {
    path: PathBuf,
    name: String,
    mime_type: String,
    len: u64,
    file: Mutex<fs::File>,
}

impl DiskSource {
    /// Open `path` and capture its current length.
    ///
    /// The file name is taken from the path; the MIME type defaults to
    /// [`OCTET_STREAM`] and can be overridden with
    /// [`with_mime_type`](Self::with_mime_type).
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = fs::File::open(&path).await?;
        let len = file.metadata().await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        Ok(Self {
            path,
            name,
            mime_type: OCTET_STREAM.to_string(),
            len,
            file: Mutex::new(file),
        })
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FileSource for DiskSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn len(&self) -> u64 {
        self.len
    }

    async fn read_range(&self, offset: u64, len: usize) -> Result<Bytes> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

/// A fully reassembled incoming file.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    /// Name declared in the sender's metadata.
    pub name: String,
    /// MIME type declared in the sender's metadata.
    pub mime_type: String,
    /// The reconstructed bytes, identical to the sender's source.
    pub data: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_source_slices_by_range() {
        let src = MemorySource::new("a.bin", OCTET_STREAM, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(src.len(), 6);
        assert_eq!(src.read_range(2, 3).await.unwrap().as_ref(), &[2, 3, 4]);
        assert!(src.read_range(4, 3).await.is_err());
    }

    #[tokio::test]
    async fn disk_source_reads_positionally() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("blob.bin");
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        std::fs::write(&path, &data)?;

        let src = DiskSource::open(&path).await?.with_mime_type("image/png");
        assert_eq!(src.len(), 10_000);
        assert_eq!(src.name(), "blob.bin");
        assert_eq!(src.mime_type(), "image/png");

        // Out-of-order reads must return the right slices.
        assert_eq!(src.read_range(9_000, 1_000).await?.as_ref(), &data[9_000..]);
        assert_eq!(src.read_range(0, 16).await?.as_ref(), &data[..16]);
        Ok(())
    }
}
