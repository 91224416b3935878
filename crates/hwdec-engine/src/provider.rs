//! Compressed-byte suppliers.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use hwdec_core::codec_traits::DataProvider;
use hwdec_core::error::{EngineError, Result};

/// Reads a file front to back, closing it at end of file or on error.
pub struct FileDataProvider {
    reader: Option<BufReader<File>>,
    path: PathBuf,
    bytes_read: u64,
}

impl FileDataProvider {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(EngineError::Config("input path is empty".into()));
        }
        let file = File::open(path).map_err(|err| {
            EngineError::Config(format!("failed to open input {}: {err}", path.display()))
        })?;
        info!(path = %path.display(), "Input opened");
        Ok(Self {
            reader: Some(BufReader::with_capacity(1 << 20, file)),
            path: path.to_path_buf(),
            bytes_read: 0,
        })
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!(path = %self.path.display(), bytes = self.bytes_read, "Input closed");
        }
    }
}

impl DataProvider for FileDataProvider {
    fn provide_data(&mut self, out: &mut [u8]) -> Result<usize> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(0);
        };
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            match reader.read(out) {
                Ok(0) => {
                    self.close();
                    return Ok(0);
                }
                Ok(n) => {
                    self.bytes_read += n as u64;
                    return Ok(n);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.close();
                    return Err(err.into());
                }
            }
        }
    }

    fn empty(&self) -> bool {
        self.reader.is_none()
    }
}

/// Serves an in-memory buffer, optionally in bounded chunks.
pub struct MemoryDataProvider {
    data: Vec<u8>,
    pos: usize,
    chunk: Option<usize>,
}

impl MemoryDataProvider {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
            chunk: None,
        }
    }

    /// Hand out at most `chunk` bytes per call.
    pub fn with_chunk_size(mut self, chunk: usize) -> Self {
        self.chunk = Some(chunk.max(1));
        self
    }
}

impl DataProvider for MemoryDataProvider {
    fn provide_data(&mut self, out: &mut [u8]) -> Result<usize> {
        let left = &self.data[self.pos..];
        let n = left
            .len()
            .min(out.len())
            .min(self.chunk.unwrap_or(usize::MAX));
        out[..n].copy_from_slice(&left[..n]);
        self.pos += n;
        Ok(n)
    }

    fn empty(&self) -> bool {
        self.pos >= self.data.len()
    }
}
