//! Compressed input buffer shared between the engine and the decoder.

use tracing::{debug, warn};

use crate::codec_traits::DataProvider;
use crate::error::Result;
use crate::status::Status;
use crate::types::CodecId;

/// Fixed-capacity byte buffer with a consumed prefix and a valid window.
///
/// ```text
///   0          offset          offset+length      capacity
///   |-consumed-|----valid-------|------free--------|
/// ```
#[derive(Debug)]
pub struct Bitstream {
    data: Vec<u8>,
    offset: usize,
    length: usize,
    codec: CodecId,
}

impl Bitstream {
    pub fn new(capacity: usize, codec: CodecId) -> Self {
        Self {
            data: vec![0u8; capacity],
            offset: 0,
            length: 0,
            codec,
        }
    }

    pub fn codec(&self) -> CodecId {
        self.codec
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn data_offset(&self) -> usize {
        self.offset
    }

    pub fn data_length(&self) -> usize {
        self.length
    }

    /// Unconsumed bytes.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.length]
    }

    /// Mark `n` bytes of the valid window as consumed by the decoder.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.length);
        self.offset += n;
        self.length -= n;
    }

    /// Pull more bytes from `provider` after moving leftovers to the front.
    ///
    /// Returns `MORE_DATA` when there is no provider or nothing is buffered,
    /// `NOT_ENOUGH_BUFFER` when the window is corrupt. A failed read is
    /// returned as the provider's error; buffered bytes are kept.
    pub fn refill(
        &mut self,
        provider: Option<&mut (dyn DataProvider + 'static)>,
    ) -> Result<Status> {
        let Some(provider) = provider else {
            return Ok(Status::MORE_DATA);
        };

        let capacity = self.data.len();
        let end = match self.offset.checked_add(self.length) {
            Some(end) if end <= capacity => end,
            _ => {
                warn!(
                    offset = self.offset,
                    length = self.length,
                    capacity,
                    "Bitstream window exceeds buffer"
                );
                return Ok(Status::NOT_ENOUGH_BUFFER);
            }
        };

        if self.offset > 0 {
            self.data.copy_within(self.offset..end, 0);
            self.offset = 0;
        }

        let free = capacity - self.length;
        self.length += provider.provide_data(&mut self.data[self.length..self.length + free])?;

        if self.length == 0 {
            debug!("Bitstream drained");
            return Ok(Status::MORE_DATA);
        }
        Ok(Status::NONE)
    }

    #[cfg(test)]
    pub(crate) fn corrupt_window(&mut self, offset: usize, length: usize) {
        self.offset = offset;
        self.length = length;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    struct Chunks {
        chunks: Vec<Vec<u8>>,
    }

    impl DataProvider for Chunks {
        fn provide_data(&mut self, out: &mut [u8]) -> Result<usize> {
            if self.chunks.is_empty() {
                return Ok(0);
            }
            let chunk = self.chunks.remove(0);
            let n = chunk.len().min(out.len());
            out[..n].copy_from_slice(&chunk[..n]);
            Ok(n)
        }

        fn empty(&self) -> bool {
            self.chunks.is_empty()
        }
    }

    #[test]
    fn no_provider_means_more_data() {
        let mut bs = Bitstream::new(16, CodecId::HEVC);
        assert_eq!(bs.refill(None).expect("refill"), Status::MORE_DATA);
    }

    #[test]
    fn leftovers_move_to_front() {
        let mut bs = Bitstream::new(8, CodecId::HEVC);
        let mut provider = Chunks {
            chunks: vec![b"abcdef".to_vec(), b"gh".to_vec()],
        };
        assert_eq!(bs.refill(Some(&mut provider)).expect("refill"), Status::NONE);
        bs.consume(4);
        assert_eq!(bs.remaining(), b"ef");

        assert_eq!(bs.refill(Some(&mut provider)).expect("refill"), Status::NONE);
        assert_eq!(bs.data_offset(), 0);
        assert_eq!(bs.remaining(), b"efgh");
    }

    #[test]
    fn empty_read_with_empty_buffer_is_more_data() {
        let mut bs = Bitstream::new(8, CodecId::HEVC);
        let mut provider = Chunks { chunks: vec![] };
        assert_eq!(bs.refill(Some(&mut provider)).expect("refill"), Status::MORE_DATA);
    }

    #[test]
    fn empty_read_with_leftovers_is_ok() {
        let mut bs = Bitstream::new(8, CodecId::HEVC);
        let mut provider = Chunks {
            chunks: vec![b"xyz".to_vec()],
        };
        bs.refill(Some(&mut provider)).expect("refill");
        assert_eq!(bs.refill(Some(&mut provider)).expect("refill"), Status::NONE);
        assert_eq!(bs.remaining(), b"xyz");
    }

    #[test]
    fn overflowing_window_is_not_enough_buffer() {
        let mut bs = Bitstream::new(8, CodecId::HEVC);
        bs.corrupt_window(6, 4);
        let mut provider = Chunks { chunks: vec![] };
        assert_eq!(bs.refill(Some(&mut provider)).expect("refill"), Status::NOT_ENOUGH_BUFFER);
    }

    struct FailsAfterFirst {
        served: bool,
    }

    impl DataProvider for FailsAfterFirst {
        fn provide_data(&mut self, out: &mut [u8]) -> Result<usize> {
            if self.served {
                return Err(EngineError::DataProvider(std::io::Error::other("device unplugged")));
            }
            self.served = true;
            out[..3].copy_from_slice(b"abc");
            Ok(3)
        }

        fn empty(&self) -> bool {
            false
        }
    }

    #[test]
    fn read_failure_is_returned_and_keeps_buffered_bytes() {
        let mut bs = Bitstream::new(8, CodecId::HEVC);
        let mut provider = FailsAfterFirst { served: false };
        assert_eq!(bs.refill(Some(&mut provider)).expect("first read"), Status::NONE);
        bs.consume(1);

        let err = bs.refill(Some(&mut provider)).expect_err("second read fails");
        assert!(matches!(err, EngineError::DataProvider(_)));
        assert_eq!(bs.remaining(), b"bc");
    }
}
