//! YUV4MPEG2 stream writer.

use std::io::Write;

use hwdec_core::error::{EngineError, Result};

use crate::header::StreamHeader;

/// Writes an I420 YUV4MPEG2 stream into any [`Write`] sink.
pub struct Y4mWriter<W: Write> {
    inner: W,
    header: StreamHeader,
    frames_written: u64,
}

impl<W: Write> Y4mWriter<W> {
    /// Write the stream header and return the writer.
    pub fn new(mut inner: W, header: StreamHeader) -> Result<Self> {
        if header.width % 2 != 0 || header.height % 2 != 0 || header.width == 0 {
            return Err(EngineError::Config(format!(
                "Y4M output needs even, non-empty dimensions, got {}x{}",
                header.width, header.height
            )));
        }
        let (num, den) = header.frame_rate.unwrap_or((30, 1));
        writeln!(
            inner,
            "YUV4MPEG2 W{} H{} F{num}:{den} Ip A1:1 C420jpeg",
            header.width, header.height
        )?;
        Ok(Self {
            inner,
            header,
            frames_written: 0,
        })
    }

    /// Append one planar I420 frame.
    pub fn write_frame(&mut self, i420: &[u8]) -> Result<()> {
        let expected = self.header.frame_size();
        if i420.len() != expected {
            return Err(EngineError::Config(format!(
                "frame payload is {} bytes, expected {expected}",
                i420.len()
            )));
        }
        self.inner.write_all(b"FRAME\n")?;
        self.inner.write_all(i420)?;
        self.frames_written += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Flush and hand back the sink.
    pub fn finish(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{parse_frame_header, parse_stream_header};

    #[test]
    fn written_stream_parses_back() {
        let header = StreamHeader {
            width: 4,
            height: 2,
            frame_rate: Some((25, 1)),
        };
        let mut w = Y4mWriter::new(Vec::new(), header).expect("writer");
        w.write_frame(&[7u8; 12]).expect("frame");
        assert_eq!(w.frames_written(), 1);
        let bytes = w.finish().expect("finish");

        let (parsed, len) = parse_stream_header(&bytes).expect("header");
        assert_eq!(parsed, header);
        let frame = parse_frame_header(&bytes[len..]).expect("frame header");
        assert_eq!(bytes.len(), len + frame + 12);
    }

    #[test]
    fn rejects_wrong_payload_size() {
        let header = StreamHeader {
            width: 4,
            height: 2,
            frame_rate: None,
        };
        let mut w = Y4mWriter::new(Vec::new(), header).expect("writer");
        assert!(w.write_frame(&[0u8; 11]).is_err());
        assert!(Y4mWriter::new(Vec::new(), StreamHeader { width: 3, ..header }).is_err());
    }
}
