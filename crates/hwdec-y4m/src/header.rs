//! YUV4MPEG2 stream and frame header parsing.
//!
//! ```text
//!   YUV4MPEG2 W1920 H1080 F30000:1001 Ip A1:1 C420jpeg\n
//!   FRAME\n <w*h luma> <w/2*h/2 Cb> <w/2*h/2 Cr>
//!   FRAME\n ...
//! ```

use thiserror::Error;

pub const STREAM_MAGIC: &[u8] = b"YUV4MPEG2";
pub const FRAME_MAGIC: &[u8] = b"FRAME";

/// Longest header line accepted before giving up on finding `\n`.
const MAX_HEADER_LINE: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    /// The line terminator has not arrived yet.
    #[error("header incomplete")]
    Incomplete,

    #[error("malformed header: {0}")]
    Invalid(String),

    #[error("unsupported stream: {0}")]
    Unsupported(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamHeader {
    pub width: u32,
    pub height: u32,
    /// Frame rate as numerator / denominator, when present.
    pub frame_rate: Option<(u32, u32)>,
}

impl StreamHeader {
    /// Bytes of one I420 frame payload.
    pub fn frame_size(&self) -> usize {
        let (w, h) = (self.width as usize, self.height as usize);
        w * h + 2 * (w / 2) * (h / 2)
    }
}

fn line(buf: &[u8]) -> Result<&[u8], HeaderError> {
    match buf.iter().position(|&b| b == b'\n') {
        Some(end) => Ok(&buf[..end]),
        None if buf.len() > MAX_HEADER_LINE => {
            Err(HeaderError::Invalid("header line too long".into()))
        }
        None => Err(HeaderError::Incomplete),
    }
}

fn number(tag: char, value: &str) -> Result<u32, HeaderError> {
    value
        .parse()
        .map_err(|_| HeaderError::Invalid(format!("bad {tag} value '{value}'")))
}

/// Parse the stream header at the start of `buf`.
///
/// Returns the header and the number of bytes it spans, newline included.
pub fn parse_stream_header(buf: &[u8]) -> Result<(StreamHeader, usize), HeaderError> {
    if buf.len() < STREAM_MAGIC.len() {
        return if STREAM_MAGIC.starts_with(buf) {
            Err(HeaderError::Incomplete)
        } else {
            Err(HeaderError::Invalid("not a YUV4MPEG2 stream".into()))
        };
    }
    if !buf.starts_with(STREAM_MAGIC) {
        return Err(HeaderError::Invalid("not a YUV4MPEG2 stream".into()));
    }
    let line = line(buf)?;
    let text = std::str::from_utf8(line)
        .map_err(|_| HeaderError::Invalid("header is not ASCII".into()))?;

    let mut width = None;
    let mut height = None;
    let mut frame_rate = None;
    for token in text.split_ascii_whitespace().skip(1) {
        let mut chars = token.chars();
        let Some(tag) = chars.next() else { continue };
        let value = chars.as_str();
        match tag {
            'W' => width = Some(number(tag, value)?),
            'H' => height = Some(number(tag, value)?),
            'F' => {
                let (num, den) = value
                    .split_once(':')
                    .ok_or_else(|| HeaderError::Invalid(format!("bad frame rate '{value}'")))?;
                frame_rate = Some((number(tag, num)?, number(tag, den)?));
            }
            'C' => {
                if !value.starts_with("420") {
                    return Err(HeaderError::Unsupported(format!("chroma '{value}'")));
                }
            }
            'I' => {
                if !matches!(value, "p" | "?") {
                    return Err(HeaderError::Unsupported(format!("interlacing '{value}'")));
                }
            }
            // Aspect ratio and extensions do not affect decoding.
            _ => {}
        }
    }

    let width = width.ok_or_else(|| HeaderError::Invalid("missing W".into()))?;
    let height = height.ok_or_else(|| HeaderError::Invalid("missing H".into()))?;
    if width == 0 || height == 0 {
        return Err(HeaderError::Invalid(format!("empty frame {width}x{height}")));
    }
    if width % 2 != 0 || height % 2 != 0 {
        return Err(HeaderError::Unsupported(format!(
            "odd frame size {width}x{height}"
        )));
    }
    Ok((
        StreamHeader {
            width,
            height,
            frame_rate,
        },
        line.len() + 1,
    ))
}

/// Length of the `FRAME` header line at the start of `buf`.
pub fn parse_frame_header(buf: &[u8]) -> Result<usize, HeaderError> {
    let prefix = buf.len().min(FRAME_MAGIC.len());
    if buf[..prefix] != FRAME_MAGIC[..prefix] {
        return Err(HeaderError::Invalid("missing FRAME marker".into()));
    }
    if buf.len() < FRAME_MAGIC.len() {
        return Err(HeaderError::Incomplete);
    }
    Ok(line(buf)?.len() + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_header() {
        let buf = b"YUV4MPEG2 W64 H32 F30000:1001 Ip A1:1 C420jpeg XYSCSS=420JPEG\nFRAME";
        let (h, len) = parse_stream_header(buf).expect("header");
        assert_eq!((h.width, h.height), (64, 32));
        assert_eq!(h.frame_rate, Some((30000, 1001)));
        assert_eq!(&buf[len..], b"FRAME");
        assert_eq!(h.frame_size(), 64 * 32 * 3 / 2);
    }

    #[test]
    fn chroma_defaults_to_420() {
        let (h, _) = parse_stream_header(b"YUV4MPEG2 W2 H2\n").expect("header");
        assert_eq!(h.frame_rate, None);
    }

    #[test]
    fn partial_header_is_incomplete() {
        assert_eq!(parse_stream_header(b"YUV4"), Err(HeaderError::Incomplete));
        assert_eq!(
            parse_stream_header(b"YUV4MPEG2 W64 H3"),
            Err(HeaderError::Incomplete)
        );
    }

    #[test]
    fn rejects_other_chroma_and_odd_sizes() {
        assert!(matches!(
            parse_stream_header(b"YUV4MPEG2 W64 H32 C444\n"),
            Err(HeaderError::Unsupported(_))
        ));
        assert!(matches!(
            parse_stream_header(b"YUV4MPEG2 W63 H32\n"),
            Err(HeaderError::Unsupported(_))
        ));
        assert!(matches!(
            parse_stream_header(b"RIFF....\n"),
            Err(HeaderError::Invalid(_))
        ));
        assert!(matches!(
            parse_stream_header(b"YUV4MPEG2 H32\n"),
            Err(HeaderError::Invalid(_))
        ));
    }

    #[test]
    fn frame_header_lengths() {
        assert_eq!(parse_frame_header(b"FRAME\nxyz"), Ok(6));
        assert_eq!(parse_frame_header(b"FRAME Ixyz\n"), Ok(11));
        assert_eq!(parse_frame_header(b"FRA"), Err(HeaderError::Incomplete));
        assert_eq!(parse_frame_header(b"FRAME"), Err(HeaderError::Incomplete));
        assert!(matches!(
            parse_frame_header(b"FRUIT\n"),
            Err(HeaderError::Invalid(_))
        ));
    }
}
