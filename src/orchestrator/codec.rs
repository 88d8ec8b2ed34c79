//! Line framing for rclone output.
//!
//! rclone redraws its stats block with carriage returns, so a frame ends at
//! either `\r` or `\n`. Empty frames are skipped and invalid UTF-8 is
//! replaced rather than rejected.

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// Longest line kept before the buffer is flushed as a frame anyway.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct OutputLineCodec {
    max_line_length: usize,
}

impl Default for OutputLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputLineCodec {
    pub fn new() -> Self {
        Self {
            max_line_length: MAX_LINE_LENGTH,
        }
    }

    pub fn with_max_length(max_line_length: usize) -> Self {
        Self {
            max_line_length: max_line_length.max(1),
        }
    }
}

fn to_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

impl Decoder for OutputLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            match src.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(0) => src.advance(1),
                Some(end) => {
                    let frame = src.split_to(end);
                    src.advance(1);
                    return Ok(Some(to_line(&frame)));
                }
                None if src.len() >= self.max_line_length => {
                    let frame = src.split_to(self.max_line_length);
                    return Ok(Some(to_line(&frame)));
                }
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split();
        Ok(Some(to_line(&rest)))
    }
}
