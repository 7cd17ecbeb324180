//! Chunked transfer encoding support
//!
//! Incremental decoder for response bodies sent with
//! `Transfer-Encoding: chunked`. Trailer fields are read and discarded.

use super::{Error, Result};
use bytes::BytesMut;

/// Longest chunk-size line accepted, extensions included
const MAX_CHUNK_LINE: usize = 4096;

/// Find the next CRLF in a buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Chunked decoder
pub struct ChunkedDecoder {
    state: DecoderState,
    chunk_remaining: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecoderState {
    ChunkSize,
    ChunkData,
    ChunkEnd,
    Trailer,
    Complete,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        ChunkedDecoder {
            state: DecoderState::ChunkSize,
            chunk_remaining: 0,
        }
    }

    /// Decode as much of `input` as possible, appending payload to `output`.
    ///
    /// Returns the number of input bytes consumed. Unconsumed bytes are an
    /// incomplete line and must be offered again with more data appended.
    pub fn decode(&mut self, input: &[u8], output: &mut BytesMut) -> Result<usize> {
        let mut pos = 0;

        while pos < input.len() {
            let rest = &input[pos..];
            match self.state {
                DecoderState::ChunkSize => {
                    let Some(crlf_pos) = find_crlf(rest) else {
                        if rest.len() > MAX_CHUNK_LINE {
                            return Err(Error::InvalidChunkSize("chunk line too long".to_string()));
                        }
                        break;
                    };

                    let line = String::from_utf8_lossy(&rest[..crlf_pos]);
                    let size_str = line.split(';').next().unwrap_or_default().trim();
                    self.chunk_remaining = usize::from_str_radix(size_str, 16)
                        .map_err(|_| Error::InvalidChunkSize(size_str.to_string()))?;

                    pos += crlf_pos + 2;
                    self.state = if self.chunk_remaining == 0 {
                        DecoderState::Trailer
                    } else {
                        DecoderState::ChunkData
                    };
                }

                DecoderState::ChunkData => {
                    let to_copy = self.chunk_remaining.min(rest.len());
                    output.extend_from_slice(&rest[..to_copy]);
                    pos += to_copy;
                    self.chunk_remaining -= to_copy;

                    if self.chunk_remaining == 0 {
                        self.state = DecoderState::ChunkEnd;
                    }
                }

                DecoderState::ChunkEnd => {
                    if rest.len() < 2 {
                        break;
                    }
                    if &rest[..2] != b"\r\n" {
                        return Err(Error::Protocol("Expected CRLF after chunk".to_string()));
                    }
                    pos += 2;
                    self.state = DecoderState::ChunkSize;
                }

                DecoderState::Trailer => {
                    let Some(crlf_pos) = find_crlf(rest) else {
                        break;
                    };
                    pos += crlf_pos + 2;
                    if crlf_pos == 0 {
                        self.state = DecoderState::Complete;
                    }
                }

                DecoderState::Complete => break,
            }
        }

        Ok(pos)
    }

    /// Check if the terminating chunk and trailers have been read
    pub fn is_complete(&self) -> bool {
        self.state == DecoderState::Complete
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}
