use miniz_oxide::{
    inflate::stream::{inflate, InflateState},
    DataFormat, MZError, MZFlush, MZStatus,
};
use snafu::prelude::*;

/// Every complete zlib-stream message ends with this sync flush marker.
pub const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

const OUTPUT_CHUNK: usize = 32 * 1024;

/// Error when inflate a compressed transport frame
#[derive(Debug, Snafu)]
#[snafu(display("inflate compressed frame failed: {error:?}"))]
pub struct InflateError {
    /// decompressor error code
    pub error: MZError,
}

/// Streaming decompressor for one gateway connection.
///
/// The whole connection is one deflate stream, so the dictionary carries over
/// between frames. A new connection must use a new `Inflater`.
pub struct Inflater {
    state: Box<InflateState>,
    pending: Vec<u8>,
    chunk: Vec<u8>,
    at_stream_start: bool,
}

impl std::fmt::Debug for Inflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inflater")
            .field("pending", &self.pending.len())
            .field("at_stream_start", &self.at_stream_start)
            .finish()
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

fn has_zlib_header(data: &[u8]) -> bool {
    data.len() >= 2
        && data[0] == 0x78
        && (u16::from(data[0]) * 256 + u16::from(data[1])) % 31 == 0
}

impl Inflater {
    /// Create a decompressor at the start of a stream
    pub fn new() -> Self {
        Self {
            state: InflateState::new_boxed(DataFormat::Raw),
            pending: Vec::new(),
            chunk: vec![0; OUTPUT_CHUNK],
            at_stream_start: true,
        }
    }

    /// Feed one binary frame.
    ///
    /// Returns `Ok(None)` while a message is split across frames and not yet
    /// complete, and the whole inflated message once its sync marker arrives.
    pub fn push(&mut self, data: &[u8]) -> Result<Option<Vec<u8>>, InflateError> {
        self.pending.extend_from_slice(data);

        if !self.pending.ends_with(&ZLIB_SUFFIX) {
            log::trace!(
                "Compressed message incomplete, {} bytes buffered",
                self.pending.len()
            );
            return Ok(None);
        }

        let compressed = std::mem::take(&mut self.pending);
        self.inflate(&compressed).map(Some)
    }

    fn inflate(&mut self, data: &[u8]) -> Result<Vec<u8>, InflateError> {
        let mut input = data;

        if self.at_stream_start && has_zlib_header(input) {
            input = &input[2..];
        }
        self.at_stream_start = false;

        let mut output = Vec::with_capacity(data.len() * 4);

        loop {
            let result = inflate(&mut self.state, input, &mut self.chunk, MZFlush::None);
            input = &input[result.bytes_consumed..];
            output.extend_from_slice(&self.chunk[..result.bytes_written]);

            match result.status {
                Ok(MZStatus::StreamEnd) => {
                    log::trace!("Deflate stream ended, expecting a new header");
                    self.state.reset(DataFormat::Raw);
                    self.at_stream_start = true;
                    break;
                }
                Ok(_) => {
                    if input.is_empty() && result.bytes_written < self.chunk.len() {
                        break;
                    }
                }
                Err(MZError::Buf) if input.is_empty() => break,
                Err(error) => return InflateSnafu { error }.fail(),
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use miniz_oxide::deflate::{
        core::{create_comp_flags_from_zip_params, CompressorOxide},
        stream::deflate,
    };

    fn compress_sync(compressor: &mut CompressorOxide, data: &[u8]) -> Vec<u8> {
        let mut out = vec![0; data.len() * 2 + 64];
        let result = deflate(compressor, data, &mut out, MZFlush::Sync);
        assert_eq!(result.bytes_consumed, data.len());
        out.truncate(result.bytes_written);
        out
    }

    fn zlib_compressor() -> CompressorOxide {
        CompressorOxide::new(create_comp_flags_from_zip_params(6, 15, 0))
    }

    #[test]
    fn test_zlib_header_detect() {
        assert!(has_zlib_header(&[0x78, 0x9c]));
        assert!(has_zlib_header(&[0x78, 0x01]));
        assert!(!has_zlib_header(&[0x78, 0x00]));
        assert!(!has_zlib_header(&[0x7b, 0x22]));
        assert!(!has_zlib_header(&[0x78]));
    }

    #[test]
    fn test_inflate_shares_dictionary_between_messages() {
        let mut compressor = zlib_compressor();
        let first = compress_sync(&mut compressor, br#"{"op":10,"d":{"heartbeat_interval":41250}}"#);
        let second = compress_sync(&mut compressor, br#"{"op":11,"d":{"heartbeat_interval":41250}}"#);

        assert_eq!(first[0], 0x78);
        assert!(first.ends_with(&ZLIB_SUFFIX));
        assert!(second.ends_with(&ZLIB_SUFFIX));

        let mut inflater = Inflater::new();
        assert_eq!(
            inflater.push(&first).unwrap().unwrap(),
            br#"{"op":10,"d":{"heartbeat_interval":41250}}"#
        );
        assert_eq!(
            inflater.push(&second).unwrap().unwrap(),
            br#"{"op":11,"d":{"heartbeat_interval":41250}}"#
        );
    }

    #[test]
    fn test_inflate_buffers_split_message() {
        let mut compressor = zlib_compressor();
        let data = compress_sync(&mut compressor, br#"{"op":11,"d":null}"#);
        let (head, tail) = data.split_at(data.len() / 2);

        let mut inflater = Inflater::new();
        assert!(inflater.push(head).unwrap().is_none());
        assert_eq!(inflater.push(tail).unwrap().unwrap(), br#"{"op":11,"d":null}"#);
    }

    #[test]
    fn test_inflate_large_message() {
        let payload = format!(r#"{{"op":0,"d":"{}"}}"#, "x".repeat(200 * 1024));
        let mut compressor = zlib_compressor();
        let data = compress_sync(&mut compressor, payload.as_bytes());

        let mut inflater = Inflater::new();
        assert_eq!(inflater.push(&data).unwrap().unwrap(), payload.as_bytes());
    }

    #[test]
    fn test_inflate_garbage_is_error() {
        let mut inflater = Inflater::new();
        let mut data = vec![0xff; 16];
        data.extend_from_slice(&ZLIB_SUFFIX);
        assert!(inflater.push(&data).is_err());
    }
}
