//! MLLP block framing for outbound documents and inbound acknowledgements.
//!
//! A frame is a single start byte, the raw payload, then a two-byte end
//! marker. There is no length prefix and no escaping: a payload that itself
//! contains the end marker is split on the wire and the receiver sees a
//! truncated document.
//!
//! [`MllpCodec`] implements Tokio's [`Decoder`] and [`Encoder`] traits so the
//! transport can drive it through [`tokio_util::codec::Framed`]. The free
//! functions [`encode_frame`] and [`drain_frames`] expose the same logic for
//! callers holding plain buffers.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Start-of-block marker (`VT`).
pub const START_BLOCK: u8 = 0x0B;
/// End-of-block marker (`FS` followed by `CR`).
pub const END_BLOCK: [u8; 2] = [0x1C, 0x0D];

/// Bytes added around every payload.
const FRAME_OVERHEAD: usize = 1 + END_BLOCK.len();

/// Wrap `payload` in start and end markers.
///
/// # Examples
///
/// ```
/// use edictl::frame::encode_frame;
///
/// assert_eq!(&encode_frame(b"UNA")[..], b"\x0bUNA\x1c\x0d");
/// ```
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + FRAME_OVERHEAD);
    put_frame(payload, &mut buf);
    buf.freeze()
}

/// Extract every complete frame currently held in `buf`.
///
/// Frames are returned in the order they appear. Consumed bytes, including
/// any noise before a start marker, are removed from `buf`; an incomplete
/// trailing frame stays in place so a later fill can finish it.
#[must_use]
pub fn drain_frames(buf: &mut BytesMut) -> Vec<Bytes> {
    let mut frames = Vec::new();
    while let Some(frame) = take_frame(buf) {
        frames.push(frame);
    }
    frames
}

fn put_frame(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(payload.len() + FRAME_OVERHEAD);
    dst.put_u8(START_BLOCK);
    dst.put_slice(payload);
    dst.put_slice(&END_BLOCK);
}

/// Remove and return the first complete frame in `buf`, if any.
fn take_frame(buf: &mut BytesMut) -> Option<Bytes> {
    let start = buf.iter().position(|&b| b == START_BLOCK)?;
    let body_start = start + 1;
    let body_len = buf
        .get(body_start..)?
        .windows(END_BLOCK.len())
        .position(|window| window == END_BLOCK)?;

    buf.advance(body_start);
    let payload = buf.split_to(body_len).freeze();
    buf.advance(END_BLOCK.len());
    Some(payload)
}

/// Tokio codec for MLLP block framing.
#[derive(Debug, Default, Clone, Copy)]
pub struct MllpCodec;

impl MllpCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self { Self }
}

impl Decoder for MllpCodec {
    type Error = io::Error;
    type Item = Bytes;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(take_frame(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // A partial frame at EOF is not an acknowledgement; report end of stream.
        Ok(take_frame(src))
    }
}

impl Encoder<&[u8]> for MllpCodec {
    type Error = io::Error;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        put_frame(item, dst);
        Ok(())
    }
}

impl Encoder<Bytes> for MllpCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        put_frame(&item, dst);
        Ok(())
    }
}
