//! SLIP framing and checksum layer for the hub's binary protocol.
//!
//! A frame body is `length | command(2, BE) | payload | checksum` where
//! `length = payload.len() + 3` and the checksum is the XOR of every preceding
//! body byte. Bodies travel between `END` delimiters with `END`/`ESC` escaped.
//! `FrameCodec` adapts the pure `encode`/`decode` pair to `tokio_util::codec`
//! so the read loop can reassemble frames from an arbitrary chunked stream.
use bytes::{Buf, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

pub const END: u8 = 0xC0;
pub const ESC: u8 = 0xDB;
pub const ESC_END: u8 = 0xDC;
pub const ESC_ESC: u8 = 0xDD;

/// Smallest legal body: length, two command bytes and the checksum.
const MIN_BODY_LEN: usize = 4;

/// Largest payload the one-byte length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize - 3;

/// Upper bound on buffered bytes while waiting for a closing delimiter.
const MAX_PENDING_LEN: usize = 1024;

/// One decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: u16,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(command: impl Into<u16>, payload: impl Into<Bytes>) -> Self {
        Self {
            command: command.into(),
            payload: payload.into(),
        }
    }
}

/// Errors raised while turning wire bytes back into a [`Frame`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame too short: {0} body bytes")]
    FrameTooShort(usize),
    #[error("invalid frame: dangling or unknown escape sequence")]
    InvalidFrame,
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },
    #[error("length mismatch: header says {declared}, body carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("unexpected protocol id {0:#04x}")]
    UnexpectedProtocolId(u8),
}

/// Body layout on the wire.
///
/// `Bare` is `length | command | payload | checksum`. `ProtocolId` prefixes a
/// single protocol identifier byte, which is covered by the checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameLayout {
    #[default]
    Bare,
    ProtocolId(u8),
}

impl FrameLayout {
    fn prefix_len(self) -> usize {
        match self {
            FrameLayout::Bare => 0,
            FrameLayout::ProtocolId(_) => 1,
        }
    }
}

fn xor(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Encodes `payload` under `command` using the bare layout.
///
/// `payload` must not exceed [`MAX_PAYLOAD_LEN`]; [`FrameCodec`] rejects
/// longer payloads before they reach this function.
pub fn encode(command: u16, payload: &[u8]) -> Vec<u8> {
    encode_with(FrameLayout::Bare, command, payload)
}

/// Encodes a frame with an explicit body layout.
pub fn encode_with(layout: FrameLayout, command: u16, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(payload.len() + MIN_BODY_LEN + 1);
    if let FrameLayout::ProtocolId(id) = layout {
        body.push(id);
    }
    debug_assert!(payload.len() <= MAX_PAYLOAD_LEN, "payload overflows length field");
    body.push((payload.len() + 3) as u8);
    body.extend_from_slice(&command.to_be_bytes());
    body.extend_from_slice(payload);
    body.push(xor(&body));

    let mut wire = Vec::with_capacity(body.len() + 8);
    wire.push(END);
    for byte in body {
        match byte {
            END => wire.extend_from_slice(&[ESC, ESC_END]),
            ESC => wire.extend_from_slice(&[ESC, ESC_ESC]),
            other => wire.push(other),
        }
    }
    wire.push(END);
    wire
}

/// Decodes one delimited frame using the bare layout.
pub fn decode(raw: &[u8]) -> Result<Frame, FrameError> {
    decode_with(FrameLayout::Bare, raw)
}

/// Decodes one frame; surrounding `END` delimiters are optional.
pub fn decode_with(layout: FrameLayout, raw: &[u8]) -> Result<Frame, FrameError> {
    let start = raw.iter().position(|b| *b != END).unwrap_or(raw.len());
    let end = raw.iter().rposition(|b| *b != END).map_or(start, |i| i + 1);
    let body = unescape(&raw[start..end])?;

    let min = MIN_BODY_LEN + layout.prefix_len();
    if body.len() < min {
        return Err(FrameError::FrameTooShort(body.len()));
    }

    let (head, checksum) = body.split_at(body.len() - 1);
    let expected = xor(head);
    if expected != checksum[0] {
        return Err(FrameError::ChecksumMismatch {
            expected,
            actual: checksum[0],
        });
    }

    let head = match layout {
        FrameLayout::Bare => head,
        FrameLayout::ProtocolId(id) => {
            if head[0] != id {
                return Err(FrameError::UnexpectedProtocolId(head[0]));
            }
            &head[1..]
        }
    };

    let declared = head[0] as usize;
    // command + payload + checksum occupy exactly the bytes after the length field
    let actual = head.len();
    if declared != actual {
        return Err(FrameError::LengthMismatch { declared, actual });
    }

    Ok(Frame {
        command: u16::from_be_bytes([head[1], head[2]]),
        payload: Bytes::copy_from_slice(&head[3..]),
    })
}

fn unescape(data: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::with_capacity(data.len());
    let mut bytes = data.iter();
    while let Some(&byte) = bytes.next() {
        if byte != ESC {
            out.push(byte);
            continue;
        }
        match bytes.next() {
            Some(&ESC_END) => out.push(END),
            Some(&ESC_ESC) => out.push(ESC),
            _ => return Err(FrameError::InvalidFrame),
        }
    }
    Ok(out)
}

/// Incremental reassembler for a byte stream of SLIP-delimited frames.
///
/// Each item is the decode outcome of one delimited frame, so a corrupt frame
/// surfaces as `Some(Err(..))` and the stream continues at the next delimiter.
/// Bytes seen before the first `END` are discarded.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    layout: FrameLayout,
    synced: bool,
}

impl FrameCodec {
    pub fn new(layout: FrameLayout) -> Self {
        Self {
            layout,
            synced: false,
        }
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(FrameLayout::Bare)
    }
}

impl Decoder for FrameCodec {
    type Item = Result<Frame, FrameError>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !self.synced {
            match src.iter().position(|b| *b == END) {
                Some(idx) => {
                    src.advance(idx);
                    self.synced = true;
                }
                None => {
                    src.clear();
                    return Ok(None);
                }
            }
        }

        let Some(start) = src.iter().position(|b| *b != END) else {
            // Only delimiters buffered; keep one as the next opening marker.
            let surplus = src.len().saturating_sub(1);
            src.advance(surplus);
            return Ok(None);
        };

        match src[start..].iter().position(|b| *b == END) {
            Some(len) => {
                src.advance(start);
                let body = src.split_to(len);
                Ok(Some(decode_with(self.layout, &body)))
            }
            None if src.len() - start > MAX_PENDING_LEN => {
                warn!(
                    pending = src.len(),
                    "no frame delimiter within bound, resynchronising"
                );
                src.clear();
                self.synced = false;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None => {
                // A trailing delimiter or an unterminated body is not a frame.
                src.clear();
                Ok(None)
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.payload.len() > MAX_PAYLOAD_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "payload of {} bytes exceeds the {MAX_PAYLOAD_LEN}-byte frame limit",
                    item.payload.len()
                ),
            ));
        }
        dst.extend_from_slice(&encode_with(self.layout, item.command, &item.payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn feed(codec: &mut FrameCodec, buf: &mut BytesMut) -> Vec<Result<Frame, FrameError>> {
        let mut out = Vec::new();
        while let Some(item) = codec.decode(buf).unwrap() {
            out.push(item);
        }
        out
    }

    #[test]
    fn encodes_bare_layout_bit_exact() {
        let wire = encode(0x3001, &[0x00]);
        // length = 1 + 3, checksum = 0x04 ^ 0x30 ^ 0x01 ^ 0x00
        assert_eq!(wire, vec![END, 0x04, 0x30, 0x01, 0x00, 0x35, END]);
    }

    #[test]
    fn escapes_reserved_bytes() {
        let wire = encode(0x0000, &[END, ESC]);
        assert_eq!(&wire[4..8], &[ESC, ESC_END, ESC, ESC_ESC]);
        let frame = decode(&wire).unwrap();
        assert_eq!(frame.payload.as_ref(), &[END, ESC]);
    }

    #[test]
    fn round_trips_assorted_payloads() {
        let payloads: [&[u8]; 5] = [
            &[],
            &[0x01],
            &[END, END, ESC, 0x00, 0xFF],
            &[0xAA; 64],
            b"Window\0",
        ];
        for (idx, payload) in payloads.iter().enumerate() {
            let command = 0x0200 + idx as u16;
            let frame = decode(&encode(command, payload)).unwrap();
            assert_eq!(frame.command, command);
            assert_eq!(frame.payload.as_ref(), *payload);
        }
    }

    #[test]
    fn largest_payload_fits_length_field() {
        let frame = decode(&encode(0x0204, &[0x11; MAX_PAYLOAD_LEN])).unwrap();
        assert_eq!(frame.payload.len(), MAX_PAYLOAD_LEN);

        let mut codec = FrameCodec::default();
        let mut dst = BytesMut::new();
        codec
            .encode(Frame::new(0x0204u16, vec![0x11; MAX_PAYLOAD_LEN]), &mut dst)
            .unwrap();
        assert_eq!(decode(&dst).unwrap().payload.len(), MAX_PAYLOAD_LEN);
    }

    #[test]
    fn codec_refuses_oversized_payload() {
        let mut codec = FrameCodec::default();
        let mut dst = BytesMut::new();
        let err = codec
            .encode(Frame::new(0x0204u16, vec![0x11; MAX_PAYLOAD_LEN + 1]), &mut dst)
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        assert!(dst.is_empty());
    }

    #[test]
    fn single_bit_flips_are_detected() {
        let wire = encode(0x0302, &[0x10, 0x20, 0x30, 0x40]);
        // Skip delimiters; none of the body bytes are escaped here.
        for idx in 1..wire.len() - 1 {
            for bit in 0..8 {
                let mut corrupt = wire.clone();
                corrupt[idx] ^= 1 << bit;
                let result = decode(&corrupt);
                assert!(result.is_err(), "flip at {idx}:{bit} went unnoticed");
                if ![END, ESC].contains(&corrupt[idx]) {
                    assert!(
                        matches!(result, Err(FrameError::ChecksumMismatch { .. })),
                        "flip at {idx}:{bit} gave {result:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn rejects_short_and_dangling_frames() {
        assert_eq!(decode(&[END, 0x03, 0x00, END]), Err(FrameError::FrameTooShort(2)));
        assert_eq!(decode(&[END, 0x03, 0x00, 0x00, ESC, END]), Err(FrameError::InvalidFrame));
        assert_eq!(decode(&[END, END]), Err(FrameError::FrameTooShort(0)));
    }

    #[test]
    fn rejects_inconsistent_length() {
        // length byte claims 5 but only command + checksum follow
        let body = [0x05u8, 0x02, 0x02];
        let mut raw = vec![END];
        raw.extend_from_slice(&body);
        raw.push(xor(&body));
        raw.push(END);
        assert_eq!(
            decode(&raw),
            Err(FrameError::LengthMismatch {
                declared: 5,
                actual: 3
            })
        );
    }

    #[test]
    fn protocol_id_layout_is_checked() {
        let layout = FrameLayout::ProtocolId(0x00);
        let wire = encode_with(layout, 0x0202, &[]);
        assert_eq!(wire, vec![END, 0x00, 0x03, 0x02, 0x02, 0x03, END]);
        assert_eq!(decode_with(layout, &wire).unwrap().command, 0x0202);

        let other = encode_with(FrameLayout::ProtocolId(0x07), 0x0202, &[]);
        assert_eq!(
            decode_with(layout, &other),
            Err(FrameError::UnexpectedProtocolId(0x07))
        );
    }

    #[test]
    fn reassembles_frames_split_across_reads() {
        let mut codec = FrameCodec::default();
        let wire = [encode(0x0204, &[1, 2, 3]), encode(0x0205, &[])].concat();
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        for chunk in wire.chunks(3) {
            buf.extend_from_slice(chunk);
            frames.extend(feed(&mut codec, &mut buf));
        }
        let commands: Vec<u16> = frames.into_iter().map(|f| f.unwrap().command).collect();
        assert_eq!(commands, vec![0x0204, 0x0205]);
    }

    #[test]
    fn corrupt_frame_does_not_poison_the_stream() {
        let mut codec = FrameCodec::default();
        let mut bad = encode(0x0211, &[1, 0, 0, 0, 0, 0]);
        bad[3] ^= 0x01;
        let good = encode(0x0211, &[2, 0, 0, 0, 0, 0]);
        let mut buf = BytesMut::from(&[b"garbage".as_slice(), &bad, &good].concat()[..]);

        let items = feed(&mut codec, &mut buf);
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Err(FrameError::ChecksumMismatch { .. })));
        assert_eq!(items[1].as_ref().unwrap().payload[0], 2);
    }

    #[test]
    fn discards_runaway_input_without_delimiter() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        buf.put_u8(END);
        buf.extend_from_slice(&[0x11; MAX_PENDING_LEN + 8]);
        assert!(feed(&mut codec, &mut buf).is_empty());
        assert!(buf.is_empty());

        buf.extend_from_slice(&encode(0x0241, &[]));
        let items = feed(&mut codec, &mut buf);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().command, 0x0241);
    }
}
