//! Framing: splitting a byte stream into header + body frames.
//!
//! Every frame on the wire looks like this:
//!
//! ```text
//!  0        4        8        12           12+N
//!  ┌────────┬────────┬────────┬─────────────┐
//!  │ IPv4   │ port   │ len N  │ body (N)    │
//!  └────────┴────────┴────────┴─────────────┘
//!    u8x4     u32 BE   u32 BE
//! ```
//!
//! [`WireCodec`] plugs into `tokio_util::codec` so a `TcpStream` can be
//! turned into a `Stream` of [`RawFrame`]s with `FramedRead`, and a `Sink`
//! of frames or [`Envelope`]s with `FramedWrite`.
//!
//! The codec stops at raw frames on the read side on purpose: whether a
//! body is plaintext or ciphertext depends on the connection, which the
//! codec does not know about.

use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{Envelope, ProtocolError};

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 12;

/// Largest body the codec accepts.
pub const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

/// One frame as it appeared on the wire: header sender + undecoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub sender: SocketAddrV4,
    pub body: Bytes,
}

impl RawFrame {
    /// Writes the 12-byte header for this frame into `dst`.
    fn put_header(&self, dst: &mut BytesMut) {
        dst.put_slice(&self.sender.ip().octets());
        dst.put_u32(u32::from(self.sender.port()));
        // Body length is checked against MAX_BODY_LEN before this call.
        dst.put_u32(self.body.len() as u32);
    }
}

/// Length-delimited codec for BlockTalk frames.
#[derive(Debug, Clone, Copy)]
pub struct WireCodec {
    max_body_len: usize,
}

impl WireCodec {
    pub fn new() -> Self {
        Self {
            max_body_len: MAX_BODY_LEN,
        }
    }

    /// Overrides the body-length limit.
    pub fn with_max_body_len(mut self, max: usize) -> Self {
        self.max_body_len = max;
        self
    }

    fn check_len(&self, len: usize) -> Result<(), ProtocolError> {
        if len > self.max_body_len {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_body_len,
            });
        }
        Ok(())
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for WireCodec {
    type Item = RawFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RawFrame>, ProtocolError> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }

        // Peek at the header without consuming it: if the body is not
        // complete yet we must leave the buffer untouched.
        let ip = Ipv4Addr::new(src[0], src[1], src[2], src[3]);
        let port = u32::from_be_bytes([src[4], src[5], src[6], src[7]]);
        let len = u32::from_be_bytes([src[8], src[9], src[10], src[11]]) as usize;

        self.check_len(len)?;
        let port = u16::try_from(port).map_err(|_| ProtocolError::InvalidPort(port))?;

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let body = src.split_to(len).freeze();
        Ok(Some(RawFrame {
            sender: SocketAddrV4::new(ip, port),
            body,
        }))
    }
}

impl Encoder<RawFrame> for WireCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: RawFrame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        self.check_len(frame.body.len())?;
        dst.reserve(HEADER_LEN + frame.body.len());
        frame.put_header(dst);
        dst.put_slice(&frame.body);
        Ok(())
    }
}

impl Encoder<Envelope> for WireCodec {
    type Error = ProtocolError;

    fn encode(&mut self, envelope: Envelope, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        Encoder::<RawFrame>::encode(self, envelope.to_frame(), dst)
    }
}

impl Encoder<&Envelope> for WireCodec {
    type Error = ProtocolError;

    fn encode(&mut self, envelope: &Envelope, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        Encoder::<RawFrame>::encode(self, envelope.to_frame(), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    fn sender() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 20), 7000)
    }

    fn encode_envelope(env: Envelope) -> BytesMut {
        let mut buf = BytesMut::new();
        WireCodec::new().encode(env, &mut buf).unwrap();
        buf
    }

    // =====================================================================
    // Golden bytes
    // =====================================================================

    #[test]
    fn test_encode_header_layout_is_big_endian() {
        let buf = encode_envelope(Envelope::new(sender(), Message::Bye));
        assert_eq!(
            &buf[..],
            &[
                192, 168, 1, 20, // ip
                0, 0, 0x1b, 0x58, // port 7000
                0, 0, 0, 3, // body length
                b'B', b'Y', b'E',
            ]
        );
    }

    #[test]
    fn test_decode_golden_frame() {
        let mut buf = BytesMut::from(
            &[
                10, 0, 0, 1, //
                0, 0, 0x13, 0x88, // 5000
                0, 0, 0, 8, //
                b'M', b'S', b'G', b' ', b'4', b' ', b'h', b'i',
            ][..],
        );
        let frame = WireCodec::new().decode(&mut buf).unwrap().unwrap();
        let env = Envelope::from_frame(&frame).unwrap();
        assert_eq!(env.sender, SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 5000));
        assert_eq!(
            env.message,
            Message::Chat {
                timestamp: 4,
                text: "hi".into()
            }
        );
        assert!(buf.is_empty());
    }

    // =====================================================================
    // Partial input
    // =====================================================================

    #[test]
    fn test_decode_partial_header_returns_none() {
        let full = encode_envelope(Envelope::new(sender(), Message::Leader));
        let mut buf = BytesMut::from(&full[..7]);
        assert_eq!(WireCodec::new().decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 7);
    }

    #[test]
    fn test_decode_partial_body_waits_for_rest() {
        let full = encode_envelope(Envelope::new(
            sender(),
            Message::Ack {
                info: "token".into(),
            },
        ));
        let mut codec = WireCodec::new();
        let mut buf = BytesMut::from(&full[..HEADER_LEN + 2]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&full[HEADER_LEN + 2..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame.body[..], b"ACK token");
    }

    #[test]
    fn test_decode_two_frames_in_one_buffer() {
        let mut buf = encode_envelope(Envelope::new(sender(), Message::LeaderVote));
        buf.extend_from_slice(&encode_envelope(Envelope::new(sender(), Message::Leader)));

        let mut codec = WireCodec::new();
        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&first.body[..], b"VOT");
        assert_eq!(&second.body[..], b"LDR");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    // =====================================================================
    // Limits
    // =====================================================================

    #[test]
    fn test_decode_oversize_frame_is_error() {
        let mut buf = BytesMut::new();
        buf.put_slice(&[127, 0, 0, 1]);
        buf.put_u32(1);
        buf.put_u32(64);
        let result = WireCodec::new().with_max_body_len(32).decode(&mut buf);
        assert!(matches!(
            result,
            Err(ProtocolError::FrameTooLarge { len: 64, max: 32 })
        ));
    }

    #[test]
    fn test_decode_out_of_range_port_is_error() {
        let mut buf = BytesMut::new();
        buf.put_slice(&[127, 0, 0, 1]);
        buf.put_u32(70_000);
        buf.put_u32(0);
        let result = WireCodec::new().decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::InvalidPort(70_000))));
    }

    #[test]
    fn test_encode_oversize_frame_is_error() {
        let frame = RawFrame {
            sender: sender(),
            body: Bytes::from(vec![b'a'; 33]),
        };
        let mut buf = BytesMut::new();
        let result = WireCodec::new().with_max_body_len(32).encode(frame, &mut buf);
        assert!(result.is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_zero_length_body_yields_empty_frame() {
        let mut buf = BytesMut::new();
        buf.put_slice(&[127, 0, 0, 1]);
        buf.put_u32(1);
        buf.put_u32(0);
        let frame = WireCodec::new().decode(&mut buf).unwrap().unwrap();
        assert!(frame.body.is_empty());
        // An empty body has no type code.
        assert!(Envelope::from_frame(&frame).is_err());
    }
}
