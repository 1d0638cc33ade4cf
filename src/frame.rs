use std::fmt::{Debug, Formatter};
use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
pub enum FrameKind {
    /// sender -> receiver: request a session, payload is the destination file name
    Start = 1,
    Data = 2,
    /// sender -> receiver: all segments are acknowledged
    Fin = 3,
    /// receiver -> sender: cumulative, `sequence` is the highest segment written in order
    Ack = 4,
    /// receiver -> sender: `sequence` is the segment blocking in-order delivery
    Nack = 5,
    StartOk = 6,
    /// receiver -> sender: the receiver serves a different sender right now
    Busy = 7,
}

/// A single protocol datagram. The wire layout is fixed, all numbers in network byte order:
///
/// ```ascii
///  0: kind (u8)
///  1: sequence (u32)
///  5: length (u32)
///  9: file size (u64)
/// 17: payload (0..1360 bytes)
/// ```
#[derive(Clone, Eq, PartialEq)]
pub struct Frame {
    pub kind: FrameKind,
    pub sequence: u32,
    pub length: u32,
    pub file_size: u64,
    pub payload: Bytes,
}

impl Debug for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}(seq={}, len={}, file_size={})", self.kind, self.sequence, self.length, self.file_size)
    }
}

impl Frame {
    pub const HEADER_LEN: usize = 1 + 4 + 4 + 8;
    pub const MAX_PAYLOAD: usize = 1360;
    pub const MAX_DATAGRAM_LEN: usize = Self::HEADER_LEN + Self::MAX_PAYLOAD;
    pub const MAX_NAME_LEN: usize = 255;

    pub fn start(destination_name: &str, file_size: u64) -> anyhow::Result<Frame> {
        if destination_name.is_empty() {
            bail!("destination file name must not be empty");
        }
        if destination_name.len() > Self::MAX_NAME_LEN {
            bail!("destination file name has {} bytes, maximum is {}", destination_name.len(), Self::MAX_NAME_LEN);
        }

        Ok(Frame {
            kind: FrameKind::Start,
            sequence: 0,
            length: destination_name.len() as u32,
            file_size,
            payload: Bytes::copy_from_slice(destination_name.as_bytes()),
        })
    }

    pub fn data(sequence: u32, file_size: u64, payload: Bytes) -> Frame {
        debug_assert!(payload.len() <= Self::MAX_PAYLOAD);
        Frame {
            kind: FrameKind::Data,
            sequence,
            length: payload.len() as u32,
            file_size,
            payload,
        }
    }

    pub fn fin(sequence: u32, file_size: u64) -> Frame {
        Self::control(FrameKind::Fin, sequence, file_size)
    }

    pub fn ack(sequence: u32) -> Frame {
        Self::control(FrameKind::Ack, sequence, 0)
    }

    pub fn nack(sequence: u32) -> Frame {
        Self::control(FrameKind::Nack, sequence, 0)
    }

    pub fn start_ok() -> Frame {
        Self::control(FrameKind::StartOk, 0, 0)
    }

    pub fn busy() -> Frame {
        Self::control(FrameKind::Busy, 0, 0)
    }

    fn control(kind: FrameKind, sequence: u32, file_size: u64) -> Frame {
        Frame {
            kind,
            sequence,
            length: 0,
            file_size,
            payload: Bytes::new(),
        }
    }

    pub fn serialized_len(&self) -> usize {
        Self::HEADER_LEN + self.payload.len()
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind.into());
        buf.put_u32(self.sequence);
        buf.put_u32(self.length);
        buf.put_u64(self.file_size);
        buf.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        self.ser(&mut buf);
        buf.freeze()
    }

    /// Parses a complete datagram. Anything shorter than the header, with an unknown kind or
    ///  with a payload that does not match its declared length is rejected - the caller is
    ///  expected to drop it. DATA must carry exactly `length` bytes.
    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Frame> {
        if buf.remaining() < Self::HEADER_LEN {
            bail!("incomplete frame header: {} bytes", buf.remaining());
        }

        let raw_kind = buf.get_u8();
        let kind = FrameKind::try_from_primitive(raw_kind)
            .map_err(|_| anyhow!("unknown frame kind {}", raw_kind))?;
        let sequence = buf.get_u32();
        let length = buf.get_u32();
        let file_size = buf.get_u64();

        if buf.remaining() > Self::MAX_PAYLOAD {
            bail!("frame payload of {} bytes exceeds the maximum of {}", buf.remaining(), Self::MAX_PAYLOAD);
        }

        let payload = match kind {
            FrameKind::Start | FrameKind::Data => {
                let length = length as usize;
                if length > buf.remaining() || (kind == FrameKind::Data && length != buf.remaining()) {
                    bail!("{:?} frame declares {} payload bytes but carries {}", kind, length, buf.remaining());
                }
                if kind == FrameKind::Start && length > Self::MAX_NAME_LEN {
                    bail!("START frame with a file name of {} bytes", length);
                }
                buf.copy_to_bytes(length)
            }
            _ => Bytes::new(),
        };

        Ok(Frame {
            kind,
            sequence,
            length,
            file_size,
            payload,
        })
    }

    /// the destination file name carried by a START frame
    pub fn destination_name(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
