//! DTLS record header inspection.
//!
//! The datagram socket never decrypts records itself, but it looks at the
//! plaintext header of every inbound datagram to reject non-DTLS traffic
//! early and to account for lost packets.
//!
//! DTLS 1.2 record header (RFC 6347 §4.1):
//! - ContentType: 1 byte
//! - ProtocolVersion: 2 bytes
//! - Epoch: 2 bytes
//! - Sequence Number: 6 bytes (u48)
//! - Length: 2 bytes

use std::ops::RangeFrom;

use nom::bytes::complete::take;
use nom::error::{make_error, ErrorKind, ParseError};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult, InputIter, InputLength, Slice};

/// Length of the record header.
pub const HEADER_LEN: usize = 13;

/// Largest record length allowed on the wire, 2^14 plus expansion.
pub const MAX_RECORD_LEN: u16 = 16384 + 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
    Unknown(u8),
}

impl ContentType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            _ => ContentType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ContentType::ChangeCipherSpec => 20,
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Unknown(value) => *value,
        }
    }

    /// Content that legitimately arrives before the handshake completes.
    ///
    /// Alerts and ChangeCipherSpec travel in handshake flights, application
    /// data never does.
    pub fn is_handshake_phase(&self) -> bool {
        matches!(
            self,
            ContentType::Handshake | ContentType::ChangeCipherSpec | ContentType::Alert
        )
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ContentType> {
        let (input, byte) = be_u8(input)?;
        Ok((input, Self::from_u8(byte)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    DTLS1_0,
    DTLS1_2,
    Unknown(u16),
}

impl ProtocolVersion {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0xFEFF => ProtocolVersion::DTLS1_0,
            0xFEFD => ProtocolVersion::DTLS1_2,
            _ => ProtocolVersion::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ProtocolVersion::DTLS1_0 => 0xFEFF,
            ProtocolVersion::DTLS1_2 => 0xFEFD,
            ProtocolVersion::Unknown(value) => *value,
        }
    }

    /// DTLS versions are encoded with a 0xFE major byte.
    pub fn is_dtls(&self) -> bool {
        self.as_u16() >> 8 == 0xFE
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
        let (input, version) = be_u16(input)?;
        Ok((input, Self::from_u16(version)))
    }
}

/// The plaintext header of one DTLS record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub epoch: u16,
    pub sequence_number: u64,
    pub length: u16,
}

impl RecordHeader {
    /// Parse a header and check the fragment it announces is present.
    pub fn parse(input: &[u8]) -> IResult<&[u8], RecordHeader> {
        let (input, content_type) = ContentType::parse(input)?;
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, epoch) = be_u16(input)?;
        let (input, sequence_number) = be_u48(input)?;
        let (input, length) = be_u16(input)?;
        let (_, _fragment) = take(length as usize)(input)?;

        Ok((
            input,
            RecordHeader {
                content_type,
                version,
                epoch,
                sequence_number,
                length,
            },
        ))
    }

    /// The low 16 bits of the sequence number, the space loss accounting
    /// works in.
    pub fn wire_sequence(&self) -> u16 {
        (self.sequence_number & 0xFFFF) as u16
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.content_type.as_u8());
        output.extend_from_slice(&self.version.as_u16().to_be_bytes());
        output.extend_from_slice(&self.epoch.to_be_bytes());
        output.extend_from_slice(&self.sequence_number.to_be_bytes()[2..]);
        output.extend_from_slice(&self.length.to_be_bytes());
    }
}

/// Minimal framing check of an inbound datagram.
///
/// Returns the header of the first record if the datagram looks like DTLS:
/// a known content type, a DTLS version, and a length that fits both the
/// datagram and the protocol limit.
pub fn inspect(datagram: &[u8]) -> Option<RecordHeader> {
    let (_, header) = RecordHeader::parse(datagram).ok()?;

    if matches!(header.content_type, ContentType::Unknown(_)) {
        return None;
    }

    if !header.version.is_dtls() {
        return None;
    }

    if header.length > MAX_RECORD_LEN {
        return None;
    }

    Some(header)
}

/// Signed distance from `b` to `a` in a wrapping 16 bit sequence space.
///
/// Positive means `a` is ahead of `b`. The shorter way round the circle is
/// chosen. At exactly half the space the numerically larger value is taken
/// to be ahead, which keeps `compare_seq(a, b) == -compare_seq(b, a)`.
pub fn compare_seq(a: u16, b: u16) -> i32 {
    let forward = a.wrapping_sub(b) as i32;

    if forward < 0x8000 {
        forward
    } else if forward > 0x8000 {
        forward - 0x1_0000
    } else if a > b {
        0x8000
    } else {
        -0x8000
    }
}

pub(crate) fn be_u48<I, E: ParseError<I>>(input: I) -> IResult<I, u64, E>
where
    I: Slice<RangeFrom<usize>> + InputIter<Item = u8> + InputLength,
{
    let bound: usize = 6;

    if input.input_len() < bound {
        Err(Err::Error(make_error(input, ErrorKind::Eof)))
    } else {
        let mut res = 0u64;

        for byte in input.iter_elements().take(bound) {
            res = (res << 8) + byte as u64;
        }

        Ok((input.slice(bound..), res))
    }
}
