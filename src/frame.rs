//! XOR-checksummed frames: `[header][payload..][xor(payload)]`.

use std::fmt::Write as _;

use crate::error::FrameError;

/// Smallest possible frame: header, one payload byte, checksum.
pub const MIN_FRAME_LEN: usize = 3;

/// A validated frame borrowed from the received bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub header: u8,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Validate `bytes` as a whole frame of at least `min_len` bytes. The
    /// checksum covers the payload only.
    pub fn parse(bytes: &'a [u8], min_len: usize) -> Result<Self, FrameError> {
        let min = min_len.max(MIN_FRAME_LEN);
        if bytes.len() < min {
            return Err(FrameError::TooShort {
                len: bytes.len(),
                min,
            });
        }

        let (&header, rest) = bytes.split_first().ok_or(FrameError::TooShort { len: 0, min })?;
        let (&received, payload) = rest.split_last().ok_or(FrameError::TooShort {
            len: bytes.len(),
            min,
        })?;

        let computed = xor_checksum(payload);
        if computed != received {
            return Err(FrameError::ChecksumMismatch { computed, received });
        }

        Ok(Frame { header, payload })
    }
}

pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, byte| acc ^ byte)
}

pub fn encode(header: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(payload.len() + 2);
    bytes.push(header);
    bytes.extend_from_slice(payload);
    bytes.push(xor_checksum(payload));
    bytes
}

/// Hex dump for diagnostics, e.g. `57 39 30 00 00`.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02X}", byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOADS: &[&[u8]] = &[
        &[0x00],
        &[0x01],
        &[0x39, 0x30, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        &[0xFF, 0x0C, 0xFE, 0xFF, 0x12, 0x34, 0x56, 0x78],
        &[0xAA, 0x55, 0xAA, 0x55, 0x01],
    ];

    #[test]
    fn checksum_is_self_inverse_and_order_independent() {
        for payload in PAYLOADS {
            let checksum = xor_checksum(payload);
            assert_eq!(checksum ^ checksum, 0);

            let mut reversed = payload.to_vec();
            reversed.reverse();
            assert_eq!(xor_checksum(&reversed), checksum);
        }
        assert_eq!(xor_checksum(&[]), 0);
    }

    #[test]
    fn encoded_frames_validate() {
        for payload in PAYLOADS {
            let bytes = encode(0x57, payload);
            assert_eq!(bytes.len(), payload.len() + 2);

            let frame = Frame::parse(&bytes, MIN_FRAME_LEN).unwrap();
            assert_eq!(frame.header, 0x57);
            assert_eq!(frame.payload, *payload);
        }
    }

    #[test]
    fn any_corrupted_payload_byte_fails_validation() {
        let payload = [0x39, 0x30, 0x00, 0x00, 0x10, 0x20, 0x30, 0x40];
        let bytes = encode(0x57, &payload);

        for index in 1..bytes.len() - 1 {
            let mut corrupted = bytes.clone();
            corrupted[index] ^= 0x5A;
            assert!(matches!(
                Frame::parse(&corrupted, 10),
                Err(FrameError::ChecksumMismatch { .. })
            ));
        }
    }

    #[test]
    fn header_is_outside_the_checksum() {
        let mut bytes = encode(0x42, &[0x50]);
        bytes[0] = 0x43;
        assert_eq!(Frame::parse(&bytes, 3).unwrap().header, 0x43);
    }

    #[test]
    fn mismatch_reports_both_values() {
        let err = Frame::parse(&[0x42, 0x50, 0x51], 3).unwrap_err();
        assert_eq!(
            err,
            FrameError::ChecksumMismatch {
                computed: 0x50,
                received: 0x51
            }
        );
    }

    #[test]
    fn short_frames_are_rejected() {
        assert_eq!(
            Frame::parse(&[0x42, 0x00], 0),
            Err(FrameError::TooShort { len: 2, min: 3 })
        );
        let bytes = encode(0x57, &[0x01, 0x02, 0x03]);
        assert_eq!(
            Frame::parse(&bytes, 10),
            Err(FrameError::TooShort { len: 5, min: 10 })
        );
    }

    #[test]
    fn hex_dump() {
        assert_eq!(to_hex(&[0x54, 0x01, 0x01]), "54 01 01");
        assert_eq!(to_hex(&[]), "");
    }
}
