//! Eclair wire format.

use uuid::Uuid;

use crate::error::FrameError;
use crate::frame::{self, Frame};

pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xB905EAEA_2E63_0E04_7582_7913F10D8F81);
pub const DATA_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0xAD736C5F_BBC9_1F96_D304_CB5D5F41E160);
pub const CONFIG_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x4F9A45BA_8E1B_4E07_E157_0814D393B968);

/// Header + 4 byte weight + 4 byte timer + checksum.
pub const DATA_FRAME_LEN: usize = 10;
/// Header + 1 byte value + checksum.
pub const CONFIG_FRAME_LEN: usize = 3;

pub const TARE_PAYLOAD: [u8; 1] = [0x01];
pub const HEARTBEAT_PAYLOAD: [u8; 1] = [0x00];

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Weight = 0x57,
    Flow = 0x46,
    /// Timer status, also used for the heartbeat.
    Config = 0x43,
    Battery = 0x42,
    Tare = 0x54,
}

impl TryFrom<u8> for MessageType {
    type Error = FrameError;

    fn try_from(header: u8) -> Result<Self, Self::Error> {
        match header {
            0x57 => Ok(MessageType::Weight),
            0x46 => Ok(MessageType::Flow),
            0x43 => Ok(MessageType::Config),
            0x42 => Ok(MessageType::Battery),
            0x54 => Ok(MessageType::Tare),
            other => Err(FrameError::UnknownHeader(other)),
        }
    }
}

/// The two Eclair firmware variants disagree on how weight frames are
/// checksummed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// Checksum over everything between the header and the last byte.
    #[default]
    Framed,
    /// Checksum over the 8 bytes after the header, stored in byte 9. Anything
    /// after byte 9 is ignored.
    FixedWeight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Data,
    Config,
}

impl Channel {
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        if uuid == DATA_CHARACTERISTIC_UUID {
            Some(Channel::Data)
        } else if uuid == CONFIG_CHARACTERISTIC_UUID {
            Some(Channel::Config)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Data => f.write_str("data"),
            Channel::Config => f.write_str("config"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EclairMessage {
    /// Weight in thousandths of a gram.
    Weight { raw: i32 },
    FlowRate { payload: Vec<u8> },
    Battery { percent: u8 },
    Timer { value: u8 },
}

pub fn decode(
    format: WireFormat,
    channel: Channel,
    bytes: &[u8],
) -> Result<EclairMessage, FrameError> {
    match channel {
        Channel::Data => decode_data(format, bytes),
        Channel::Config => decode_config(bytes),
    }
}

pub fn decode_data(format: WireFormat, bytes: &[u8]) -> Result<EclairMessage, FrameError> {
    let frame = match format {
        WireFormat::Framed => Frame::parse(bytes, DATA_FRAME_LEN)?,
        WireFormat::FixedWeight => {
            let window = bytes.get(..DATA_FRAME_LEN).ok_or(FrameError::TooShort {
                len: bytes.len(),
                min: DATA_FRAME_LEN,
            })?;
            Frame::parse(window, DATA_FRAME_LEN)?
        }
    };

    match MessageType::try_from(frame.header)? {
        MessageType::Weight => {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&frame.payload[..4]);
            Ok(EclairMessage::Weight {
                raw: i32::from_le_bytes(raw),
            })
        }
        MessageType::Flow => Ok(EclairMessage::FlowRate {
            payload: frame.payload.to_vec(),
        }),
        _ => Err(FrameError::UnknownHeader(frame.header)),
    }
}

pub fn decode_config(bytes: &[u8]) -> Result<EclairMessage, FrameError> {
    let frame = Frame::parse(bytes, CONFIG_FRAME_LEN)?;
    let value = frame.payload[0];

    match MessageType::try_from(frame.header)? {
        MessageType::Battery => Ok(EclairMessage::Battery { percent: value }),
        MessageType::Config => Ok(EclairMessage::Timer { value }),
        _ => Err(FrameError::UnknownHeader(frame.header)),
    }
}

pub fn encode(message_type: MessageType, payload: &[u8]) -> Vec<u8> {
    frame::encode(message_type as u8, payload)
}

pub fn tare_command() -> Vec<u8> {
    encode(MessageType::Tare, &TARE_PAYLOAD)
}

pub fn heartbeat_command() -> Vec<u8> {
    encode(MessageType::Config, &HEARTBEAT_PAYLOAD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scales::grams;

    fn weight_frame(raw: i32) -> Vec<u8> {
        let mut payload = raw.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        encode(MessageType::Weight, &payload)
    }

    #[test]
    fn decodes_weight() {
        for format in [WireFormat::Framed, WireFormat::FixedWeight] {
            let message = decode_data(format, &weight_frame(12345)).unwrap();
            assert_eq!(message, EclairMessage::Weight { raw: 12345 });

            let message = decode_data(format, &weight_frame(-500)).unwrap();
            assert_eq!(message, EclairMessage::Weight { raw: -500 });
        }
        assert_eq!(grams(12345), 12.345);
        assert_eq!(grams(-500), -0.5);
    }

    #[test]
    fn weight_frame_layout() {
        assert_eq!(
            weight_frame(12345),
            vec![0x57, 0x39, 0x30, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x09]
        );
    }

    #[test]
    fn short_data_frames_are_rejected() {
        let bytes = encode(MessageType::Weight, &[0x39, 0x30, 0x00, 0x00]);
        for format in [WireFormat::Framed, WireFormat::FixedWeight] {
            assert_eq!(
                decode_data(format, &bytes),
                Err(FrameError::TooShort { len: 6, min: 10 })
            );
        }
    }

    #[test]
    fn formats_differ_on_long_frames() {
        // Eleven bytes: checksum of the full payload trails the frame.
        let mut payload = 2000i32.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05]);
        let framed = encode(MessageType::Weight, &payload);
        assert_eq!(framed.len(), 11);

        assert_eq!(
            decode_data(WireFormat::Framed, &framed),
            Ok(EclairMessage::Weight { raw: 2000 })
        );
        assert!(matches!(
            decode_data(WireFormat::FixedWeight, &framed),
            Err(FrameError::ChecksumMismatch { .. })
        ));

        // Fixed layout with trailing bytes after the checksum.
        let mut fixed = weight_frame(2000);
        fixed.push(0xEE);
        assert_eq!(
            decode_data(WireFormat::FixedWeight, &fixed),
            Ok(EclairMessage::Weight { raw: 2000 })
        );
        assert!(decode_data(WireFormat::Framed, &fixed).is_err());
    }

    #[test]
    fn decodes_flow_notice() {
        let bytes = encode(MessageType::Flow, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(
            decode_data(WireFormat::Framed, &bytes),
            Ok(EclairMessage::FlowRate {
                payload: vec![1, 2, 3, 4, 5, 6, 7, 8]
            })
        );
    }

    #[test]
    fn unknown_data_header() {
        let bytes = frame::encode(0x99, &[0; 8]);
        assert_eq!(
            decode_data(WireFormat::Framed, &bytes),
            Err(FrameError::UnknownHeader(0x99))
        );
        // Battery frames only belong on the config channel.
        let bytes = encode(MessageType::Battery, &[0; 8]);
        assert_eq!(
            decode_data(WireFormat::Framed, &bytes),
            Err(FrameError::UnknownHeader(0x42))
        );
    }

    #[test]
    fn decodes_config_channel() {
        assert_eq!(
            decode_config(&encode(MessageType::Battery, &[87])),
            Ok(EclairMessage::Battery { percent: 87 })
        );
        assert_eq!(
            decode_config(&encode(MessageType::Config, &[3])),
            Ok(EclairMessage::Timer { value: 3 })
        );
        assert_eq!(
            decode_config(&[0x42, 0x57]),
            Err(FrameError::TooShort { len: 2, min: 3 })
        );
        assert_eq!(
            decode_config(&[0x42, 0x57, 0x58]),
            Err(FrameError::ChecksumMismatch {
                computed: 0x57,
                received: 0x58
            })
        );
        assert_eq!(
            decode_config(&encode(MessageType::Weight, &[1])),
            Err(FrameError::UnknownHeader(0x57))
        );
    }

    #[test]
    fn commands() {
        assert_eq!(tare_command(), vec![0x54, 0x01, 0x01]);
        assert_eq!(heartbeat_command(), vec![0x43, 0x00, 0x00]);
    }

    #[test]
    fn channels_by_uuid() {
        assert_eq!(Channel::from_uuid(DATA_CHARACTERISTIC_UUID), Some(Channel::Data));
        assert_eq!(
            Channel::from_uuid(CONFIG_CHARACTERISTIC_UUID),
            Some(Channel::Config)
        );
        assert_eq!(Channel::from_uuid(SERVICE_UUID), None);
    }
}
