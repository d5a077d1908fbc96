//! Raw 32-bit word kinds and bit-field extraction.
//!
//! ```text
//! bit 31 = 1          trigger word, layout given by TriggerDataFormat
//! bits[31:28] = 0x4   chip word, bits[27:25] select the sub-kind
//!     0b000           frame header, bits[24:0] frame timestamp low
//!     0b001           leading edge, col[24:16] row[15:7] le[6:0]
//!     0b010           trailing edge, col[24:16] row[15:7] te[6:0]
//!     0b011           timestamp high, bits[24:0] frame timestamp [49:25]
//! bits[31:28] = 0x2   TDC word, timestamp[27:12] value[11:0]
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

const TRIGGER_FLAG: u32 = 0x8000_0000;
const CHIP_HEADER: u32 = 0x4;
const TDC_HEADER: u32 = 0x2;

/// Number of bits of the frame timestamp carried by a frame header.
pub const FRAME_TIMESTAMP_LOW_BITS: u32 = 25;
const FRAME_LOW_MASK: u32 = (1 << FRAME_TIMESTAMP_LOW_BITS) - 1;

/// Layout of the trigger words written by the trigger logic unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TriggerDataFormat {
    /// bits[30:0] trigger number.
    #[default]
    TriggerNumber,
    /// bits[30:0] trigger timestamp; numbers are counted.
    TimeStamp,
    /// bits[30:16] trigger timestamp, bits[15:0] trigger number.
    Combined,
}

impl TriggerDataFormat {
    /// Width of the trigger number field, `None` if the number is counted.
    #[must_use]
    pub fn number_bits(self) -> Option<u32> {
        match self {
            Self::TriggerNumber => Some(31),
            Self::TimeStamp => None,
            Self::Combined => Some(16),
        }
    }

    /// Width of the trigger timestamp field, `None` if absent.
    #[must_use]
    pub fn timestamp_bits(self) -> Option<u32> {
        match self {
            Self::TriggerNumber => None,
            Self::TimeStamp => Some(31),
            Self::Combined => Some(15),
        }
    }
}

impl TryFrom<u8> for TriggerDataFormat {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::TriggerNumber),
            1 => Ok(Self::TimeStamp),
            2 => Ok(Self::Combined),
            other => Err(Error::InvalidConfig(format!(
                "unknown trigger data format {other}"
            ))),
        }
    }
}

impl From<TriggerDataFormat> for u8 {
    fn from(format: TriggerDataFormat) -> Self {
        match format {
            TriggerDataFormat::TriggerNumber => 0,
            TriggerDataFormat::TimeStamp => 1,
            TriggerDataFormat::Combined => 2,
        }
    }
}

/// A decoded raw word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawWord {
    /// Start of a readout frame, low bits of the frame timestamp.
    FrameHeader { timestamp_low: u32 },
    /// Pixel crossed threshold.
    LeadingEdge { col: u16, row: u16, le: u8 },
    /// Pixel fell back below threshold.
    TrailingEdge { col: u16, row: u16, te: u8 },
    /// Frame timestamp bits [49:25].
    TimestampHigh { timestamp_high: u32 },
    /// Trigger; fields absent from the format are zero.
    Trigger { number: u32, timestamp: u32 },
    /// TDC measurement.
    Tdc { timestamp: u16, value: u16 },
    /// Anything else.
    Unknown(u32),
}

impl RawWord {
    /// Decodes one raw word.
    #[must_use]
    pub fn decode(raw: u32, format: TriggerDataFormat) -> Self {
        if raw & TRIGGER_FLAG != 0 {
            let payload = raw & !TRIGGER_FLAG;
            let (number, timestamp) = match format {
                TriggerDataFormat::TriggerNumber => (payload, 0),
                TriggerDataFormat::TimeStamp => (0, payload),
                TriggerDataFormat::Combined => (payload & 0xFFFF, payload >> 16),
            };
            return Self::Trigger { number, timestamp };
        }

        match raw >> 28 {
            CHIP_HEADER => {
                let col = ((raw >> 16) & 0x1FF) as u16;
                let row = ((raw >> 7) & 0x1FF) as u16;
                let edge = (raw & 0x7F) as u8;
                match (raw >> 25) & 0x7 {
                    0 => Self::FrameHeader {
                        timestamp_low: raw & FRAME_LOW_MASK,
                    },
                    1 => Self::LeadingEdge { col, row, le: edge },
                    2 => Self::TrailingEdge { col, row, te: edge },
                    3 => Self::TimestampHigh {
                        timestamp_high: raw & FRAME_LOW_MASK,
                    },
                    _ => Self::Unknown(raw),
                }
            }
            TDC_HEADER => Self::Tdc {
                timestamp: ((raw >> 12) & 0xFFFF) as u16,
                value: (raw & 0xFFF) as u16,
            },
            _ => Self::Unknown(raw),
        }
    }

    /// True if `raw` is a frame header, without decoding other fields.
    #[inline]
    #[must_use]
    pub fn is_frame_header(raw: u32) -> bool {
        raw & TRIGGER_FLAG == 0 && raw >> 28 == CHIP_HEADER && (raw >> 25) & 0x7 == 0
    }

    /// Encodes the word back into its raw form. Fields are masked to width.
    #[must_use]
    pub fn encode(&self, format: TriggerDataFormat) -> u32 {
        let chip = |kind: u32, payload: u32| (CHIP_HEADER << 28) | (kind << 25) | payload;
        let pixel = |col: u16, row: u16, edge: u8| {
            ((u32::from(col) & 0x1FF) << 16) | ((u32::from(row) & 0x1FF) << 7) | (u32::from(edge) & 0x7F)
        };
        match *self {
            Self::FrameHeader { timestamp_low } => chip(0, timestamp_low & FRAME_LOW_MASK),
            Self::LeadingEdge { col, row, le } => chip(1, pixel(col, row, le)),
            Self::TrailingEdge { col, row, te } => chip(2, pixel(col, row, te)),
            Self::TimestampHigh { timestamp_high } => chip(3, timestamp_high & FRAME_LOW_MASK),
            Self::Trigger { number, timestamp } => {
                let payload = match format {
                    TriggerDataFormat::TriggerNumber => number & 0x7FFF_FFFF,
                    TriggerDataFormat::TimeStamp => timestamp & 0x7FFF_FFFF,
                    TriggerDataFormat::Combined => ((timestamp & 0x7FFF) << 16) | (number & 0xFFFF),
                };
                TRIGGER_FLAG | payload
            }
            Self::Tdc { timestamp, value } => {
                (TDC_HEADER << 28) | (u32::from(timestamp) << 12) | (u32::from(value) & 0xFFF)
            }
            Self::Unknown(raw) => raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_chip_words() {
        let fmt = TriggerDataFormat::TriggerNumber;
        // col 5, row 10, le 3
        let raw = 0x4000_0000 | (1 << 25) | (5 << 16) | (10 << 7) | 3;
        assert_eq!(
            RawWord::decode(raw, fmt),
            RawWord::LeadingEdge {
                col: 5,
                row: 10,
                le: 3
            }
        );

        let raw = 0x4000_0000 | (2 << 25) | (511 << 16) | (511 << 7) | 127;
        assert_eq!(
            RawWord::decode(raw, fmt),
            RawWord::TrailingEdge {
                col: 511,
                row: 511,
                te: 127
            }
        );

        assert_eq!(
            RawWord::decode(0x4000_1234, fmt),
            RawWord::FrameHeader {
                timestamp_low: 0x1234
            }
        );
        assert_eq!(
            RawWord::decode(0x4000_0000 | (3 << 25) | 7, fmt),
            RawWord::TimestampHigh { timestamp_high: 7 }
        );
        assert_eq!(
            RawWord::decode(0x4000_0000 | (5 << 25), fmt),
            RawWord::Unknown(0x4A00_0000)
        );
    }

    #[test]
    fn test_is_frame_header() {
        assert!(RawWord::is_frame_header(0x4000_0001));
        assert!(!RawWord::is_frame_header(0x4200_0001));
        assert!(!RawWord::is_frame_header(0xC000_0001));
        assert!(!RawWord::is_frame_header(0x2000_0001));
    }

    #[test]
    fn test_decode_tdc_and_unknown() {
        let fmt = TriggerDataFormat::TriggerNumber;
        assert_eq!(
            RawWord::decode(0x2001_2345, fmt),
            RawWord::Tdc {
                timestamp: 0x0012,
                value: 0x345
            }
        );
        assert_eq!(RawWord::decode(0x1234_5678, fmt), RawWord::Unknown(0x1234_5678));
        assert_eq!(RawWord::decode(0, fmt), RawWord::Unknown(0));
    }

    #[test]
    fn test_decode_trigger_formats() {
        let raw = 0x8000_0000 | (3 << 16) | 42;
        assert_eq!(
            RawWord::decode(raw, TriggerDataFormat::TriggerNumber),
            RawWord::Trigger {
                number: (3 << 16) | 42,
                timestamp: 0
            }
        );
        assert_eq!(
            RawWord::decode(raw, TriggerDataFormat::TimeStamp),
            RawWord::Trigger {
                number: 0,
                timestamp: (3 << 16) | 42
            }
        );
        assert_eq!(
            RawWord::decode(raw, TriggerDataFormat::Combined),
            RawWord::Trigger {
                number: 42,
                timestamp: 3
            }
        );
    }

    #[test]
    fn test_encode_matches_decode() {
        let fmt = TriggerDataFormat::Combined;
        let words = [
            RawWord::FrameHeader { timestamp_low: 99 },
            RawWord::LeadingEdge {
                col: 300,
                row: 17,
                le: 100,
            },
            RawWord::TrailingEdge {
                col: 300,
                row: 17,
                te: 4,
            },
            RawWord::TimestampHigh { timestamp_high: 1 },
            RawWord::Trigger {
                number: 65_535,
                timestamp: 12,
            },
            RawWord::Tdc {
                timestamp: 7,
                value: 4095,
            },
        ];
        for word in words {
            assert_eq!(RawWord::decode(word.encode(fmt), fmt), word);
        }
    }

    #[test]
    fn test_trigger_format_conversion() {
        assert_eq!(
            TriggerDataFormat::try_from(2).unwrap(),
            TriggerDataFormat::Combined
        );
        assert!(TriggerDataFormat::try_from(3).is_err());
        assert_eq!(u8::from(TriggerDataFormat::TimeStamp), 1);
        let parsed: TriggerDataFormat = serde_json::from_str("1").unwrap();
        assert_eq!(parsed, TriggerDataFormat::TimeStamp);
    }
}
