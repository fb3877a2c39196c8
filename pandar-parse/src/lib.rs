//! Decoder for Pandar40P-class UDP payloads.
//!
//! A data packet is 1262 bytes: ten 124-byte blocks followed by a
//! 22-byte tail. Each block carries a start flag, the azimuth of its
//! firing and 40 channel units (distance in 4 mm steps plus
//! reflectivity). The tail carries motor speed, a microsecond timestamp
//! within the current UTC second, the return mode and the UTC wall
//! time. All multi-byte fields are little-endian.

use chrono::NaiveDate;

use kerb_types::PolarPoint;

mod frame;
pub use frame::FrameAssembler;

pub const PACKET_LEN: usize = 1262;
pub const NUM_BLOCKS: usize = 10;
pub const NUM_CHANNELS: usize = 40;

const BLOCK_LEN: usize = 4 + NUM_CHANNELS * 3;
const BODY_LEN: usize = NUM_BLOCKS * BLOCK_LEN;
const TAIL_RESERVED_LEN: usize = 6;

const BLOCK_FLAG: u16 = 0xEEFF;
const DISTANCE_UNIT_M: f64 = 0.004;
const AZIMUTH_UNIT_DEG: f64 = 0.01;

/// Interval between successive block firings at nominal motor speed.
pub const BLOCK_FIRING_INTERVAL_NS: u64 = 55_560;

const RETURN_MODE_DUAL: u8 = 0x39;

/// Per-channel beam elevation in degrees, top of the fan first.
pub static ELEVATION_DEG: [f64; NUM_CHANNELS] = [
    15.0, 11.0, 8.0, 5.0, 3.0, 2.0, 1.67, 1.33, 1.0, 0.67, 0.33, 0.0, -0.33, -0.67, -1.0, -1.33,
    -1.67, -2.0, -2.33, -2.67, -3.0, -3.33, -3.67, -4.0, -4.33, -4.67, -5.0, -5.33, -5.67, -6.0,
    -7.0, -8.0, -9.0, -10.0, -11.0, -12.0, -13.0, -14.0, -19.0, -25.0,
];

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("payload truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("block {block} has start flag {flag:#06x}")]
    BadBlockFlag { block: usize, flag: u16 },
    #[error("packet tail UTC time is invalid")]
    InvalidUtcTime,
}

/// How point timestamps are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampMode {
    /// Host clock at dispatch (for offline captures, the capture time).
    SystemTime,
    /// The packet's embedded UTC time.
    #[default]
    PacketHeaderTime,
    /// Embedded time plus a per-firing offset within the packet.
    PerShotInterpolated,
}

/// Everything decoded from one data packet.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPacket {
    pub points: Vec<PolarPoint>,
    /// Motor speed from the tail, if the field was populated.
    pub motor_rpm: Option<u16>,
    /// The packet-level timestamp the configured mode resolved to.
    pub packet_time_ns: u64,
}

#[derive(Debug, Default)]
pub struct PacketParser {
    timestamp_mode: TimestampMode,
}

impl PacketParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_timestamp_mode(&mut self, mode: TimestampMode) {
        self.timestamp_mode = mode;
    }

    /// Decode one UDP payload.
    ///
    /// `capture_ns` is the host-side receive time; it is only used in
    /// [`TimestampMode::SystemTime`]. Zero-distance channel units are
    /// empty returns and produce no point.
    pub fn parse(&self, payload: &[u8], capture_ns: u64) -> Result<ParsedPacket, ParseError> {
        if payload.len() != PACKET_LEN {
            return Err(ParseError::Truncated {
                expected: PACKET_LEN,
                actual: payload.len(),
            });
        }

        let tail = Tail::decode(&payload[BODY_LEN..])?;
        let packet_time_ns = match self.timestamp_mode {
            TimestampMode::SystemTime => capture_ns,
            TimestampMode::PacketHeaderTime | TimestampMode::PerShotInterpolated => {
                tail.utc_time_ns
            }
        };
        let dual_return = tail.return_mode == RETURN_MODE_DUAL;

        let mut points = Vec::with_capacity(NUM_BLOCKS * NUM_CHANNELS);
        for block in 0..NUM_BLOCKS {
            let raw = &payload[block * BLOCK_LEN..(block + 1) * BLOCK_LEN];
            let flag = u16_le(&raw[0..2]);
            if flag != BLOCK_FLAG {
                return Err(ParseError::BadBlockFlag { block, flag });
            }
            let azimuth_deg = f64::from(u16_le(&raw[2..4])) * AZIMUTH_UNIT_DEG % 360.0;

            // In dual-return mode blocks arrive in pairs that share one
            // firing, so the firing index advances every other block.
            let firing = if dual_return { block / 2 } else { block };
            let timestamp_ns = match self.timestamp_mode {
                TimestampMode::PerShotInterpolated => {
                    packet_time_ns + firing as u64 * BLOCK_FIRING_INTERVAL_NS
                }
                _ => packet_time_ns,
            };
            let return_index = if dual_return { (block % 2) as u8 } else { 0 };

            for channel in 0..NUM_CHANNELS {
                let unit = &raw[4 + channel * 3..4 + (channel + 1) * 3];
                let distance_raw = u16_le(&unit[0..2]);
                let intensity = unit[2];
                if distance_raw == 0 {
                    continue;
                }
                points.push(PolarPoint {
                    azimuth_deg,
                    elevation_deg: ELEVATION_DEG[channel],
                    range_m: f64::from(distance_raw) * DISTANCE_UNIT_M,
                    intensity,
                    ring: channel as u8,
                    timestamp_ns,
                    return_index,
                });
            }
        }

        let motor_rpm = if tail.motor_speed_rpm != 0 {
            Some(tail.motor_speed_rpm)
        } else {
            None
        };

        Ok(ParsedPacket {
            points,
            motor_rpm,
            packet_time_ns,
        })
    }
}

#[inline]
fn u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

#[inline]
fn u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

struct Tail {
    motor_speed_rpm: u16,
    return_mode: u8,
    utc_time_ns: u64,
}

impl Tail {
    fn decode(tail: &[u8]) -> Result<Tail, ParseError> {
        let motor_speed_rpm = u16_le(&tail[TAIL_RESERVED_LEN..TAIL_RESERVED_LEN + 2]);
        let timestamp_us = u32_le(&tail[8..12]);
        let return_mode = tail[12];
        let (year, month, day) = (tail[14], tail[15], tail[16]);
        let (hour, minute, second) = (tail[17], tail[18], tail[19]);

        let date = NaiveDate::from_ymd_opt(2000 + i32::from(year), month.into(), day.into())
            .and_then(|d| d.and_hms_opt(hour.into(), minute.into(), second.into()))
            .ok_or(ParseError::InvalidUtcTime)?;
        let epoch_s = date.and_utc().timestamp();
        if epoch_s < 0 {
            return Err(ParseError::InvalidUtcTime);
        }
        let utc_time_ns = epoch_s as u64 * 1_000_000_000 + u64::from(timestamp_us) * 1_000;

        Ok(Tail {
            motor_speed_rpm,
            return_mode,
            utc_time_ns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};

    /// Build a packet whose ten blocks carry the given azimuths
    /// (centidegrees) and a constant distance/intensity on every
    /// channel.
    fn build_packet(
        azimuths_centideg: [u16; NUM_BLOCKS],
        distance_raw: u16,
        rpm: u16,
        return_mode: u8,
        timestamp_us: u32,
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PACKET_LEN);
        for az in azimuths_centideg {
            buf.write_u16::<LittleEndian>(BLOCK_FLAG).unwrap();
            buf.write_u16::<LittleEndian>(az).unwrap();
            for _ in 0..NUM_CHANNELS {
                buf.write_u16::<LittleEndian>(distance_raw).unwrap();
                buf.write_u8(100).unwrap();
            }
        }
        buf.extend_from_slice(&[0u8; TAIL_RESERVED_LEN]);
        buf.write_u16::<LittleEndian>(rpm).unwrap();
        buf.write_u32::<LittleEndian>(timestamp_us).unwrap();
        buf.write_u8(return_mode).unwrap();
        buf.write_u8(0x42).unwrap();
        // 2024-05-01 12:00:00 UTC
        buf.extend_from_slice(&[24, 5, 1, 12, 0, 0]);
        buf.write_u16::<LittleEndian>(0).unwrap();
        assert_eq!(buf.len(), PACKET_LEN);
        buf
    }

    fn utc_ns(timestamp_us: u32) -> u64 {
        let epoch_s = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp() as u64;
        epoch_s * 1_000_000_000 + u64::from(timestamp_us) * 1_000
    }

    #[test]
    fn parses_all_points() {
        let payload = build_packet([100; NUM_BLOCKS], 2500, 600, 0x37, 0);
        let parser = PacketParser::new();
        let parsed = parser.parse(&payload, 0).unwrap();
        assert_eq!(parsed.points.len(), NUM_BLOCKS * NUM_CHANNELS);
        assert_eq!(parsed.motor_rpm, Some(600));

        let p = &parsed.points[0];
        assert_eq!(p.azimuth_deg, 1.0);
        assert_eq!(p.range_m, 10.0);
        assert_eq!(p.ring, 0);
        assert_eq!(p.elevation_deg, 15.0);
        assert_eq!(p.return_index, 0);
        assert_eq!(p.intensity, 100);
    }

    #[test]
    fn zero_distance_returns_are_skipped() {
        let payload = build_packet([0; NUM_BLOCKS], 0, 600, 0x37, 0);
        let parsed = PacketParser::new().parse(&payload, 0).unwrap();
        assert!(parsed.points.is_empty());
    }

    #[test]
    fn zero_rpm_is_absent() {
        let payload = build_packet([0; NUM_BLOCKS], 100, 0, 0x37, 0);
        let parsed = PacketParser::new().parse(&payload, 0).unwrap();
        assert_eq!(parsed.motor_rpm, None);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let payload = build_packet([0; NUM_BLOCKS], 100, 600, 0x37, 0);
        let err = PacketParser::new().parse(&payload[..100], 0).unwrap_err();
        assert_eq!(
            err,
            ParseError::Truncated {
                expected: PACKET_LEN,
                actual: 100
            }
        );
    }

    #[test]
    fn bad_block_flag_is_an_error() {
        let mut payload = build_packet([0; NUM_BLOCKS], 100, 600, 0x37, 0);
        payload[BLOCK_LEN] = 0xAA;
        payload[BLOCK_LEN + 1] = 0xBB;
        let err = PacketParser::new().parse(&payload, 0).unwrap_err();
        assert_eq!(
            err,
            ParseError::BadBlockFlag {
                block: 1,
                flag: 0xBBAA
            }
        );
    }

    #[test]
    fn timestamp_modes() {
        let payload = build_packet([0; NUM_BLOCKS], 100, 600, 0x37, 250);
        let mut parser = PacketParser::new();

        parser.set_timestamp_mode(TimestampMode::SystemTime);
        let parsed = parser.parse(&payload, 7_000).unwrap();
        assert_eq!(parsed.packet_time_ns, 7_000);
        assert!(parsed.points.iter().all(|p| p.timestamp_ns == 7_000));

        parser.set_timestamp_mode(TimestampMode::PacketHeaderTime);
        let parsed = parser.parse(&payload, 7_000).unwrap();
        assert_eq!(parsed.packet_time_ns, utc_ns(250));
        assert!(parsed.points.iter().all(|p| p.timestamp_ns == utc_ns(250)));

        parser.set_timestamp_mode(TimestampMode::PerShotInterpolated);
        let parsed = parser.parse(&payload, 7_000).unwrap();
        let first_block = &parsed.points[0];
        let last_block = &parsed.points[(NUM_BLOCKS - 1) * NUM_CHANNELS];
        assert_eq!(first_block.timestamp_ns, utc_ns(250));
        assert_eq!(
            last_block.timestamp_ns,
            utc_ns(250) + (NUM_BLOCKS as u64 - 1) * BLOCK_FIRING_INTERVAL_NS
        );
    }

    #[test]
    fn dual_return_blocks_pair_up() {
        let payload = build_packet([500; NUM_BLOCKS], 100, 600, RETURN_MODE_DUAL, 0);
        let mut parser = PacketParser::new();
        parser.set_timestamp_mode(TimestampMode::PerShotInterpolated);
        let parsed = parser.parse(&payload, 0).unwrap();

        let block0 = &parsed.points[0];
        let block1 = &parsed.points[NUM_CHANNELS];
        assert_eq!(block0.return_index, 0);
        assert_eq!(block1.return_index, 1);
        // Paired blocks come from the same firing.
        assert_eq!(block0.timestamp_ns, block1.timestamp_ns);

        let block2 = &parsed.points[2 * NUM_CHANNELS];
        assert_eq!(block2.return_index, 0);
        assert_eq!(
            block2.timestamp_ns,
            block0.timestamp_ns + BLOCK_FIRING_INTERVAL_NS
        );
    }
}
