//! Deterministic binary serialization of one frame's foreground points.
//!
//! Layout, all little-endian:
//!
//! ```text
//! magic    b"KSFG"
//! version  u8
//! sensor   u16 length + UTF-8 bytes
//! frame    u64 frame_start_ns
//! count    u32
//! point    f32 x, f32 y, f32 z, u8 ring, u8 intensity,
//!          u8 return_index, u8 reserved, i32 packet_offset_ns
//! ```
//!
//! The encoding is byte-for-byte reproducible for the same inputs.

use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use kerb_types::WorldPoint;

pub const TRAINING_MAGIC: &[u8; 4] = b"KSFG";
pub const TRAINING_VERSION: u8 = 1;

#[derive(thiserror::Error, Debug)]
pub enum TrainingError {
    #[error("{source}")]
    Io {
        #[from]
        source: io::Error,
    },
    #[error("bad magic tag")]
    BadMagic,
    #[error("unsupported blob version {0}")]
    UnsupportedVersion(u8),
    #[error("sensor id is not valid UTF-8")]
    InvalidSensorId,
    #[error("sensor id longer than 65535 bytes")]
    SensorIdTooLong,
}

/// One decoded training point; the f32/offset representation is the
/// wire format, not the pipeline's.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub ring: u8,
    pub intensity: u8,
    pub return_index: u8,
    pub packet_offset_ns: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingFrame {
    pub sensor_id: String,
    pub frame_start_ns: u64,
    pub points: Vec<TrainingPoint>,
}

/// Encode one frame's foreground world points into `w`.
pub fn encode_frame<W: Write>(
    w: &mut W,
    sensor_id: &str,
    frame_start_ns: u64,
    points: &[WorldPoint],
) -> Result<(), TrainingError> {
    if sensor_id.len() > u16::MAX as usize {
        return Err(TrainingError::SensorIdTooLong);
    }
    w.write_all(TRAINING_MAGIC)?;
    w.write_u8(TRAINING_VERSION)?;
    w.write_u16::<LittleEndian>(sensor_id.len() as u16)?;
    w.write_all(sensor_id.as_bytes())?;
    w.write_u64::<LittleEndian>(frame_start_ns)?;
    w.write_u32::<LittleEndian>(points.len() as u32)?;
    for p in points {
        w.write_f32::<LittleEndian>(p.x as f32)?;
        w.write_f32::<LittleEndian>(p.y as f32)?;
        w.write_f32::<LittleEndian>(p.z as f32)?;
        w.write_u8(p.ring)?;
        w.write_u8(p.intensity)?;
        w.write_u8(p.return_index)?;
        w.write_u8(0)?;
        w.write_i32::<LittleEndian>(packet_offset_ns(frame_start_ns, p.timestamp_ns))?;
    }
    Ok(())
}

/// Offset of a point's timestamp relative to the frame start, clamped
/// into i32 range.
fn packet_offset_ns(frame_start_ns: u64, timestamp_ns: u64) -> i32 {
    let delta = timestamp_ns as i128 - frame_start_ns as i128;
    delta.clamp(i32::MIN as i128, i32::MAX as i128) as i32
}

pub fn encode_frame_to_vec(
    sensor_id: &str,
    frame_start_ns: u64,
    points: &[WorldPoint],
) -> Result<Vec<u8>, TrainingError> {
    let mut buf = Vec::with_capacity(19 + sensor_id.len() + points.len() * 19);
    encode_frame(&mut buf, sensor_id, frame_start_ns, points)?;
    Ok(buf)
}

/// Symmetric reader for the blob format.
pub fn decode_frame(bytes: &[u8]) -> Result<TrainingFrame, TrainingError> {
    let mut cursor = Cursor::new(bytes);
    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic)?;
    if &magic != TRAINING_MAGIC {
        return Err(TrainingError::BadMagic);
    }
    let version = cursor.read_u8()?;
    if version != TRAINING_VERSION {
        return Err(TrainingError::UnsupportedVersion(version));
    }
    let id_len = cursor.read_u16::<LittleEndian>()? as usize;
    let mut id_bytes = vec![0u8; id_len];
    cursor.read_exact(&mut id_bytes)?;
    let sensor_id = String::from_utf8(id_bytes).map_err(|_| TrainingError::InvalidSensorId)?;
    let frame_start_ns = cursor.read_u64::<LittleEndian>()?;
    let count = cursor.read_u32::<LittleEndian>()? as usize;

    let mut points = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        let x = cursor.read_f32::<LittleEndian>()?;
        let y = cursor.read_f32::<LittleEndian>()?;
        let z = cursor.read_f32::<LittleEndian>()?;
        let ring = cursor.read_u8()?;
        let intensity = cursor.read_u8()?;
        let return_index = cursor.read_u8()?;
        let _reserved = cursor.read_u8()?;
        let packet_offset_ns = cursor.read_i32::<LittleEndian>()?;
        points.push(TrainingPoint {
            x,
            y,
            z,
            ring,
            intensity,
            return_index,
            packet_offset_ns,
        });
    }

    Ok(TrainingFrame {
        sensor_id,
        frame_start_ns,
        points,
    })
}
