//! Framing for payload files.
//!
//! Every payload file is:
//! ```text
//! [magic: 4 bytes "WMPL"][version: 1 byte][length: 8 bytes LE][data: N bytes][crc32: 4 bytes LE]
//! ```
//! The checksum lets a load detect a torn or bit-rotted file instead of
//! handing garbage to the owning annotation.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;

/// Current payload framing version.
const PAYLOAD_VERSION: u8 = 1;

/// Magic bytes identifying a payload file.
pub const MAGIC: [u8; 4] = *b"WMPL";

/// Payloads above this size are rejected on read (1 GiB).
const MAX_PAYLOAD_SIZE: u64 = 1024 * 1024 * 1024;

/// Writes one framed payload.
pub fn write_payload(writer: &mut impl Write, data: &[u8]) -> IoResult<()> {
    let mut hasher = Hasher::new();
    hasher.update(data);
    let crc = hasher.finalize();

    writer.write_all(&MAGIC)?;
    writer.write_all(&[PAYLOAD_VERSION])?;
    writer.write_all(&(data.len() as u64).to_le_bytes())?;
    writer.write_all(data)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Reads one framed payload, verifying magic, version and checksum.
pub fn read_payload(reader: &mut impl Read) -> IoResult<Vec<u8>> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}"),
        ));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != PAYLOAD_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!(
                "unsupported payload version: {} (expected {PAYLOAD_VERSION})",
                version[0]
            ),
        ));
    }

    let mut len_bytes = [0u8; 8];
    reader.read_exact(&mut len_bytes)?;
    let len = u64::from_le_bytes(len_bytes);
    if len > MAX_PAYLOAD_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("payload size {len} exceeds maximum {MAX_PAYLOAD_SIZE}"),
        ));
    }

    let len = usize::try_from(len)
        .map_err(|_| IoError::new(ErrorKind::InvalidData, "payload size overflows usize"))?;
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let computed_crc = hasher.finalize();

    if stored_crc != computed_crc {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("CRC mismatch: stored={stored_crc:08x}, computed={computed_crc:08x} (data corrupted)"),
        ));
    }

    Ok(data)
}
