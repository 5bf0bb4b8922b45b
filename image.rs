// Copyright © 2023 David Caldwell <david@porkrind.org>

// RK05 disk image files (version 1.1): a fixed size header followed by one record per sector in
// cylinder, head, sector order. Each record is two little endian words (bit times from the sector
// pulse to the start bit, data bit count) and then the data, rounded up to whole words.

use std::io::{Read, Write};
use std::path::Path;

use bytebuffer::{ByteBuffer, Endian};
use thiserror::Error;

use crate::geometry::{sector_byte_length, DriveGeometryProfile};

pub const MAGIC: [u8; 10] = *b"\x89RK05\r\n\x1a\0\0";
pub const VERSION: [u8; 4] = *b"1.1\0";

pub const IMAGE_NAME_LEN:  usize = 11;
pub const DESCRIPTION_LEN: usize = 200;
pub const DATE_LEN:        usize = 20;
pub const CONTROLLER_LEN:  usize = 100;

pub const HEADER_LEN: usize = MAGIC.len() + VERSION.len()
    + IMAGE_NAME_LEN + DESCRIPTION_LEN + DATE_LEN + CONTROLLER_LEN
    + 5 * 4;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Not an RK05 image (magic number {0:02x?})")]
    BadMagic(Vec<u8>),
    #[error("Unsupported image version {0:?}")]
    BadVersion(String),
    #[error("Image ends in the middle of a {0}")]
    Truncated(&'static str),
    #[error("Header {field} is {value}, which doesn't fit")]
    BadField { field: &'static str, value: i64 },
    #[error("Image was made with {found}, but the drive is set up for {expected}")]
    GeometryMismatch { expected: String, found: String },
    #[error("Sector claims {bits} data bits, more than the {nominal} the profile allows")]
    OversizeSector { bits: u32, nominal: u32 },
    #[error("Sector data is {len} bytes, more than the {max} the profile allows")]
    OversizePayload { len: usize, max: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageHeader {
    pub image_name:        String,
    pub description:       String,
    pub date:              String,
    pub controller:        String,
    pub bit_rate:          u32,
    pub cylinders:         u32,
    pub sectors_per_track: u32,
    pub heads:             u32,
    pub usec_per_sector:   u32,
}

impl ImageHeader {
    pub fn from_profile(p: &DriveGeometryProfile) -> ImageHeader {
        ImageHeader {
            image_name:        p.image_name.clone(),
            description:       p.description.clone(),
            date:              p.date.clone(),
            controller:        p.controller.clone(),
            bit_rate:          p.bit_rate,
            cylinders:         p.cylinders as u32,
            sectors_per_track: p.sectors_per_track as u32,
            heads:             p.heads as u32,
            usec_per_sector:   p.usec_per_sector,
        }
    }

    /// Everything after the magic number and version.
    pub fn from_repr(buf: &mut ByteBuffer) -> Result<ImageHeader, ImageError> {
        Ok(ImageHeader {
            image_name:        read_cstring(buf, IMAGE_NAME_LEN)?,
            description:       read_cstring(buf, DESCRIPTION_LEN)?,
            date:              read_cstring(buf, DATE_LEN)?,
            controller:        read_cstring(buf, CONTROLLER_LEN)?,
            bit_rate:          read_int(buf, "bit rate")?,
            cylinders:         read_int(buf, "cylinders")?,
            sectors_per_track: read_int(buf, "sectors per track")?,
            heads:             read_int(buf, "heads")?,
            usec_per_sector:   read_int(buf, "microseconds per sector")?,
        })
    }

    pub fn repr(&self) -> Result<Vec<u8>, ImageError> {
        let mut buf = ByteBuffer::new();
        buf.write_bytes(&MAGIC);
        buf.write_bytes(&VERSION);
        write_cstring(&mut buf, &self.image_name,  IMAGE_NAME_LEN);
        write_cstring(&mut buf, &self.description, DESCRIPTION_LEN);
        write_cstring(&mut buf, &self.date,        DATE_LEN);
        write_cstring(&mut buf, &self.controller,  CONTROLLER_LEN);
        write_int(&mut buf, "bit rate",                self.bit_rate)?;
        write_int(&mut buf, "cylinders",               self.cylinders)?;
        write_int(&mut buf, "sectors per track",       self.sectors_per_track)?;
        write_int(&mut buf, "heads",                   self.heads)?;
        write_int(&mut buf, "microseconds per sector", self.usec_per_sector)?;
        Ok(buf.into_vec())
    }

    pub fn layout(&self) -> String {
        format!("{} ({} bit/s, {} cylinders, {} heads, {} sectors)",
                self.controller, self.bit_rate, self.cylinders, self.heads, self.sectors_per_track)
    }
}

/// The longest prefix of `s` that fits in `max` bytes without splitting a character.
pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// Fixed width, zero padded, and always zero terminated (so at most width-1 characters survive).
fn write_cstring(buf: &mut ByteBuffer, s: &str, width: usize) {
    let s = truncate(s, width - 1);
    buf.write_bytes(s.as_bytes());
    buf.write_bytes(&vec![0; width - s.len()]);
}

fn read_cstring(buf: &mut ByteBuffer, width: usize) -> Result<String, ImageError> {
    let bytes = buf.read_bytes(width)?;
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(width);
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

fn write_int(buf: &mut ByteBuffer, field: &'static str, value: u32) -> Result<(), ImageError> {
    buf.write_i32(i32::try_from(value).map_err(|_| ImageError::BadField { field, value: value as i64 })?);
    Ok(())
}

fn read_int(buf: &mut ByteBuffer, field: &'static str) -> Result<u32, ImageError> {
    let value = buf.read_i32()?;
    u32::try_from(value).map_err(|_| ImageError::BadField { field, value: value as i64 })
}

fn read_exactly(stream: &mut impl Read, len: usize, what: &'static str) -> Result<Vec<u8>, ImageError> {
    let mut buf = vec![0; len];
    stream.read_exact(&mut buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => ImageError::Truncated(what),
        _                                 => ImageError::Io(e),
    })?;
    Ok(buf)
}

/// Reads and checks the header. The magic number and version are compared before anything else
/// is read, so a foreign file costs at most those 14 bytes of the stream.
pub fn read_header(stream: &mut impl Read) -> Result<ImageHeader, ImageError> {
    let magic = read_exactly(stream, MAGIC.len(), "magic number")?;
    if magic != MAGIC {
        Err(ImageError::BadMagic(magic))?;
    }
    let version = read_exactly(stream, VERSION.len(), "version")?;
    if version != VERSION {
        Err(ImageError::BadVersion(String::from_utf8_lossy(&version).trim_end_matches('\0').to_string()))?;
    }
    let rest = read_exactly(stream, HEADER_LEN - MAGIC.len() - VERSION.len(), "header")?;
    let header = ImageHeader::from_repr(&mut ByteBuffer::from_bytes(&rest))?;
    log::debug!("Image header: {:?}", header);
    Ok(header)
}

pub fn write_header(stream: &mut impl Write, profile: &DriveGeometryProfile) -> Result<(), ImageError> {
    stream.write_all(&ImageHeader::from_profile(profile).repr()?)?;
    Ok(())
}

pub fn peek_header(path: &Path) -> Result<ImageHeader, ImageError> {
    read_header(&mut std::fs::File::open(path)?)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectorRecord {
    pub sector_to_start: u16,
    pub bits:            u16,
    pub payload:         Vec<u8>,
}

/// Reads one record. Short sectors come back short; padding them out is up to the caller.
pub fn read_sector_record(stream: &mut impl Read, profile: &DriveGeometryProfile) -> Result<SectorRecord, ImageError> {
    let mut buf = ByteBuffer::from_bytes(&read_exactly(stream, 4, "sector record")?);
    buf.set_endian(Endian::LittleEndian);
    let sector_to_start = buf.read_u16()?;
    let bits = buf.read_u16()?;
    if bits as u32 > profile.data_bits {
        Err(ImageError::OversizeSector { bits: bits as u32, nominal: profile.data_bits })?;
    }
    let payload = read_exactly(stream, sector_byte_length(bits as u32), "sector")?;
    Ok(SectorRecord { sector_to_start, bits, payload })
}

/// Writes one record with the profile's nominal lengths, whatever the sector actually held.
pub fn write_sector_record(stream: &mut impl Write, profile: &DriveGeometryProfile, payload: &[u8]) -> Result<(), ImageError> {
    let len = profile.sector_bytes();
    if payload.len() > len {
        Err(ImageError::OversizePayload { len: payload.len(), max: len })?;
    }
    let mut buf = ByteBuffer::new();
    buf.set_endian(Endian::LittleEndian);
    buf.write_u16(profile.sector_to_start() as u16);
    buf.write_u16(profile.data_bits as u16);
    buf.write_bytes(payload);
    buf.write_bytes(&vec![0; len - payload.len()]);
    stream.write_all(buf.as_bytes())?;
    Ok(())
}
