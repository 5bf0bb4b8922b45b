// Copyright © 2023 David Caldwell <david@porkrind.org>

use std::fmt;
use std::ops::RangeInclusive;

use strum::{Display, EnumIter, EnumString, EnumVariantNames};
use thiserror::Error;

use crate::controller::clock_settings;
use crate::image::ImageHeader;

/// Set in a cylinder number to make the seek recalibrate to cylinder 0 instead.
pub const RESTORE_FLAG: u16 = 0x100;

/// The firmware's sector scratch buffer. A sector plus its two record words has to fit.
pub const MAX_SECTOR_SIZE: usize = 2044;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Chs {
    pub cylinder: u16,
    pub head: u8,
    pub sector: u8,
}

impl Chs {
    pub fn new(cylinder: u16, head: u8, sector: u8) -> Chs {
        Chs { cylinder, head, sector }
    }

    pub fn restore() -> Chs {
        Chs { cylinder: RESTORE_FLAG, head: 0, sector: 0 }
    }

    pub fn is_restore(&self) -> bool {
        self.cylinder & RESTORE_FLAG != 0
    }

    /// The cylinder the heads end up on.
    pub fn physical_cylinder(&self) -> u16 {
        if self.is_restore() { 0 } else { self.cylinder }
    }
}

impl fmt::Display for Chs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.is_restore() {
            true  => write!(f, "C=R H={} S={}", self.head, self.sector),
            false => write!(f, "C={} H={} S={}", self.cylinder, self.head, self.sector),
        }
    }
}

/// Where the controller keeps a sector in its memory. Cylinder and head always land in the same
/// bits; the sector field gets narrower as the track gets denser.
pub fn compute_device_address(sectors_per_track: u8, cylinder: u16, head: u8, sector: u8) -> u32 {
    let cylinder = (cylinder & !RESTORE_FLAG) as u32;
    let head = (head & 1) as u32;
    let sector = sector as u32;
    let sector_field = match sectors_per_track {
        s if s > 16 => (sector & 0x1f) << 8,
        s if s > 8  => (sector & 0x0f) << 9,
        s if s > 4  => (sector & 0x07) << 10,
        s if s > 2  => (sector & 0x03) << 11,
        _           => (sector & 0x01) << 12,
    };
    cylinder << 14 | head << 13 | sector_field
}

/// Bytes needed to hold `bits` data bits, rounded up to whole 16 bit words.
pub fn sector_byte_length(bits: u32) -> usize {
    (((bits + 15) >> 4) * 2) as usize
}

/// 2:1 interleave used when sweeping a whole track: even slots first, then odd.
pub fn permuted_sector(sector: u8, sectors_per_track: u8) -> u8 {
    // Round the half up so odd track sizes still map onto every sector exactly once.
    let half = (sectors_per_track as u16 + 1) / 2;
    if half == 0 {
        return sector;
    }
    let sector = sector as u16;
    ((sector % half) * 2 + sector / half) as u8
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum Field {
    #[strum(serialize = "bit rate")]                BitRate,
    #[strum(serialize = "cylinders")]               Cylinders,
    #[strum(serialize = "sectors per track")]       SectorsPerTrack,
    #[strum(serialize = "heads")]                   Heads,
    #[strum(serialize = "microseconds per sector")] UsecPerSector,
    #[strum(serialize = "preamble 1 length")]       Preamble1,
    #[strum(serialize = "preamble 2 length")]       Preamble2,
    #[strum(serialize = "data bits")]               DataBits,
    #[strum(serialize = "postamble length")]        Postamble,
    #[strum(serialize = "cylinder")]                Cylinder,
    #[strum(serialize = "head")]                    Head,
    #[strum(serialize = "sector")]                  Sector,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("{field} {value} is outside {min}-{max}")]
    OutOfBounds { field: Field, value: i64, min: i64, max: i64 },
    #[error("Bit rate {0} can't be generated by the controller clock (1440000, 1545000 or 1600000)")]
    UnsupportedBitRate(u32),
}

const BIT_RATE:          RangeInclusive<i64> = 1_000_000..=20_000_000;
const CYLINDERS:         RangeInclusive<i64> = 1..=203;
const SECTORS_PER_TRACK: RangeInclusive<i64> = 4..=32;
const HEADS:             RangeInclusive<i64> = 1..=2;
const USEC_PER_SECTOR:   RangeInclusive<i64> = 600..=0xffff; // 16 bit register pair
const AMBLE:             RangeInclusive<i64> = 1..=255; // 8 bit controller registers
const DATA_BITS:         RangeInclusive<i64> = 1..=((MAX_SECTOR_SIZE - 4) * 8) as i64;

pub(crate) fn bounded(field: Field, value: i64, range: &RangeInclusive<i64>) -> Result<(), ProfileError> {
    match range.contains(&value) {
        true  => Ok(()),
        false => Err(ProfileError::OutOfBounds { field, value, min: *range.start(), max: *range.end() }),
    }
}

/// Narrows a number read from a file into a profile field, reporting it against that field's bounds.
pub(crate) fn narrow<T: TryFrom<i64>>(field: Field, value: i64) -> Result<T, ProfileError> {
    T::try_from(value).map_err(|_| {
        let range = match field {
            Field::BitRate         => BIT_RATE,
            Field::Cylinders       => CYLINDERS,
            Field::SectorsPerTrack => SECTORS_PER_TRACK,
            Field::Heads           => HEADS,
            Field::UsecPerSector   => USEC_PER_SECTOR,
            Field::DataBits        => DATA_BITS,
            _                      => AMBLE,
        };
        ProfileError::OutOfBounds { field, value, min: *range.start(), max: *range.end() }
    })
}

/// Everything the controller needs to know about the format on the pack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriveGeometryProfile {
    pub controller:        String,
    pub image_name:        String,
    pub description:       String,
    pub date:              String,
    pub bit_rate:          u32,
    pub preamble1:         u32,
    pub preamble2:         u32,
    pub data_bits:         u32,
    pub postamble:         u32,
    pub cylinders:         u16,
    pub heads:             u8,
    pub sectors_per_track: u8,
    pub usec_per_sector:   u32,
    pub rk11d:             bool,
}

pub const DEFAULT_IMAGE_NAME: &str = "imageName";
pub const DEFAULT_DESCRIPTION: &str = "image read from a disk connected to the Tester";
pub const DEFAULT_DATE: &str = "1/1/2025";

impl DriveGeometryProfile {
    pub fn validate(&self) -> Result<(), ProfileError> {
        bounded(Field::BitRate,         self.bit_rate as i64,          &BIT_RATE)?;
        bounded(Field::Cylinders,       self.cylinders as i64,         &CYLINDERS)?;
        bounded(Field::SectorsPerTrack, self.sectors_per_track as i64, &SECTORS_PER_TRACK)?;
        bounded(Field::Heads,           self.heads as i64,             &HEADS)?;
        bounded(Field::UsecPerSector,   self.usec_per_sector as i64,   &USEC_PER_SECTOR)?;
        bounded(Field::Preamble1,       self.preamble1 as i64,         &AMBLE)?;
        bounded(Field::Preamble2,       self.preamble2 as i64,         &AMBLE)?;
        bounded(Field::DataBits,        self.data_bits as i64,         &DATA_BITS)?;
        bounded(Field::Postamble,       self.postamble as i64,         &AMBLE)?;
        if clock_settings(self.bit_rate).is_none() {
            Err(ProfileError::UnsupportedBitRate(self.bit_rate))?;
        }
        Ok(())
    }

    /// Is `chs` on this pack? A restore carries no real cylinder so only its head and sector count.
    pub fn check(&self, chs: Chs) -> Result<(), ProfileError> {
        if !chs.is_restore() {
            bounded(Field::Cylinder, chs.cylinder as i64, &(0..=self.cylinders as i64 - 1))?;
        }
        bounded(Field::Head,   chs.head as i64,   &(0..=self.heads as i64 - 1))?;
        bounded(Field::Sector, chs.sector as i64, &(0..=self.sectors_per_track as i64 - 1))?;
        Ok(())
    }

    pub fn device_address(&self, chs: Chs) -> u32 {
        compute_device_address(self.sectors_per_track, chs.physical_cylinder(), chs.head, chs.sector)
    }

    pub fn sector_bytes(&self) -> usize {
        sector_byte_length(self.data_bits)
    }

    /// Bit times from the sector pulse to the start bit.
    pub fn sector_to_start(&self) -> u32 {
        self.preamble1 + self.preamble2
    }

    pub fn total_sectors(&self) -> u64 {
        self.cylinders as u64 * self.heads as u64 * self.sectors_per_track as u64
    }

    /// This profile with the metadata and geometry an image header carries laid over it.
    pub fn with_header(&self, header: &ImageHeader) -> Result<DriveGeometryProfile, ProfileError> {
        let p = DriveGeometryProfile {
            controller:        header.controller.clone(),
            image_name:        header.image_name.clone(),
            description:       header.description.clone(),
            date:              header.date.clone(),
            bit_rate:          narrow(Field::BitRate,         header.bit_rate as i64)?,
            cylinders:         narrow(Field::Cylinders,       header.cylinders as i64)?,
            sectors_per_track: narrow(Field::SectorsPerTrack, header.sectors_per_track as i64)?,
            heads:             narrow(Field::Heads,           header.heads as i64)?,
            usec_per_sector:   narrow(Field::UsecPerSector,   header.usec_per_sector as i64)?,
            ..self.clone()
        };
        p.validate()?;
        Ok(p)
    }

    /// Does the image header describe the same pack layout as this profile?
    pub fn same_layout(&self, header: &ImageHeader) -> bool {
        header.bit_rate          == self.bit_rate &&
        header.cylinders         == self.cylinders as u32 &&
        header.sectors_per_track == self.sectors_per_track as u32 &&
        header.heads             == self.heads as u32 &&
        header.usec_per_sector   == self.usec_per_sector
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumString, EnumVariantNames, EnumIter, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Preset {
    RK8E,
    RK11D,
    RK11E,
    Alto,
    Nova,
}

/// A figure that appears next to a preset value in older firmware and was never confirmed
/// against a reference pack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AlternateFigure {
    pub field: &'static str,
    pub preset: u32,
    pub alternate: u32,
}

impl Preset {
    pub fn profile(self) -> DriveGeometryProfile {
        // controller, bit rate, preamble 1, preamble 2, data bits, postamble, cylinders, sectors, usec/sector, rk11d
        let (controller, bit_rate, preamble1, preamble2, data_bits, postamble, cylinders, sectors_per_track, usec_per_sector, rk11d) = match self {
            Preset::RK8E  => ("RK8-E",      1_440_000, 120,  82, 3104, 36, 203, 16, 2500, false),
            Preset::RK11D => ("RK11-D",     1_440_000, 128,  80, 4128, 16, 203, 12, 3333, true),
            Preset::RK11E => ("RK11-E",     1_545_000, 128,  80, 4640, 16, 203, 12, 3333, true),
            Preset::Alto  => ("XEROX_ALTO", 1_600_000, 120,  82, 4272, 16, 203, 12, 3333, false),
            Preset::Nova  => ("DG_NOVA",    1_440_000, 187, 101, 4182, 72, 203, 12, 3333, false),
        };
        DriveGeometryProfile {
            controller:  controller.to_string(),
            image_name:  DEFAULT_IMAGE_NAME.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            date:        DEFAULT_DATE.to_string(),
            bit_rate, preamble1, preamble2, data_bits, postamble, cylinders,
            heads: 2,
            sectors_per_track, usec_per_sector, rk11d,
        }
    }

    pub fn alternates(self) -> &'static [AlternateFigure] {
        const STS: &str = "bit times sector to start";
        match self {
            Preset::RK8E  => &[AlternateFigure { field: STS, preset: 202, alternate: 210 }],
            Preset::RK11D => &[AlternateFigure { field: STS, preset: 208, alternate: 216 }],
            Preset::RK11E => &[AlternateFigure { field: STS, preset: 208, alternate: 217 }],
            Preset::Alto  => &[AlternateFigure { field: STS, preset: 202, alternate: 210 }],
            Preset::Nova  => &[AlternateFigure { field: "data bits", preset: 4182, alternate: 4192 }],
        }
    }

    /// The preset whose controller name matches, if any.
    pub fn for_controller(name: &str) -> Option<Preset> {
        use strum::IntoEnumIterator;
        Preset::iter().find(|p| p.profile().controller == name)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_rk8e_address() {
        let p = Preset::RK8E.profile();
        assert_eq!((5<<14)|(1<<13)|((3&0xf)<<9), compute_device_address(p.sectors_per_track, 5, 1, 3));
        assert_eq!((5<<14)|(1<<13)|(3<<9), p.device_address(Chs::new(5, 1, 3)));
    }

    #[test]
    fn test_address_buckets() {
        assert_eq!(1<<14 | 1<<13 | 31<<8, compute_device_address(32, 1, 1, 31));
        assert_eq!(1<<14 | 15<<9,         compute_device_address(16, 1, 0, 15));
        assert_eq!(7<<10,                 compute_device_address(8,  0, 0, 7));
        assert_eq!(3<<11,                 compute_device_address(4,  0, 0, 3));
        assert_eq!(1<<12,                 compute_device_address(2,  0, 0, 1));
    }

    #[test]
    fn test_address_injective() {
        for spt in [4, 5, 8, 9, 12, 16, 17, 24, 32] {
            let mut seen = HashSet::new();
            for c in 0..203 {
                for h in 0..2 {
                    for s in 0..spt {
                        assert!(seen.insert(compute_device_address(spt, c, h, s)),
                                "spt {} C={} H={} S={} collides", spt, c, h, s);
                    }
                }
            }
        }
    }

    #[test]
    fn test_restore_flag_masked() {
        assert_eq!(compute_device_address(16, 0, 1, 2), compute_device_address(16, RESTORE_FLAG, 1, 2));
        let p = Preset::RK8E.profile();
        assert_eq!(Ok(()), p.check(Chs::restore()));
        assert_eq!(0, Chs::restore().physical_cylinder());
    }

    #[test]
    fn test_sector_byte_length() {
        assert_eq!(0, sector_byte_length(0));
        assert_eq!(2, sector_byte_length(1));
        assert_eq!(2, sector_byte_length(16));
        assert_eq!(4, sector_byte_length(17));
        assert_eq!(388, sector_byte_length(3104));
        assert_eq!(524, sector_byte_length(4182));
        let mut last = 0;
        for n in 1..=16320 {
            let len = sector_byte_length(n);
            assert!(len >= last);
            assert_eq!(((n + 15) / 16 * 2) as usize, len);
            last = len;
        }
    }

    #[test]
    fn test_permuted_sector() {
        let order: Vec<u8> = (0..12).map(|s| permuted_sector(s, 12)).collect();
        assert_eq!(vec![0, 2, 4, 6, 8, 10, 1, 3, 5, 7, 9, 11], order);
        for spt in 4..=32 {
            let mut all: Vec<u8> = (0..spt).map(|s| permuted_sector(s, spt)).collect();
            all.sort();
            assert_eq!((0..spt).collect::<Vec<u8>>(), all, "spt {}", spt);
        }
    }

    #[test]
    fn test_presets_valid() {
        for p in Preset::iter() {
            p.profile().validate().expect("preset should be valid");
            assert_eq!(Some(p), Preset::for_controller(&p.profile().controller));
        }
        assert_eq!(Ok(Preset::RK11E), Preset::from_str("rk11e"));
        assert_eq!(Ok(Preset::Nova), Preset::from_str("NOVA"));
        assert_eq!(202, Preset::RK8E.profile().sector_to_start());
        for p in Preset::iter() {
            for a in p.alternates() {
                assert_ne!(a.preset, a.alternate);
            }
        }
    }

    #[test]
    fn test_validate_rejects() {
        let mut p = Preset::RK8E.profile();
        p.cylinders = 204;
        assert_eq!(Err(ProfileError::OutOfBounds { field: Field::Cylinders, value: 204, min: 1, max: 203 }), p.validate());

        let mut p = Preset::RK8E.profile();
        p.sectors_per_track = 3;
        assert!(p.validate().is_err());

        let mut p = Preset::RK8E.profile();
        p.bit_rate = 1_500_000;
        assert_eq!(Err(ProfileError::UnsupportedBitRate(1_500_000)), p.validate());

        let mut p = Preset::RK8E.profile();
        p.data_bits = 20000;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_check_chs() {
        let p = Preset::RK8E.profile();
        assert_eq!(Ok(()), p.check(Chs::new(202, 1, 15)));
        assert!(p.check(Chs::new(203, 0, 0)).is_err());
        assert!(p.check(Chs::new(0, 2, 0)).is_err());
        assert!(p.check(Chs::new(0, 0, 16)).is_err());
    }
}
