// Copyright © 2023 David Caldwell <david@porkrind.org>

// Drive parameter description files: a small text file, one field per line, describing a pack
// format the presets don't cover.

use std::path::Path;

use thiserror::Error;

use crate::geometry::{narrow, DriveGeometryProfile, Field, ProfileError};
use crate::image::{truncate, CONTROLLER_LEN, DATE_LEN, DESCRIPTION_LEN, IMAGE_NAME_LEN};

pub const MAGIC: &str = "DPD/25$q";
pub const MIN_SIZE: usize = 32;
pub const MAX_SIZE: usize = 700;
const NUMBER_WIDTH: usize = 19;

#[derive(Debug, Error)]
pub enum DpdError {
    #[error("Parameter file is only {0} bytes")]
    TooShort(usize),
    #[error("Parameter file is {0} bytes, it must be under {MAX_SIZE}")]
    TooLong(usize),
    #[error("Parameter file ends before the {0}")]
    MissingField(&'static str),
    #[error("Not a drive parameter file (magic {0:?})")]
    BadMagic(String),
    #[error("Bad {field}: {text:?}")]
    BadNumber { field: &'static str, text: String },
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

struct Lines<'a> {
    lines: std::str::Lines<'a>,
}

impl<'a> Lines<'a> {
    fn next(&mut self, what: &'static str) -> Result<&'a str, DpdError> {
        // str::lines() already drops the CR of a CR-LF pair
        self.lines.next().ok_or(DpdError::MissingField(what))
    }

    fn string(&mut self, what: &'static str, width: usize) -> Result<String, DpdError> {
        Ok(truncate(self.next(what)?, width - 1).to_string())
    }

    fn number(&mut self, what: &'static str) -> Result<i64, DpdError> {
        let text = self.next(what)?.trim();
        let bad = || DpdError::BadNumber { field: what, text: text.to_string() };
        if text.len() > NUMBER_WIDTH {
            Err(bad())?;
        }
        text.parse::<i64>().map_err(|_| bad())
    }
}

pub fn parse(data: &[u8]) -> Result<DriveGeometryProfile, DpdError> {
    if data.len() < MIN_SIZE {
        Err(DpdError::TooShort(data.len()))?;
    }
    if data.len() >= MAX_SIZE {
        Err(DpdError::TooLong(data.len()))?;
    }
    let text = String::from_utf8_lossy(data);
    let mut l = Lines { lines: text.lines() };

    let magic = l.next("magic number")?;
    if magic != MAGIC {
        Err(DpdError::BadMagic(magic.to_string()))?;
    }
    let version = l.next("version")?;
    log::debug!("Drive parameters version {:?}", version);

    let image_name  = l.string("image name",  IMAGE_NAME_LEN)?;
    let description = l.string("description", DESCRIPTION_LEN)?;
    let date        = l.string("date",        DATE_LEN)?;
    let controller  = l.string("controller",  CONTROLLER_LEN)?;

    let profile = DriveGeometryProfile {
        image_name, description, date, controller,
        bit_rate:          narrow(Field::BitRate,         l.number("bit rate")?)?,
        cylinders:         narrow(Field::Cylinders,       l.number("cylinders")?)?,
        sectors_per_track: narrow(Field::SectorsPerTrack, l.number("sectors per track")?)?,
        heads:             narrow(Field::Heads,           l.number("heads")?)?,
        usec_per_sector:   narrow(Field::UsecPerSector,   l.number("microseconds per sector")?)?,
        preamble1:         narrow(Field::Preamble1,       l.number("preamble 1 length")?)?,
        preamble2:         narrow(Field::Preamble2,       l.number("preamble 2 length")?)?,
        data_bits:         narrow(Field::DataBits,        l.number("data bits")?)?,
        postamble:         narrow(Field::Postamble,       l.number("postamble length")?)?,
        rk11d:             l.number("RK11-D flag")? != 0,
    };
    profile.validate()?;
    Ok(profile)
}

pub fn load(path: &Path) -> Result<DriveGeometryProfile, DpdError> {
    let data = std::fs::read(path)?;
    log::info!("Reading drive parameters from {}", path.display());
    parse(&data)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::Preset;

    fn dpd(lines: &[&str], eol: &str) -> Vec<u8> {
        lines.iter().map(|l| format!("{}{}", l, eol)).collect::<String>().into_bytes()
    }

    const RK11E: &[&str] = &["DPD/25$q", "1.0", "rk11e_pack", "RK11-E test pack", "3/4/2025", "RK11-E",
                             "1545000", "203", "12", "2", "3333", "128", "80", "4640", "16", "1"];

    #[test]
    fn test_parse() {
        let p = parse(&dpd(RK11E, "\r\n")).expect("parse");
        assert_eq!(DriveGeometryProfile {
            image_name:  "rk11e_pack".to_string(),
            description: "RK11-E test pack".to_string(),
            date:        "3/4/2025".to_string(),
            ..Preset::RK11E.profile()
        }, p);
        assert_eq!(p, parse(&dpd(RK11E, "\n")).expect("parse lf"));
    }

    #[test]
    fn test_truncates_strings() {
        let mut lines = RK11E.to_vec();
        lines[2] = "a_very_long_image_name";
        let p = parse(&dpd(&lines, "\r\n")).expect("parse");
        assert_eq!("a_very_lon", p.image_name);
    }

    #[test]
    fn test_rejects() {
        assert!(matches!(parse(b"DPD/25$q\r\n"), Err(DpdError::TooShort(10))));
        assert!(matches!(parse(&vec![b'\n'; 700]), Err(DpdError::TooLong(700))));

        let mut lines = RK11E.to_vec();
        lines[0] = "DPD/24$q";
        assert!(matches!(parse(&dpd(&lines, "\r\n")), Err(DpdError::BadMagic(_))));

        let mut lines = RK11E.to_vec();
        lines[7] = "two hundred";
        assert!(matches!(parse(&dpd(&lines, "\r\n")), Err(DpdError::BadNumber { field: "cylinders", .. })));

        let mut lines = RK11E.to_vec();
        lines[6] = "00000000000000001545000";
        assert!(matches!(parse(&dpd(&lines, "\r\n")), Err(DpdError::BadNumber { field: "bit rate", .. })));

        let mut lines = RK11E.to_vec();
        lines[8] = "40";
        assert!(matches!(parse(&dpd(&lines, "\r\n")), Err(DpdError::Profile(_))));

        let mut lines = RK11E.to_vec();
        lines[13] = "-5";
        assert!(matches!(parse(&dpd(&lines, "\r\n")), Err(DpdError::Profile(ProfileError::OutOfBounds { field: Field::DataBits, .. }))));

        assert!(matches!(parse(&dpd(&RK11E[..12], "\r\n")), Err(DpdError::MissingField("preamble 2 length"))));
    }
}
