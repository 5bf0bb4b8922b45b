// Copyright © 2023 David Caldwell <david@porkrind.org>

use std::fmt;

use strum::Display;
use thiserror::Error;

use crate::geometry::{Chs, DriveGeometryProfile, ProfileError};

pub const MAX_ITEMS: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum ListKind {
    #[strum(serialize = "cylinder/head/sector")] Chs,
    #[strum(serialize = "cylinder")]             Cylinder,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorklistError {
    #[error("List is full ({0} items)")]
    Full(usize),
    #[error("Line {line}: {msg}")]
    Parse { line: usize, msg: String },
    #[error(transparent)]
    Geometry(#[from] ProfileError),
}

/// The sectors (or cylinders) a loop works through, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Worklist {
    pub kind: ListKind,
    items: Vec<Chs>,
}

impl Worklist {
    pub fn new(kind: ListKind) -> Worklist {
        Worklist { kind, items: vec![] }
    }

    pub fn clear(&mut self, kind: ListKind) {
        self.kind = kind;
        self.items.clear();
    }

    pub fn items(&self) -> &[Chs] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, chs: Chs, profile: &DriveGeometryProfile) -> Result<(), WorklistError> {
        if self.items.len() >= MAX_ITEMS {
            Err(WorklistError::Full(MAX_ITEMS))?;
        }
        profile.check(chs)?;
        self.items.push(chs);
        Ok(())
    }

    /// One line of list input. `R` is a restore, `X` ends the list (`Ok(None)`). Cylinder lists
    /// take one number per line, CHS lists three, separated by blanks or commas.
    pub fn parse_entry(line: &str, kind: ListKind) -> Result<Option<Chs>, String> {
        let fields: Vec<&str> = line.split(|c: char| c.is_whitespace() || c == ',').filter(|f| !f.is_empty()).collect();
        let want = match kind { ListKind::Chs => 3, ListKind::Cylinder => 1 };
        match fields.as_slice() {
            [f] if f.eq_ignore_ascii_case("x") => Ok(None),
            [f] if f.eq_ignore_ascii_case("r") => Ok(Some(Chs::restore())),
            f if f.len() != want => Err(format!("{} fields entered, should be {}", f.len(), want)),
            f => {
                let n: Vec<u16> = f.iter()
                                   .map(|s| s.parse::<u16>().map_err(|e| format!("{:?}: {}", s, e)))
                                   .collect::<Result<_, _>>()?;
                match kind {
                    ListKind::Cylinder => Ok(Some(Chs::new(n[0], 0, 0))),
                    ListKind::Chs => {
                        let head = u8::try_from(n[1]).map_err(|_| format!("head {} is too big", n[1]))?;
                        let sector = u8::try_from(n[2]).map_err(|_| format!("sector {} is too big", n[2]))?;
                        Ok(Some(Chs::new(n[0], head, sector)))
                    },
                }
            },
        }
    }

    /// Builds a list from text, one entry per line. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str, kind: ListKind, profile: &DriveGeometryProfile) -> Result<Worklist, WorklistError> {
        let mut list = Worklist::new(kind);
        for (n, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let parse_err = |msg: String| WorklistError::Parse { line: n + 1, msg };
            match Worklist::parse_entry(line, kind).map_err(parse_err)? {
                None      => break,
                Some(chs) => list.push(chs, profile).map_err(|e| match e {
                    WorklistError::Geometry(g) => parse_err(g.to_string()),
                    e => e,
                })?,
            }
        }
        Ok(list)
    }
}

impl fmt::Display for Worklist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ListKind::Chs      => writeln!(f, "  #  cyl  h  sect")?,
            ListKind::Cylinder => writeln!(f, "  #  cyl")?,
        }
        for (i, chs) in self.items.iter().enumerate() {
            let cyl = if chs.is_restore() { "  R".to_string() } else { format!("{:3}", chs.cylinder) };
            match self.kind {
                ListKind::Chs      => writeln!(f, " {:2}, {}, {:1}, {:2}", i, cyl, chs.head, chs.sector)?,
                ListKind::Cylinder => writeln!(f, " {:2}, {}", i, cyl)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::{Field, Preset};

    #[test]
    fn test_parse_chs() {
        let p = Preset::RK8E.profile();
        let list = Worklist::parse("# warm up\n0 0 0\n1,0,0\n\n  2 1 0  \nr\nX\n5 0 0\n", ListKind::Chs, &p).expect("parse");
        assert_eq!(&[Chs::new(0, 0, 0), Chs::new(1, 0, 0), Chs::new(2, 1, 0), Chs::restore()], list.items());
    }

    #[test]
    fn test_parse_cylinders() {
        let p = Preset::RK8E.profile();
        let list = Worklist::parse("0\n202\nR\n100\n", ListKind::Cylinder, &p).expect("parse");
        assert_eq!(vec![0, 202, 0x100, 100], list.items().iter().map(|c| c.cylinder).collect::<Vec<_>>());
    }

    #[test]
    fn test_parse_errors() {
        let p = Preset::RK8E.profile();
        assert!(matches!(Worklist::parse("0 0\n", ListKind::Chs, &p), Err(WorklistError::Parse { line: 1, .. })));
        assert!(matches!(Worklist::parse("0 0 0\nfoo 0 0\n", ListKind::Chs, &p), Err(WorklistError::Parse { line: 2, .. })));
        assert!(matches!(Worklist::parse("203\n", ListKind::Cylinder, &p), Err(WorklistError::Parse { line: 1, .. })));
        assert_eq!(Ok(None), Worklist::parse_entry("x", ListKind::Cylinder));
    }

    #[test]
    fn test_bounds() {
        let p = Preset::RK8E.profile();
        let mut list = Worklist::new(ListKind::Chs);
        assert_eq!(Err(WorklistError::Geometry(ProfileError::OutOfBounds { field: Field::Sector, value: 16, min: 0, max: 15 })),
                   list.push(Chs::new(0, 0, 16), &p));
        for c in 0..MAX_ITEMS as u16 {
            list.push(Chs::new(c, 0, 0), &p).expect("room");
        }
        assert_eq!(Err(WorklistError::Full(MAX_ITEMS)), list.push(Chs::new(0, 0, 0), &p));
        assert_eq!(MAX_ITEMS, list.len());
        list.clear(ListKind::Cylinder);
        assert!(list.is_empty());
        assert_eq!(ListKind::Cylinder, list.kind);
    }
}
