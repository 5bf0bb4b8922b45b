// Copyright © 2023 David Caldwell <david@porkrind.org>

// Pseudorandom pattern sources. Every register shifts right one bit per step and feeds the
// inverted parity of its taps into the top bit, so the stuck state is all ones, not zero.

pub const SEED16: u16 = 0x5555;
pub const SEED24: u32 = 0x55_5555;
pub const SEED31: u32 = 0x1234_5678;

const TAPS16: u16 = 0x0001 | 0x0004 | 0x0008 | 0x0020;
const TAPS24: u32 = 0x00_0001 | 0x00_0010 | 0x04_0000 | 0x08_0000;
const TAPS31: u32 = 0x0000_0001 | 0x0000_0008 | 0x0000_0080 | 0x0000_0800
                  | 0x0000_8000 | 0x0008_0000 | 0x0080_0000 | 0x0800_0000;

fn even(taps: u32) -> bool {
    taps.count_ones() & 1 == 0
}

pub fn advance16(state: u16) -> u16 {
    let next = state >> 1;
    if even((state & TAPS16) as u32) { next | 0x8000 } else { next }
}

/// Not used by the test loops.
pub fn advance24(state: u32) -> u32 {
    let state = state & 0xff_ffff;
    let next = state >> 1;
    if even(state & TAPS24) { next | 0x80_0000 } else { next }
}

pub fn advance31(state: u32) -> u32 {
    let state = state & 0x7fff_ffff;
    let next = state >> 1;
    if even(state & TAPS31) { next | 0x4000_0000 } else { next }
}

pub trait Lfsr {
    fn step(&mut self);
    fn low_byte(&self) -> u8;

    fn advance_by(&mut self, shifts: u32) {
        for _ in 0..shifts {
            self.step();
        }
    }

    /// Shift `shifts` times and hand back the low byte. 8 shifts gives bytes that overlap their
    /// neighbours by a bit pattern, 16 gives independent ones.
    fn next_byte(&mut self, shifts: u32) -> u8 {
        self.advance_by(shifts);
        self.low_byte()
    }

    fn fill(&mut self, buf: &mut [u8], shifts: u32) {
        for b in buf.iter_mut() {
            *b = self.next_byte(shifts);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lfsr16(pub u16);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lfsr24(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lfsr31(pub u32);

impl Lfsr16 {
    pub fn new() -> Lfsr16 { Lfsr16(SEED16) }
    pub fn value(&self) -> u16 { self.0 }
}

impl Lfsr24 {
    pub fn new() -> Lfsr24 { Lfsr24(SEED24) }
    pub fn value(&self) -> u32 { self.0 }
}

impl Lfsr31 {
    pub fn new() -> Lfsr31 { Lfsr31(SEED31) }
    pub fn value(&self) -> u32 { self.0 }
}

impl Default for Lfsr16 { fn default() -> Self { Lfsr16::new() } }
impl Default for Lfsr24 { fn default() -> Self { Lfsr24::new() } }
impl Default for Lfsr31 { fn default() -> Self { Lfsr31::new() } }

impl Lfsr for Lfsr16 {
    fn step(&mut self)        { self.0 = advance16(self.0) }
    fn low_byte(&self) -> u8  { self.0 as u8 }
}

impl Lfsr for Lfsr24 {
    fn step(&mut self)        { self.0 = advance24(self.0) }
    fn low_byte(&self) -> u8  { self.0 as u8 }
}

impl Lfsr for Lfsr31 {
    fn step(&mut self)        { self.0 = advance31(self.0) }
    fn low_byte(&self) -> u8  { self.0 as u8 }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_first_steps() {
        assert_eq!(0xaaaa, advance16(0x5555));
        assert_eq!(0xd555, advance16(0xaaaa));
        assert_eq!(0xffff, advance16(0xffff)); // xnor lock-up
        assert_eq!(0x7fff_ffff, advance31(0x7fff_ffff));
        assert_eq!(0xff_ffff, advance24(0xff_ffff));
    }

    #[test]
    fn test_maximal_length_16() {
        for seed in [SEED16, 0x0000, 0x0001, 0xfffe] {
            let mut seen = vec![false; 0x10000];
            let mut state = seed;
            for _ in 0..65535 {
                assert!(!seen[state as usize], "state {:#06x} repeated from seed {:#06x}", state, seed);
                seen[state as usize] = true;
                state = advance16(state);
            }
            assert_eq!(seed, state);
            assert!(!seen[0xffff]);
        }
    }

    #[test]
    fn test_deterministic() {
        let mut a = Lfsr16::new();
        let mut b = Lfsr16::new();
        let mut abuf = vec![0; 400];
        let mut bbuf = vec![0; 400];
        a.fill(&mut abuf, 16);
        b.fill(&mut bbuf, 16);
        assert_eq!(abuf, bbuf);

        let mut c = Lfsr31::new();
        let mut d = Lfsr31::new();
        for _ in 0..10000 {
            assert_eq!(c.next_byte(1), d.next_byte(1));
        }
        assert!(c.value() <= 0x7fff_ffff);
    }

    #[test]
    fn test_byte_extraction() {
        let mut l = Lfsr16::new();
        let mut state = SEED16;
        for _ in 0..8 {
            state = advance16(state);
        }
        assert_eq!(state as u8, l.next_byte(8));
        assert_eq!(state, l.value());
    }

    #[test]
    fn test_24_bit_stays_in_range() {
        let mut l = Lfsr24::new();
        for _ in 0..100000 {
            l.step();
            assert!(l.value() <= 0xff_ffff);
        }
    }
}
