// Copyright © 2023 David Caldwell <david@porkrind.org>

// The tester's FPGA: a byte wide register file reached one transaction at a time. Registers below
// 0x80 are written, registers from 0x80 up are status and readback.

pub mod sim;

use bitflags::bitflags;
use thiserror::Error;

use crate::geometry::{DriveGeometryProfile, ProfileError};

pub trait RegisterBus {
    /// Sends `data` to `register` and returns what the register held. For read-only registers the
    /// data is ignored.
    fn transact(&mut self, register: u8, data: u8) -> u8;
}

impl<B: RegisterBus + ?Sized> RegisterBus for &mut B {
    fn transact(&mut self, register: u8, data: u8) -> u8 {
        (**self).transact(register, data)
    }
}

impl<B: RegisterBus + ?Sized> RegisterBus for Box<B> {
    fn transact(&mut self, register: u8, data: u8) -> u8 {
        (**self).transact(register, data)
    }
}

pub mod reg {
    pub const DRIVE_ADDRESS:        u8 = 0x00;
    pub const CYLINDER:             u8 = 0x01;
    pub const SECTOR:               u8 = 0x02;
    pub const CONTROL:              u8 = 0x03;
    pub const COMMAND:              u8 = 0x04;
    pub const DRAM_ADDRESS:         u8 = 0x05; // 3 writes, high byte first
    pub const DRAM_DATA:            u8 = 0x06; // address auto-increments
    pub const PREAMBLE1:            u8 = 0x07;
    pub const PREAMBLE2:            u8 = 0x08;
    pub const DATA_LEN_HIGH:        u8 = 0x09;
    pub const DATA_LEN_LOW:         u8 = 0x0a;
    pub const POSTAMBLE:            u8 = 0x0b;
    pub const SECTORS_PER_TRACK:    u8 = 0x0c;
    pub const BIT_CLOCK_DIV_CP:     u8 = 0x0d;
    pub const BIT_CLOCK_DIV_DP:     u8 = 0x0e;
    pub const BIT_PULSE_WIDTH:      u8 = 0x0f;
    pub const USEC_PER_SECTOR_HIGH: u8 = 0x10;
    pub const USEC_PER_SECTOR_LOW:  u8 = 0x11;
    pub const INTERFACE_TEST_MODE:  u8 = 0x20;

    pub const READ_ONLY:            u8 = 0x80;
    pub const STATUS1:              u8 = 0x80;
    pub const STATUS2:              u8 = 0x81;
    pub const DRAM_READ:            u8 = 0x88; // address auto-increments
    pub const FUNCTION_ID:          u8 = 0x89;
    pub const FPGA_VERSION:         u8 = 0x90;
    pub const FPGA_MINOR_VERSION:   u8 = 0x91;
    pub const READBACK:             u8 = 0xa0;

    pub const fn readback(register: u8) -> u8 {
        READBACK | register
    }
}

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    #[rustfmt::skip]
    pub struct Status1: u8 {
        const ADDRESS_INVALID  = 0b1000_0000;
        const ADDRESS_ACCEPTED = 0b0100_0000;
        const WRITE_CHECK      = 0b0010_0000;
        const FILE_READY       = 0b0001_0000;
        const HIGH_DENSITY     = 0b0000_1000;
        const DC_LOW           = 0b0000_0100;
        const SEEK_INCOMPLETE  = 0b0000_0010;
        const WRITE_PROTECT    = 0b0000_0001;
    }
}

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    #[rustfmt::skip]
    pub struct Status2: u8 {
        const WRITE_IN_PROGRESS = 0b1000_0000;
        const READ_IN_PROGRESS  = 0b0100_0000;
        const RWS_READY         = 0b0000_0001;
    }
}

bitflags! {
    /// Register 0.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    #[rustfmt::skip]
    pub struct DriveControl: u8 {
        const DRIVE_SELECT = 0b0000_0111;
        const RK11D_MODE   = 0b0000_1000;
        const TESTER_READY = 0b0001_0000;
        const ON_CYLINDER  = 0b0010_0000;
        const SUPPORT_5BIT = 0b0100_0000;
    }
}

bitflags! {
    /// Register 3.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    #[rustfmt::skip]
    pub struct Control: u8 {
        const RESTORE       = 0b0000_0001;
        const HEAD_SELECT   = 0b0000_0010;
        const WRITE_PROTECT = 0b0000_0100;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Read  = 0x01,
    Write = 0x02,
    Seek  = 0x10,
    Clear = 0x80,
}

pub const FUNCTION_ID_TESTER: u8 = 0x80;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Register {0:#04x} is read-only")]
    ReadOnly(u8),
    #[error("Drive address {0} is outside 0-7")]
    DriveAddress(u8),
    #[error(transparent)]
    Profile(#[from] ProfileError),
}

/// Bit clock dividers for the drive's data rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockSettings {
    pub cp_divider:  u8,
    pub dp_divider:  u8,
    pub pulse_width: u8,
}

pub fn clock_settings(bit_rate: u32) -> Option<ClockSettings> {
    let (cp_divider, dp_divider, pulse_width) = match bit_rate {
        1_440_000 => (14, 14, 6),
        1_545_000 => (13, 13, 5),
        1_600_000 => (12, 13, 5),
        _ => return None,
    };
    Some(ClockSettings { cp_divider, dp_divider, pulse_width })
}

/// Typed access to the register file.
pub struct Controller<B: RegisterBus> {
    bus: B,
}

impl<B: RegisterBus> Controller<B> {
    pub fn new(bus: B) -> Controller<B> {
        Controller { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_inner(self) -> B {
        self.bus
    }

    fn write(&mut self, register: u8, data: u8) {
        debug_assert!(register < reg::READ_ONLY);
        log::trace!("write {:#04x} <- {:#04x}", register, data);
        self.bus.transact(register, data);
    }

    fn read(&mut self, register: u8) -> u8 {
        self.bus.transact(register, 0)
    }

    pub fn peek(&mut self, register: u8) -> u8 {
        self.read(register)
    }

    pub fn poke(&mut self, register: u8, data: u8) -> Result<u8, ControllerError> {
        if register >= reg::READ_ONLY {
            Err(ControllerError::ReadOnly(register))?;
        }
        Ok(self.bus.transact(register, data))
    }

    pub fn read_status1(&mut self) -> Status1 {
        Status1::from_bits_retain(self.read(reg::STATUS1))
    }

    pub fn read_status2(&mut self) -> Status2 {
        Status2::from_bits_retain(self.read(reg::STATUS2))
    }

    pub fn write_command(&mut self, command: Command) {
        log::trace!("command {:?}", command);
        self.write(reg::COMMAND, command as u8);
    }

    pub fn command_clear(&mut self) {
        self.write_command(Command::Clear);
    }

    pub fn load_cylinder(&mut self, cylinder: u16) {
        self.write(reg::CYLINDER, (cylinder & 0xff) as u8);
    }

    pub fn load_sector(&mut self, sector: u8) {
        self.write(reg::SECTOR, sector);
    }

    fn update_control(&mut self, flag: Control, on: bool) {
        let mut c = Control::from_bits_retain(self.read(reg::readback(reg::CONTROL)));
        c.set(flag, on);
        self.write(reg::CONTROL, c.bits());
    }

    fn update_drive_control(&mut self, f: impl FnOnce(&mut DriveControl)) {
        let mut d = DriveControl::from_bits_retain(self.read(reg::readback(reg::DRIVE_ADDRESS)));
        f(&mut d);
        self.write(reg::DRIVE_ADDRESS, d.bits());
    }

    pub fn select_head(&mut self, head: u8) {
        self.update_control(Control::HEAD_SELECT, head != 0);
    }

    pub fn set_restore(&mut self, on: bool) {
        self.update_control(Control::RESTORE, on);
    }

    pub fn set_write_protect(&mut self, on: bool) {
        self.update_control(Control::WRITE_PROTECT, on);
    }

    pub fn set_rk11d_mode(&mut self, on: bool) {
        self.update_drive_control(|d| d.set(DriveControl::RK11D_MODE, on));
    }

    pub fn select_drive(&mut self, address: u8) -> Result<(), ControllerError> {
        if address > 7 {
            Err(ControllerError::DriveAddress(address))?;
        }
        self.update_drive_control(|d| {
            d.remove(DriveControl::DRIVE_SELECT);
            *d |= DriveControl::from_bits_retain(address);
        });
        Ok(())
    }

    pub fn drive_control(&mut self) -> DriveControl {
        DriveControl::from_bits_retain(self.read(reg::readback(reg::DRIVE_ADDRESS)))
    }

    pub fn control(&mut self) -> Control {
        Control::from_bits_retain(self.read(reg::readback(reg::CONTROL)))
    }

    pub fn load_ram_address(&mut self, address: u32) {
        self.write(reg::DRAM_ADDRESS, (address >> 16) as u8);
        self.write(reg::DRAM_ADDRESS, (address >>  8) as u8);
        self.write(reg::DRAM_ADDRESS, (address >>  0) as u8);
    }

    pub fn store_byte(&mut self, data: u8) {
        self.bus.transact(reg::DRAM_DATA, data);
    }

    pub fn store_bytes(&mut self, data: &[u8]) {
        for b in data {
            self.store_byte(*b);
        }
    }

    pub fn read_byte(&mut self) -> u8 {
        self.read(reg::DRAM_READ)
    }

    pub fn read_bytes(&mut self, count: usize) -> Vec<u8> {
        (0..count).map(|_| self.read_byte()).collect()
    }

    /// Programs the data separator and sector timing for `profile`.
    pub fn configure(&mut self, profile: &DriveGeometryProfile) -> Result<(), ControllerError> {
        profile.validate()?;
        let clock = clock_settings(profile.bit_rate).ok_or(ProfileError::UnsupportedBitRate(profile.bit_rate))?;
        log::debug!("Configuring for {} at {} bit/s: {:?}", profile.controller, profile.bit_rate, clock);
        self.write(reg::BIT_CLOCK_DIV_CP,     clock.cp_divider);
        self.write(reg::BIT_CLOCK_DIV_DP,     clock.dp_divider);
        self.write(reg::BIT_PULSE_WIDTH,      clock.pulse_width);
        self.write(reg::PREAMBLE1,            profile.preamble1 as u8);
        self.write(reg::PREAMBLE2,            profile.preamble2 as u8);
        self.write(reg::DATA_LEN_HIGH,        (profile.data_bits >> 8) as u8);
        self.write(reg::DATA_LEN_LOW,         profile.data_bits as u8);
        self.write(reg::POSTAMBLE,            profile.postamble as u8);
        self.write(reg::SECTORS_PER_TRACK,    profile.sectors_per_track);
        self.write(reg::USEC_PER_SECTOR_HIGH, (profile.usec_per_sector >> 8) as u8);
        self.write(reg::USEC_PER_SECTOR_LOW,  profile.usec_per_sector as u8);
        self.set_rk11d_mode(profile.rk11d);
        Ok(())
    }

    pub fn function_id(&mut self) -> u8 {
        self.read(reg::FUNCTION_ID)
    }

    pub fn is_tester(&mut self) -> bool {
        self.function_id() & FUNCTION_ID_TESTER != 0
    }

    pub fn fpga_version(&mut self) -> (u8, u8) {
        (self.read(reg::FPGA_VERSION), self.read(reg::FPGA_MINOR_VERSION))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::Preset;

    // Remembers every transaction and echoes writes back through the readback registers.
    struct Recorder {
        regs: Vec<u8>,
        log: Vec<(u8, u8)>,
    }

    impl Default for Recorder {
        fn default() -> Recorder {
            Recorder { regs: vec![0; reg::READ_ONLY as usize], log: vec![] }
        }
    }

    impl RegisterBus for Recorder {
        fn transact(&mut self, register: u8, data: u8) -> u8 {
            self.log.push((register, data));
            match register {
                r if r >= reg::READBACK => self.regs[(r - reg::READBACK) as usize],
                r if r >= reg::READ_ONLY => 0,
                r => std::mem::replace(&mut self.regs[r as usize], data),
            }
        }
    }

    fn writes(c: &Controller<Recorder>) -> Vec<(u8, u8)> {
        c.bus().log.iter().copied().filter(|(r, _)| *r < reg::READ_ONLY).collect()
    }

    #[test]
    fn test_ram_address_high_byte_first() {
        let mut c = Controller::new(Recorder::default());
        c.load_ram_address(0x12_3456);
        assert_eq!(vec![(reg::DRAM_ADDRESS, 0x12), (reg::DRAM_ADDRESS, 0x34), (reg::DRAM_ADDRESS, 0x56)], writes(&c));
    }

    #[test]
    fn test_head_select_keeps_other_bits() {
        let mut c = Controller::new(Recorder::default());
        c.set_write_protect(true);
        c.select_head(1);
        assert_eq!(Control::WRITE_PROTECT | Control::HEAD_SELECT, c.control());
        c.select_head(0);
        assert_eq!(Control::WRITE_PROTECT, c.control());
        c.set_restore(true);
        assert_eq!(Control::WRITE_PROTECT | Control::RESTORE, c.control());
    }

    #[test]
    fn test_select_drive() {
        let mut c = Controller::new(Recorder::default());
        c.set_rk11d_mode(true);
        c.select_drive(5).expect("drive 5");
        assert_eq!(DriveControl::RK11D_MODE | DriveControl::from_bits_retain(5), c.drive_control());
        c.select_drive(2).expect("drive 2");
        assert_eq!(DriveControl::RK11D_MODE | DriveControl::from_bits_retain(2), c.drive_control());
        assert_eq!(Err(ControllerError::DriveAddress(8)), c.select_drive(8));
    }

    #[test]
    fn test_configure_rk11e() {
        let mut c = Controller::new(Recorder::default());
        c.configure(&Preset::RK11E.profile()).expect("configure");
        let r = &c.bus().regs;
        assert_eq!(13, r[reg::BIT_CLOCK_DIV_CP as usize]);
        assert_eq!(13, r[reg::BIT_CLOCK_DIV_DP as usize]);
        assert_eq!(5,  r[reg::BIT_PULSE_WIDTH as usize]);
        assert_eq!(128, r[reg::PREAMBLE1 as usize]);
        assert_eq!(80, r[reg::PREAMBLE2 as usize]);
        assert_eq!(4640, (r[reg::DATA_LEN_HIGH as usize] as u32) << 8 | r[reg::DATA_LEN_LOW as usize] as u32);
        assert_eq!(16, r[reg::POSTAMBLE as usize]);
        assert_eq!(12, r[reg::SECTORS_PER_TRACK as usize]);
        assert_eq!(3333, (r[reg::USEC_PER_SECTOR_HIGH as usize] as u32) << 8 | r[reg::USEC_PER_SECTOR_LOW as usize] as u32);
        assert!(c.drive_control().contains(DriveControl::RK11D_MODE));
    }

    #[test]
    fn test_configure_rejects_bad_profile() {
        let mut c = Controller::new(Recorder::default());
        let mut p = Preset::RK8E.profile();
        p.bit_rate = 2_000_000;
        assert_eq!(Err(ControllerError::Profile(ProfileError::UnsupportedBitRate(2_000_000))), c.configure(&p));
        assert!(writes(&c).is_empty());
    }

    #[test]
    fn test_poke_read_only() {
        let mut c = Controller::new(Recorder::default());
        assert_eq!(Err(ControllerError::ReadOnly(0x80)), c.poke(reg::STATUS1, 1));
        assert_eq!(Ok(0), c.poke(reg::SECTOR, 7));
        assert_eq!(Ok(7), c.poke(reg::SECTOR, 8));
    }

    #[test]
    fn test_clock_settings() {
        assert_eq!(Some(ClockSettings { cp_divider: 14, dp_divider: 14, pulse_width: 6 }), clock_settings(1_440_000));
        assert_eq!(Some(ClockSettings { cp_divider: 12, dp_divider: 13, pulse_width: 5 }), clock_settings(1_600_000));
        assert_eq!(None, clock_settings(1_000_000));
    }
}
