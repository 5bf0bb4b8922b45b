// Copyright © 2023 David Caldwell <david@porkrind.org>

// A tester controller with an RK05 attached, all in memory. There is no clock: every poll of a
// status register counts down whatever the drive is busy with, so tests can run with zero length
// ticks and still see the drive take its time.

use std::collections::HashMap;

use super::{reg, Command, Control, RegisterBus, Status1, Status2, FUNCTION_ID_TESTER};
use crate::geometry::{compute_device_address, sector_byte_length, Chs};

pub const DRAM_SIZE: usize = 1 << 24;
pub const VERSION: (u8, u8) = (2, 0);

/// Status polls each operation takes before it reports done.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Latency {
    pub address_accept: u32,
    pub seek:           u32,
    pub transfer:       u32,
}

/// Flips bits in what the `read`th read command (counting from 1) delivers to memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Corruption {
    pub read:   u64,
    pub offset: usize,
    pub xor:    u8,
}

#[derive(Clone, Debug, Default)]
pub struct Faults {
    pub never_accept:  bool,
    pub never_ready:   bool,
    pub stuck_busy:    bool,
    /// The `n`th read or write command (counting from 1) and every one after it never finish.
    pub stuck_from:    Option<u64>,
    pub status1_set:   Status1,
    pub status1_clear: Status1,
    pub corrupt:       Vec<Corruption>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub status1_polls: u64,
    pub status2_polls: u64,
    pub seeks:         u64,
    pub restores:      u64,
    pub reads:         u64,
    pub writes:        u64,
    pub clears:        u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Busy {
    Read,
    Write,
}

pub struct SimDrive {
    regs:         Vec<u8>,
    dram:         Vec<u8>,
    dram_address: u32,
    media:        HashMap<Chs, Vec<u8>>,
    cylinder:     u16,
    accept_in:    Option<u32>,
    ready_in:     u32,
    busy:         Option<(Busy, u32)>,
    pub latency:  Latency,
    pub faults:   Faults,
    pub stats:    Stats,
}

impl Default for SimDrive {
    fn default() -> SimDrive {
        SimDrive::new()
    }
}

impl SimDrive {
    pub fn new() -> SimDrive {
        SimDrive::with_latency(Latency::default())
    }

    pub fn with_latency(latency: Latency) -> SimDrive {
        SimDrive {
            regs:         vec![0; reg::READ_ONLY as usize],
            dram:         vec![0; DRAM_SIZE],
            dram_address: 0,
            media:        HashMap::new(),
            cylinder:     0,
            accept_in:    None,
            ready_in:     0,
            busy:         None,
            latency,
            faults:       Faults::default(),
            stats:        Stats::default(),
        }
    }

    /// Where the heads are.
    pub fn cylinder(&self) -> u16 {
        self.cylinder
    }

    pub fn dram(&self) -> &[u8] {
        &self.dram
    }

    pub fn media(&self, chs: Chs) -> Option<&[u8]> {
        self.media.get(&chs).map(|v| v.as_slice())
    }

    pub fn set_media(&mut self, chs: Chs, data: Vec<u8>) {
        self.media.insert(chs, data);
    }

    pub fn written_sectors(&self) -> usize {
        self.media.len()
    }

    fn control(&self) -> Control {
        Control::from_bits_retain(self.regs[reg::CONTROL as usize])
    }

    fn target(&self) -> Chs {
        Chs::new(self.cylinder, self.control().contains(Control::HEAD_SELECT) as u8, self.regs[reg::SECTOR as usize])
    }

    fn sector_len(&self) -> usize {
        sector_byte_length((self.regs[reg::DATA_LEN_HIGH as usize] as u32) << 8 | self.regs[reg::DATA_LEN_LOW as usize] as u32)
    }

    fn dram_index(address: usize) -> usize {
        address & (DRAM_SIZE - 1)
    }

    // The controller moves sector data to and from its memory at the same place the host computes.
    fn dma_base(&self, chs: Chs) -> usize {
        compute_device_address(self.regs[reg::SECTORS_PER_TRACK as usize], chs.cylinder, chs.head, chs.sector) as usize
    }

    fn command(&mut self, command: u8) {
        if command & Command::Clear as u8 != 0 {
            self.stats.clears += 1;
            self.busy = None;
            self.accept_in = None;
            return;
        }
        if command & Command::Seek as u8 != 0 {
            self.seek();
        }
        if command & Command::Read as u8 != 0 {
            self.read_sector();
        }
        if command & Command::Write as u8 != 0 {
            self.write_sector();
        }
    }

    fn seek(&mut self) {
        self.stats.seeks += 1;
        if self.control().contains(Control::RESTORE) {
            self.stats.restores += 1;
            self.cylinder = 0;
        } else {
            self.cylinder = self.regs[reg::CYLINDER as usize] as u16;
        }
        self.accept_in = if self.faults.never_accept { None } else { Some(self.latency.address_accept) };
        self.ready_in = self.latency.seek;
        log::trace!("sim: seek to cylinder {}", self.cylinder);
    }

    fn read_sector(&mut self) {
        self.stats.reads += 1;
        let chs = self.target();
        let len = self.sector_len();
        let base = self.dma_base(chs);
        let empty = vec![];
        let data = self.media.get(&chs).unwrap_or(&empty);
        for i in 0..len {
            self.dram[Self::dram_index(base + i)] = data.get(i).copied().unwrap_or(0);
        }
        for c in self.faults.corrupt.iter().filter(|c| c.read == self.stats.reads && c.offset < len) {
            log::trace!("sim: corrupting byte {} of read {} ({})", c.offset, c.read, chs);
            self.dram[Self::dram_index(base + c.offset)] ^= c.xor;
        }
        self.busy = Some((Busy::Read, self.latency.transfer));
    }

    fn write_sector(&mut self) {
        self.stats.writes += 1;
        self.busy = Some((Busy::Write, self.latency.transfer));
        if self.control().contains(Control::WRITE_PROTECT) {
            log::trace!("sim: write to protected pack dropped");
            return;
        }
        let chs = self.target();
        let base = self.dma_base(chs);
        let data = (0..self.sector_len()).map(|i| self.dram[Self::dram_index(base + i)]).collect();
        self.media.insert(chs, data);
    }

    fn status1(&mut self) -> Status1 {
        self.stats.status1_polls += 1;
        let mut s = Status1::FILE_READY | Status1::HIGH_DENSITY;
        match self.accept_in {
            Some(0) => s |= Status1::ADDRESS_ACCEPTED,
            Some(n) => self.accept_in = Some(n - 1),
            None    => {},
        }
        if self.control().contains(Control::WRITE_PROTECT) {
            s |= Status1::WRITE_PROTECT;
        }
        (s | self.faults.status1_set) - self.faults.status1_clear
    }

    fn status2(&mut self) -> Status2 {
        self.stats.status2_polls += 1;
        let stuck = self.faults.stuck_busy
                 || self.faults.stuck_from.map_or(false, |n| self.stats.reads + self.stats.writes >= n);
        if let Some((kind, n)) = self.busy {
            if stuck || n > 0 {
                if !stuck {
                    self.busy = Some((kind, n - 1));
                }
                return match kind {
                    Busy::Read  => Status2::READ_IN_PROGRESS,
                    Busy::Write => Status2::WRITE_IN_PROGRESS,
                };
            }
            self.busy = None;
        }
        if self.ready_in > 0 {
            self.ready_in -= 1;
            return Status2::empty();
        }
        match self.faults.never_ready {
            true  => Status2::empty(),
            false => Status2::RWS_READY,
        }
    }
}

impl RegisterBus for SimDrive {
    fn transact(&mut self, register: u8, data: u8) -> u8 {
        match register {
            reg::STATUS1            => self.status1().bits(),
            reg::STATUS2            => self.status2().bits(),
            reg::FUNCTION_ID        => FUNCTION_ID_TESTER,
            reg::FPGA_VERSION       => VERSION.0,
            reg::FPGA_MINOR_VERSION => VERSION.1,
            reg::DRAM_READ => {
                let b = self.dram[Self::dram_index(self.dram_address as usize)];
                self.dram_address = self.dram_address.wrapping_add(1);
                b
            },
            r if r >= reg::READBACK  => self.regs.get((r - reg::READBACK) as usize).copied().unwrap_or(0),
            r if r >= reg::READ_ONLY => 0,
            reg::DRAM_ADDRESS => {
                let prev = self.dram_address as u8;
                self.dram_address = (self.dram_address << 8 | data as u32) & 0xff_ffff;
                prev
            },
            reg::DRAM_DATA => {
                let i = Self::dram_index(self.dram_address as usize);
                self.dram_address = self.dram_address.wrapping_add(1);
                std::mem::replace(&mut self.dram[i], data)
            },
            reg::COMMAND => {
                let prev = std::mem::replace(&mut self.regs[reg::COMMAND as usize], data);
                self.command(data);
                prev
            },
            r => std::mem::replace(&mut self.regs[r as usize], data),
        }
    }
}
