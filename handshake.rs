// Copyright © 2023 David Caldwell <david@porkrind.org>

// The seek / select / transfer dance every sector access goes through. Each wait polls a status
// register a bounded number of times; running out clears the controller and gives up.

use std::time::Duration;

use strum::Display;
use thiserror::Error;

use crate::controller::{Command, Controller, RegisterBus, Status1, Status2};
use crate::geometry::Chs;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_ticks: u32,
    pub tick:      Duration,
}

impl RetryPolicy {
    pub fn millis(max_ticks: u32) -> RetryPolicy {
        RetryPolicy { max_ticks, tick: Duration::from_millis(1) }
    }

    /// Same number of polls, no sleeping between them.
    pub fn immediate(max_ticks: u32) -> RetryPolicy {
        RetryPolicy { max_ticks, tick: Duration::ZERO }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub address_accepted: RetryPolicy,
    pub ready:            RetryPolicy,
    pub read_write:       RetryPolicy,
    /// How long the unchecked seek loop waits between seeks. A 200 cylinder move takes about 124ms.
    pub seek_settle:      Duration,
}

impl Default for Timeouts {
    fn default() -> Timeouts {
        Timeouts {
            address_accepted: RetryPolicy::millis(10),
            ready:            RetryPolicy::millis(1000),
            read_write:       RetryPolicy::millis(1000),
            seek_settle:      Duration::from_millis(300),
        }
    }
}

impl Timeouts {
    /// The default tick counts with no real time spent. For simulated drives.
    pub fn immediate() -> Timeouts {
        let t = Timeouts::default();
        Timeouts {
            address_accepted: RetryPolicy::immediate(t.address_accepted.max_ticks),
            ready:            RetryPolicy::immediate(t.ready.max_ticks),
            read_write:       RetryPolicy::immediate(t.read_write.max_ticks),
            seek_settle:      Duration::ZERO,
        }
    }

    /// Every wait ticks `tick` long.
    pub fn with_tick(self, tick: Duration) -> Timeouts {
        Timeouts {
            address_accepted: RetryPolicy { tick, ..self.address_accepted },
            ready:            RetryPolicy { tick, ..self.ready },
            read_write:       RetryPolicy { tick, ..self.read_write },
            ..self
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum Stage {
    #[strum(serialize = "address accepted")] AddressAccepted,
    #[strum(serialize = "drive ready")]      DriveReady,
    #[strum(serialize = "read complete")]    ReadComplete,
    #[strum(serialize = "write complete")]   WriteComplete,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Timed out waiting for {stage} after {ticks} ticks")]
    Timeout { stage: Stage, ticks: u32 },
}

/// Reasons the drive can't be used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum NotReady {
    #[strum(serialize = "file not ready")]      FileNotReady,
    #[strum(serialize = "not a high density drive")] LowDensity,
    #[strum(serialize = "DC low")]              DcLow,
    #[strum(serialize = "RWS not ready")]       RwsNotReady,
}

pub struct Engine<B: RegisterBus> {
    pub controller: Controller<B>,
    pub timeouts:   Timeouts,
}

impl<B: RegisterBus> Engine<B> {
    pub fn new(controller: Controller<B>, timeouts: Timeouts) -> Engine<B> {
        Engine { controller, timeouts }
    }

    fn wait(&mut self, stage: Stage, policy: RetryPolicy, mut done: impl FnMut(&mut Controller<B>) -> bool) -> Result<(), ProtocolError> {
        for _ in 0..policy.max_ticks {
            if done(&mut self.controller) {
                return Ok(());
            }
            if !policy.tick.is_zero() {
                std::thread::sleep(policy.tick);
            }
        }
        self.controller.command_clear();
        log::error!("Timed out waiting for {} ({} ticks)", stage, policy.max_ticks);
        Err(ProtocolError::Timeout { stage, ticks: policy.max_ticks })
    }

    /// Starts a seek. A restore entry recalibrates to cylinder 0.
    pub fn seek(&mut self, chs: Chs) {
        log::debug!("Seek {}", chs);
        self.controller.load_cylinder(chs.physical_cylinder());
        self.controller.set_restore(chs.is_restore());
        self.controller.write_command(Command::Seek);
    }

    pub fn wait_address_accepted(&mut self) -> Result<(), ProtocolError> {
        let policy = self.timeouts.address_accepted;
        self.wait(Stage::AddressAccepted, policy, |c| c.read_status1().contains(Status1::ADDRESS_ACCEPTED))
    }

    pub fn wait_ready(&mut self) -> Result<(), ProtocolError> {
        let policy = self.timeouts.ready;
        self.wait(Stage::DriveReady, policy, |c| c.read_status2().contains(Status2::RWS_READY))
    }

    pub fn seek_and_wait(&mut self, chs: Chs) -> Result<(), ProtocolError> {
        self.seek(chs);
        self.wait_address_accepted()?;
        self.wait_ready()
    }

    fn transfer(&mut self, chs: Chs, command: Command, stage: Stage, busy: Status2) -> Result<(), ProtocolError> {
        self.controller.select_head(chs.head);
        self.controller.load_sector(chs.sector);
        self.controller.write_command(command);
        let policy = self.timeouts.read_write;
        self.wait(stage, policy, |c| !c.read_status2().contains(busy))
    }

    /// Reads `chs` into controller memory. The heads must already be on its cylinder.
    pub fn read_sector(&mut self, chs: Chs) -> Result<(), ProtocolError> {
        self.transfer(chs, Command::Read, Stage::ReadComplete, Status2::READ_IN_PROGRESS)
    }

    /// Writes controller memory out to `chs`. The heads must already be on its cylinder.
    pub fn write_sector(&mut self, chs: Chs) -> Result<(), ProtocolError> {
        self.transfer(chs, Command::Write, Stage::WriteComplete, Status2::WRITE_IN_PROGRESS)
    }

    /// Every condition keeping the drive from being usable. Empty means ready.
    pub fn readiness(&mut self) -> Vec<NotReady> {
        let s1 = self.controller.read_status1();
        let s2 = self.controller.read_status2();
        let mut faults = vec![];
        if !s1.contains(Status1::FILE_READY)   { faults.push(NotReady::FileNotReady) }
        if !s1.contains(Status1::HIGH_DENSITY) { faults.push(NotReady::LowDensity) }
        if s1.contains(Status1::DC_LOW)        { faults.push(NotReady::DcLow) }
        if !s2.contains(Status2::RWS_READY)    { faults.push(NotReady::RwsNotReady) }
        faults
    }

    pub fn is_drive_ready(&mut self) -> bool {
        self.readiness().is_empty()
    }
}
