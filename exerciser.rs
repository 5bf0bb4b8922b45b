// Copyright © 2023 David Caldwell <david@porkrind.org>

// The test loops. Each one takes the active context and a handshake engine, runs until it finishes,
// is cancelled from the console, or hits something it can't recover from, and reports what it saw.

mod format;
mod ramtest;
mod read;
mod seek;
mod transfer;
mod write;

pub use format::{initialize, write_sectors_address, InitPattern};
pub use ramtest::{ram_test, RAM_SPAN};
pub use read::{read_loop, read_sectors};
pub use seek::{seek_loop, seek_step};
pub use transfer::{export_image, import_image};
pub use write::{write_loop, write_loop_random, Pattern};

use std::sync::Arc;

use thiserror::Error;

use crate::controller::{ControllerError, RegisterBus};
use crate::geometry::{permuted_sector, Chs, DriveGeometryProfile, Preset};
use crate::handshake::{Engine, NotReady, ProtocolError};
use crate::image::ImageError;
use crate::signal::{Signal, SignalChannel};
use crate::worklist::{ListKind, Worklist};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    pub passes:              u64,
    pub sectors_tested:      u64,
    pub sector_errors:       u64,
    pub byte_errors:         u64,
    pub sectors_processed:   u64,
    pub cylinders_processed: u64,
    pub seeks:               u64,
    pub bytes_tested:        u64,
}

fn list(faults: &[NotReady]) -> String {
    faults.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(", ")
}

/// Why a loop stopped early.
#[derive(Debug, Error)]
pub enum Abort {
    #[error("Drive is not ready ({})", list(.0))]
    NotReady(Vec<NotReady>),
    #[error("The list is empty")]
    EmptyWorklist,
    #[error("This test needs a {expected} list")]
    WrongListKind { expected: ListKind },
    #[error("{error} at {at}")]
    Protocol { error: ProtocolError, at: Chs },
    #[error("Bad image header: {0}")]
    Header(ImageError),
    #[error("{error} at {at}")]
    Image { error: ImageError, at: Chs },
    #[error("Can't test {count} bytes of RAM from {start:#x}")]
    RamRange { start: u32, count: u32 },
}

#[derive(Debug)]
pub enum Outcome {
    Completed,
    Cancelled,
    Aborted(Abort),
}

#[derive(Debug)]
pub struct LoopReport {
    pub outcome: Outcome,
    pub tally:   Tally,
}

impl LoopReport {
    pub fn completed(&self) -> bool {
        matches!(self.outcome, Outcome::Completed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    Started { test: &'static str },
    Cylinder(u16),
    Tally(Tally),
    /// `bytes` bytes of the sector at `at` differed, the first at offset `first`.
    Mismatch { at: Chs, bytes: usize, first: usize },
    ShortSector { at: Chs, bits: u16 },
}

pub trait Reporter {
    fn report(&mut self, event: &Progress);
}

impl<F: FnMut(&Progress)> Reporter for F {
    fn report(&mut self, event: &Progress) {
        self(event)
    }
}

pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&mut self, event: &Progress) {
        match event {
            Progress::Started { test }          => log::info!("Starting {}", test),
            Progress::Cylinder(c)               => log::info!("cylinder = {}", c),
            Progress::Tally(t)                  => log::info!("{:?}", t),
            Progress::Mismatch { at, bytes, first } => log::warn!("Data error at {}: {} bytes differ, first at byte {}", at, bytes, first),
            Progress::ShortSector { at, bits }  => log::warn!("Short sector at {}: {} bits", at, bits),
        }
    }
}

/// Stops a cyclic loop after this many full passes. `None` runs until cancelled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunLimit {
    pub passes: Option<u64>,
}

impl RunLimit {
    pub fn passes(n: u64) -> RunLimit {
        RunLimit { passes: Some(n) }
    }

    fn reached(&self, passes: u64) -> bool {
        self.passes.map_or(false, |n| passes >= n)
    }
}

pub struct ExerciserContext {
    profile:           DriveGeometryProfile,
    pub drive_address: u8,
    pub worklist:      Worklist,
    pub signal:        Arc<SignalChannel>,
    pub reporter:      Box<dyn Reporter>,
    pub limit:         RunLimit,
}

impl ExerciserContext {
    /// A context for `profile`. Nothing is sent to the controller until [`select_profile`](Self::select_profile).
    pub fn new(profile: DriveGeometryProfile) -> ExerciserContext {
        ExerciserContext {
            profile,
            drive_address: 0,
            worklist:      Worklist::new(ListKind::Chs),
            signal:        Arc::new(SignalChannel::new()),
            reporter:      Box::new(LogReporter),
            limit:         RunLimit::default(),
        }
    }

    pub fn profile(&self) -> &DriveGeometryProfile {
        &self.profile
    }

    /// Makes `profile` the active one and programs the controller for it.
    pub fn select_profile<B: RegisterBus>(&mut self, engine: &mut Engine<B>, profile: DriveGeometryProfile) -> Result<(), ControllerError> {
        engine.controller.configure(&profile)?;
        if let Some(preset) = Preset::for_controller(&profile.controller) {
            for a in preset.alternates() {
                log::warn!("{}: {} is {} here, older firmware used {}", profile.controller, a.field, a.preset, a.alternate);
            }
        }
        if self.worklist.items().iter().any(|chs| profile.check(*chs).is_err()) {
            log::warn!("List doesn't fit {}, clearing it", profile.controller);
            self.worklist.clear(self.worklist.kind);
        }
        self.profile = profile;
        Ok(())
    }

    pub fn select_drive<B: RegisterBus>(&mut self, engine: &mut Engine<B>, address: u8) -> Result<(), ControllerError> {
        engine.controller.select_drive(address)?;
        self.drive_address = address;
        Ok(())
    }

    fn report(&mut self, event: Progress) {
        self.reporter.report(&event);
    }
}

enum Stop {
    Cancelled,
    Aborted(Abort),
}

impl From<Abort> for Stop {
    fn from(a: Abort) -> Stop {
        Stop::Aborted(a)
    }
}

trait At<T> {
    fn at(self, chs: Chs) -> Result<T, Abort>;
}

impl<T> At<T> for Result<T, ProtocolError> {
    fn at(self, at: Chs) -> Result<T, Abort> {
        self.map_err(|error| Abort::Protocol { error, at })
    }
}

type Step = Result<(), Stop>;

/// Bookkeeping shared by every loop: the readiness check, turning the body's result into an
/// outcome, and the final tally.
fn run<B: RegisterBus>(test: &'static str, ctx: &mut ExerciserContext, engine: &mut Engine<B>, check_ready: bool,
                       body: impl FnOnce(&mut ExerciserContext, &mut Engine<B>, &mut Tally) -> Step) -> LoopReport {
    ctx.signal.take(); // keys hit before the test started don't count
    ctx.report(Progress::Started { test });
    let mut tally = Tally::default();
    if check_ready {
        let faults = engine.readiness();
        if !faults.is_empty() {
            let abort = Abort::NotReady(faults);
            log::warn!("{}: {}", test, abort);
            return LoopReport { outcome: Outcome::Aborted(abort), tally };
        }
    }
    let outcome = match body(ctx, engine, &mut tally) {
        Ok(())                  => Outcome::Completed,
        Err(Stop::Cancelled)    => Outcome::Cancelled,
        Err(Stop::Aborted(a))   => {
            log::error!("{} aborted: {}", test, a);
            Outcome::Aborted(a)
        },
    };
    ctx.report(Progress::Tally(tally));
    LoopReport { outcome, tally }
}

fn poll_signal(ctx: &mut ExerciserContext, tally: &Tally) -> Step {
    match ctx.signal.take() {
        Signal::None     => Ok(()),
        Signal::Progress => { ctx.report(Progress::Tally(*tally)); Ok(()) },
        Signal::Cancel   => Err(Stop::Cancelled),
    }
}

fn require_list(ctx: &ExerciserContext, kind: ListKind) -> Result<Vec<Chs>, Abort> {
    if ctx.worklist.kind != kind {
        Err(Abort::WrongListKind { expected: kind })?;
    }
    if ctx.worklist.is_empty() {
        Err(Abort::EmptyWorklist)?;
    }
    Ok(ctx.worklist.items().to_vec())
}

fn walk<B: RegisterBus>(ctx: &mut ExerciserContext, engine: &mut Engine<B>, tally: &mut Tally, items: &[Chs], repeat: bool,
                        mut visit: impl FnMut(&mut ExerciserContext, &mut Engine<B>, &mut Tally, Chs) -> Step) -> Step {
    loop {
        for chs in items {
            poll_signal(ctx, tally)?;
            visit(ctx, engine, tally, *chs)?;
        }
        tally.passes += 1;
        if !repeat || ctx.limit.reached(tally.passes) {
            return Ok(());
        }
    }
}

/// Visits the list over and over, checking the console before each item.
fn cycle<B: RegisterBus>(ctx: &mut ExerciserContext, engine: &mut Engine<B>, tally: &mut Tally, items: &[Chs],
                         visit: impl FnMut(&mut ExerciserContext, &mut Engine<B>, &mut Tally, Chs) -> Step) -> Step {
    walk(ctx, engine, tally, items, true, visit)
}

fn once<B: RegisterBus>(ctx: &mut ExerciserContext, engine: &mut Engine<B>, tally: &mut Tally, items: &[Chs],
                        visit: impl FnMut(&mut ExerciserContext, &mut Engine<B>, &mut Tally, Chs) -> Step) -> Step {
    walk(ctx, engine, tally, items, false, visit)
}

/// Every sector on the pack, one seek per cylinder, sectors in interleaved order.
fn sweep<B: RegisterBus>(ctx: &mut ExerciserContext, engine: &mut Engine<B>, tally: &mut Tally, report_every: u16,
                         mut visit: impl FnMut(&mut ExerciserContext, &mut Engine<B>, &mut Tally, Chs) -> Step) -> Step {
    let (cylinders, heads, spt) = (ctx.profile.cylinders, ctx.profile.heads, ctx.profile.sectors_per_track);
    for cylinder in 0..cylinders {
        poll_signal(ctx, tally)?;
        let at = Chs::new(cylinder, 0, 0);
        engine.seek_and_wait(at).at(at)?;
        tally.seeks += 1;
        if cylinder % report_every == 0 {
            ctx.report(Progress::Cylinder(cylinder));
        }
        for head in 0..heads {
            for sector in 0..spt {
                visit(ctx, engine, tally, Chs::new(cylinder, head, permuted_sector(sector, spt)))?;
                tally.sectors_processed += 1;
            }
        }
        tally.cylinders_processed += 1;
    }
    Ok(())
}

/// Every sector on the pack in file order.
fn natural_order(profile: &DriveGeometryProfile) -> impl Iterator<Item = Chs> {
    let (heads, spt) = (profile.heads, profile.sectors_per_track);
    (0..profile.cylinders).flat_map(move |c| (0..heads).flat_map(move |h| (0..spt).map(move |s| Chs::new(c, h, s))))
}

fn store_sector<B: RegisterBus>(engine: &mut Engine<B>, profile: &DriveGeometryProfile, chs: Chs, data: &[u8]) {
    engine.controller.load_ram_address(profile.device_address(chs));
    engine.controller.store_bytes(data);
}

fn fetch_sector<B: RegisterBus>(engine: &mut Engine<B>, profile: &DriveGeometryProfile, chs: Chs) -> Vec<u8> {
    engine.controller.load_ram_address(profile.device_address(chs));
    engine.controller.read_bytes(profile.sector_bytes())
}

/// Offsets of the bytes that differ. Given the sector's bit count, bits past the end of a last
/// partial word are ignored.
fn differences(expected: &[u8], actual: &[u8], bits: Option<u32>) -> Vec<usize> {
    let n = expected.len().min(actual.len());
    let (low, high) = match bits.map(|b| b & 0xf) {
        Some(rem) if rem != 0 => {
            let mask = 0xffff_u16 >> (16 - rem);
            (mask as u8, (mask >> 8) as u8)
        },
        _ => (0xff, 0xff),
    };
    (0..n).filter(|&i| {
        let mask = match i {
            i if i + 2 == n => low,
            i if i + 1 == n => high,
            _               => 0xff,
        };
        expected[i] & mask != actual[i] & mask
    }).collect()
}

/// Compares one sector and counts the damage.
fn check(ctx: &mut ExerciserContext, tally: &mut Tally, at: Chs, expected: &[u8], actual: &[u8], bits: Option<u32>) {
    let bad = differences(expected, actual, bits);
    if let Some(&first) = bad.first() {
        for &i in &bad {
            log::debug!("Data error at {} byte {}: wrote {:#04x}, read {:#04x}", at, i, expected[i], actual[i]);
        }
        tally.byte_errors += bad.len() as u64;
        tally.sector_errors += 1;
        ctx.report(Progress::Mismatch { at, bytes: bad.len(), first });
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::controller::sim::{Corruption, SimDrive};
    use crate::controller::{Controller, Status1};
    use crate::handshake::{Stage, Timeouts};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// A small pack so full sweeps stay quick.
    pub(crate) fn small_profile() -> DriveGeometryProfile {
        DriveGeometryProfile { cylinders: 4, ..Preset::RK8E.profile() }
    }

    pub(crate) fn setup(profile: DriveGeometryProfile, sim: SimDrive) -> (ExerciserContext, Engine<SimDrive>) {
        let mut engine = Engine::new(Controller::new(sim), Timeouts::immediate());
        let mut ctx = ExerciserContext::new(profile.clone());
        ctx.select_profile(&mut engine, profile).expect("select profile");
        (ctx, engine)
    }

    pub(crate) fn chs_list(ctx: &mut ExerciserContext, items: &[(u16, u8, u8)]) {
        let profile = ctx.profile().clone();
        ctx.worklist.clear(ListKind::Chs);
        for &(c, h, s) in items {
            ctx.worklist.push(Chs::new(c, h, s), &profile).expect("push");
        }
    }

    pub(crate) fn record_progress(ctx: &mut ExerciserContext) -> Rc<RefCell<Vec<Progress>>> {
        let events = Rc::new(RefCell::new(vec![]));
        let sink = events.clone();
        ctx.reporter = Box::new(move |p: &Progress| sink.borrow_mut().push(*p));
        events
    }

    #[test]
    fn test_differences_masking() {
        let a = [1, 2, 3, 0xff, 0xff];
        assert_eq!(vec![0usize; 0], differences(&a, &a, None));
        assert_eq!(vec![0, 4], differences(&a, &[0, 2, 3, 0xff, 0xfe], None));
        // 3 bits in the last word: only the low 3 bits of the next to last byte count
        let mut b = a;
        b[3] = 0xf8 | (a[3] & 7);
        b[4] = 0;
        assert_eq!(vec![0usize; 0], differences(&a, &b, Some(3 + 16)));
        b[3] ^= 1;
        assert_eq!(vec![3], differences(&a, &b, Some(3 + 16)));
        // 12 bits: all of the low byte and the low nibble of the high byte
        let mut c = a;
        c[4] = 0x0f;
        assert_eq!(vec![0usize; 0], differences(&a, &c, Some(12 + 32)));
        c[4] = 0xfe;
        assert_eq!(vec![4], differences(&a, &c, Some(12 + 32)));
    }

    #[test]
    fn test_not_ready() {
        let mut sim = SimDrive::new();
        sim.faults.status1_clear = Status1::FILE_READY;
        let (mut ctx, mut engine) = setup(small_profile(), sim);
        chs_list(&mut ctx, &[(0, 0, 0)]);
        let r = read_loop(&mut ctx, &mut engine);
        assert!(matches!(r.outcome, Outcome::Aborted(Abort::NotReady(ref f)) if f == &vec![NotReady::FileNotReady]));
        assert_eq!(0, engine.controller.bus().stats.seeks);
    }

    #[test]
    fn test_list_checks() {
        let (mut ctx, mut engine) = setup(small_profile(), SimDrive::new());
        assert!(matches!(read_loop(&mut ctx, &mut engine).outcome, Outcome::Aborted(Abort::EmptyWorklist)));
        ctx.worklist.clear(ListKind::Cylinder);
        let profile = ctx.profile().clone();
        ctx.worklist.push(Chs::new(1, 0, 0), &profile).expect("push");
        assert!(matches!(read_loop(&mut ctx, &mut engine).outcome, Outcome::Aborted(Abort::WrongListKind { expected: ListKind::Chs })));
    }

    #[test]
    fn test_never_accepted_aborts_loop() {
        let mut sim = SimDrive::new();
        sim.faults.never_accept = true;
        let (mut ctx, mut engine) = setup(small_profile(), sim);
        chs_list(&mut ctx, &[(1, 0, 0), (2, 0, 0)]);
        let before = engine.controller.bus().stats.status1_polls;
        let r = read_loop(&mut ctx, &mut engine);
        match r.outcome {
            Outcome::Aborted(Abort::Protocol { error, at }) => {
                assert_eq!(ProtocolError::Timeout { stage: Stage::AddressAccepted, ticks: 10 }, error);
                assert_eq!(Chs::new(1, 0, 0), at);
            },
            o => panic!("unexpected outcome {:?}", o),
        }
        let stats = engine.controller.bus().stats;
        // one poll for the readiness check, then the whole address accepted budget
        assert_eq!(1 + 10, stats.status1_polls - before);
        assert_eq!(0, stats.reads);
        assert_eq!(0, stats.writes);
        assert_eq!(1, stats.clears);
    }

    #[test]
    fn test_cancel_and_progress() {
        let (mut ctx, mut engine) = setup(small_profile(), SimDrive::new());
        chs_list(&mut ctx, &[(0, 0, 0), (1, 0, 0)]);
        let events = Rc::new(RefCell::new(vec![]));
        let signal = ctx.signal.clone();
        // the reporter sees every event, so use it to press keys at known points
        let mut seen = 0;
        let sink = events.clone();
        ctx.reporter = Box::new(move |p: &Progress| {
            sink.borrow_mut().push(*p);
            seen += 1;
            match seen {
                1 => signal.post_key('p'),
                2 => signal.post_key('q'),
                _ => {},
            }
        });
        let r = read_loop(&mut ctx, &mut engine);
        assert!(matches!(r.outcome, Outcome::Cancelled));
        let events = events.borrow();
        assert!(matches!(events[0], Progress::Started { .. }));
        assert!(matches!(events[1], Progress::Tally(_)));
        assert_eq!(Progress::Tally(r.tally), *events.last().expect("final tally"));
        assert_eq!(1, r.tally.sectors_processed);
    }

    #[test]
    fn test_select_profile_clears_list_that_no_longer_fits() {
        let (mut ctx, mut engine) = setup(Preset::RK8E.profile(), SimDrive::new());
        chs_list(&mut ctx, &[(0, 0, 15)]);
        ctx.select_profile(&mut engine, Preset::RK11E.profile()).expect("select");
        assert!(ctx.worklist.is_empty());
        assert_eq!("RK11-E", ctx.profile().controller);
        let mut bad = Preset::RK8E.profile();
        bad.postamble = 0;
        assert!(ctx.select_profile(&mut engine, bad).is_err());
        assert_eq!("RK11-E", ctx.profile().controller);
    }

    #[test]
    fn test_select_drive() {
        let (mut ctx, mut engine) = setup(small_profile(), SimDrive::new());
        ctx.select_drive(&mut engine, 3).expect("drive 3");
        assert_eq!(3, ctx.drive_address);
        assert!(ctx.select_drive(&mut engine, 9).is_err());
        assert_eq!(3, ctx.drive_address);
    }

    #[test]
    fn test_corruption_counted_once_per_sector() {
        let mut sim = SimDrive::new();
        sim.faults.corrupt = vec![Corruption { read: 1, offset: 0, xor: 0xff }, Corruption { read: 1, offset: 7, xor: 0x80 }];
        let (mut ctx, mut engine) = setup(small_profile(), sim);
        chs_list(&mut ctx, &[(3, 1, 2)]);
        ctx.limit = RunLimit::passes(2);
        let r = write_loop(&mut ctx, &mut engine, Pattern::Lfsr, true);
        assert!(r.completed());
        assert_eq!(1, r.tally.sector_errors);
        assert_eq!(2, r.tally.byte_errors);
        assert_eq!(2, r.tally.sectors_tested);
        assert_eq!(2, r.tally.passes);
    }
}
