// Copyright © 2023 David Caldwell <david@porkrind.org>

// The things the command line can do to a tester, and how their results get printed.

use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use pretty_hex::PrettyHex;
use serde::Deserialize;
use strum::IntoEnumIterator;

use rk05tester::controller::{Control, DriveControl, RegisterBus};
use rk05tester::exerciser::{export_image, import_image, ExerciserContext, LoopReport, Outcome, Progress, Tally};
use rk05tester::geometry::{Chs, DriveGeometryProfile, Preset};
use rk05tester::image::{peek_header, ImageHeader};
use rk05tester::signal::SignalChannel;
use rk05tester::worklist::{ListKind, Worklist};
use rk05tester::{dpd, Engine};

/// `name` is either a preset or the path to a drive parameter description file.
pub fn load_profile(name: &str) -> anyhow::Result<DriveGeometryProfile> {
    if let Ok(preset) = Preset::from_str(name) {
        return Ok(preset.profile());
    }
    if !Path::new(name).exists() {
        return Err(anyhow!("{} is neither a controller ({}) nor a parameter file", name,
                           Preset::iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ")));
    }
    Ok(dpd::load(Path::new(name)).with_context(|| format!("{}", name))?)
}

/// Overlays an image header's geometry and names on a profile. When the header names a known
/// controller its preset is the starting point, so the data length, preambles and RK11-D mode
/// match the controller that wrote the image.
pub fn adopt_header(profile: &DriveGeometryProfile, header: &ImageHeader) -> anyhow::Result<DriveGeometryProfile> {
    let base = Preset::for_controller(&header.controller).map(|p| p.profile()).unwrap_or_else(|| profile.clone());
    Ok(base.with_header(header)?)
}

/// Takes the geometry and names from the header of an existing image.
pub fn adopt_image_geometry(profile: &DriveGeometryProfile, image: &Path) -> anyhow::Result<DriveGeometryProfile> {
    let header = peek_header(image).with_context(|| format!("{}", image.to_string_lossy()))?;
    let adopted = adopt_header(profile, &header).with_context(|| format!("{}: unusable geometry", image.to_string_lossy()))?;
    println!("Using {} geometry from {}", adopted.controller, image.to_string_lossy());
    Ok(adopted)
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all="lowercase")]
pub enum Switch {
    On,
    Off,
}

/// Sets the write protect line and, when asked, overrides the profile's RK11-D mode. Has to come
/// after the profile is selected since that programs RK11-D mode from the profile.
pub fn apply_modes<B: RegisterBus>(engine: &mut Engine<B>, write_protect: bool, rk11d: Option<Switch>) {
    engine.controller.set_write_protect(write_protect);
    if let Some(rk11d) = rk11d {
        engine.controller.set_rk11d_mode(rk11d == Switch::On);
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

pub fn load_worklist(path: &Path, kind: ListKind, profile: &DriveGeometryProfile) -> anyhow::Result<Worklist> {
    let text = std::fs::read_to_string(path).with_context(|| format!("{}", path.to_string_lossy()))?;
    Ok(Worklist::parse(&text, kind, profile).with_context(|| format!("{}", path.to_string_lossy()))?)
}

/// Reads the console on its own thread. A line starting with `p` asks the running loop for its
/// numbers, anything else (including a bare return) stops it.
pub fn spawn_console(signal: Arc<SignalChannel>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            signal.post_key(line.chars().next().unwrap_or('\n'));
        }
    });
}

pub fn print_progress(event: &Progress) {
    match event {
        Progress::Started { test }              => println!("Starting {}. Return stops, p<return> shows progress.", test),
        Progress::Cylinder(c)                   => println!("cylinder = {}", c),
        Progress::Tally(t)                      => print_tally(t),
        Progress::Mismatch { at, bytes, first } => println!("Data error at {}: {} bytes differ, first at byte {}", at, bytes, first),
        Progress::ShortSector { at, bits }      => println!("Short sector at {}: {} bits", at, bits),
    }
}

fn print_tally(t: &Tally) {
    println!("Passes {}  sectors tested {}  sector errors {}  byte errors {}", t.passes, t.sectors_tested, t.sector_errors, t.byte_errors);
    println!("Sectors {}  cylinders {}  seeks {}  RAM bytes tested {}", t.sectors_processed, t.cylinders_processed, t.seeks, t.bytes_tested);
}

/// Prints how a loop ended. An aborted loop becomes an error so the exit status shows it.
pub fn finish(report: LoopReport) -> anyhow::Result<()> {
    match report.outcome {
        Outcome::Completed  => println!("Done."),
        Outcome::Cancelled  => println!("Stopped."),
        Outcome::Aborted(a) => return Err(anyhow!("{}", a)),
    }
    Ok(())
}

pub fn show_profile(profile: &DriveGeometryProfile) {
    println!("{:#?}", profile);
    println!("RK11-D mode {}", on_off(profile.rk11d));
    println!("Sector length {} bytes, {} sectors on the pack, sector to start {} bit times",
             profile.sector_bytes(), profile.total_sectors(), profile.sector_to_start());
    if let Some(preset) = Preset::for_controller(&profile.controller) {
        for a in preset.alternates() {
            println!("Note: {} is {}, older firmware used {}", a.field, a.preset, a.alternate);
        }
    }
}

pub fn dump_sectors(sectors: &[(Chs, Vec<u8>)]) {
    for (chs, data) in sectors {
        println!("{}\n{:?}", chs, data.hex_dump());
    }
}

pub fn status<B: RegisterBus>(engine: &mut Engine<B>) {
    let c = &mut engine.controller;
    let (major, minor) = c.fpga_version();
    println!("Function id {:#04x}{}, FPGA version {}.{}", c.function_id(), if c.is_tester() { " (tester)" } else { "" }, major, minor);
    println!("Status 1: {:?}", c.read_status1());
    println!("Status 2: {:?}", c.read_status2());
    println!("Write protect {}, RK11-D mode {}", on_off(c.control().contains(Control::WRITE_PROTECT)),
             on_off(c.drive_control().contains(DriveControl::RK11D_MODE)));
    match engine.readiness() {
        r if r.is_empty() => println!("Drive ready"),
        r                 => for n in r { println!("Not ready: {}", n) },
    }
}

pub fn parse_number(s: &str) -> anyhow::Result<u32> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None      => s.parse(),
    };
    parsed.with_context(|| format!("Bad number: {}", s))
}

fn parse_register(s: &str) -> anyhow::Result<u8> {
    let r = parse_number(s)?;
    u8::try_from(r).map_err(|_| anyhow!("No register {:#x}", r))
}

pub fn peek<B: RegisterBus>(engine: &mut Engine<B>, register: &str) -> anyhow::Result<()> {
    let r = parse_register(register)?;
    println!("{:#04x}: {:#04x}", r, engine.controller.peek(r));
    Ok(())
}

pub fn poke<B: RegisterBus>(engine: &mut Engine<B>, register: &str, value: &str) -> anyhow::Result<()> {
    let r = parse_register(register)?;
    let v = u8::try_from(parse_number(value)?).map_err(|_| anyhow!("{} doesn't fit in a register", value))?;
    let old = engine.controller.poke(r, v)?;
    println!("{:#04x}: {:#04x} -> {:#04x}", r, old, v);
    Ok(())
}

/// Exports to `path`, naming the image after the file and dating it today.
pub fn export<B: RegisterBus>(ctx: &mut ExerciserContext, engine: &mut Engine<B>, path: &Path) -> anyhow::Result<()> {
    let mut profile = ctx.profile().clone();
    if let Some(stem) = path.file_stem() {
        profile.image_name = stem.to_string_lossy().into_owned();
    }
    profile.date = chrono::Local::now().format("%-m/%-d/%Y").to_string();
    // reselecting would undo a forced RK11-D mode
    profile.rk11d = engine.controller.drive_control().contains(DriveControl::RK11D_MODE);
    ctx.select_profile(engine, profile)?;

    let file = std::fs::File::create(path).with_context(|| format!("{}", path.to_string_lossy()))?;
    let report = export_image(ctx, engine, &mut BufWriter::new(file));
    finish(report).with_context(|| format!("{}", path.to_string_lossy()))
}

pub fn import<B: RegisterBus>(ctx: &mut ExerciserContext, engine: &mut Engine<B>, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::open(path).with_context(|| format!("{}", path.to_string_lossy()))?;
    let report = import_image(ctx, engine, &mut BufReader::new(file));
    finish(report).with_context(|| format!("{}", path.to_string_lossy()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(0x1f, parse_number("0x1f").expect("hex"));
        assert_eq!(31, parse_number("31").expect("decimal"));
        assert!(parse_number("0xzz").is_err());
        assert!(parse_register("0x100").is_err());
    }

    #[test]
    fn test_load_profile_preset() {
        assert_eq!(Preset::RK11E.profile(), load_profile("RK11E").expect("preset"));
        assert!(load_profile("/nonexistent/thing.dpd").is_err());
    }

    #[test]
    fn test_apply_modes() {
        use rk05tester::controller::sim::SimDrive;
        use rk05tester::{Controller, Timeouts};
        let mut engine = Engine::new(Controller::new(SimDrive::new()), Timeouts::immediate());
        engine.controller.configure(&Preset::RK11D.profile()).expect("configure");
        assert!(engine.controller.drive_control().contains(DriveControl::RK11D_MODE));

        apply_modes(&mut engine, true, Some(Switch::Off));
        assert!(engine.controller.control().contains(Control::WRITE_PROTECT));
        assert!(!engine.controller.drive_control().contains(DriveControl::RK11D_MODE));

        // no override leaves the profile's mode alone
        apply_modes(&mut engine, false, None);
        assert!(!engine.controller.control().contains(Control::WRITE_PROTECT));
        assert!(!engine.controller.drive_control().contains(DriveControl::RK11D_MODE));
        apply_modes(&mut engine, false, Some(Switch::On));
        assert!(engine.controller.drive_control().contains(DriveControl::RK11D_MODE));
    }

    #[test]
    fn test_export_keeps_forced_modes() {
        use rk05tester::controller::sim::SimDrive;
        use rk05tester::{Controller, Timeouts};
        let profile = DriveGeometryProfile { cylinders: 2, ..Preset::RK8E.profile() };
        let mut engine = Engine::new(Controller::new(SimDrive::new()), Timeouts::immediate());
        let mut ctx = ExerciserContext::new(profile.clone());
        ctx.select_profile(&mut engine, profile).expect("select profile");
        apply_modes(&mut engine, true, Some(Switch::On));

        let path = std::env::temp_dir().join(format!("rk05tester-export-{}.rk", std::process::id()));
        export(&mut ctx, &mut engine, &path).expect("export");
        let header = peek_header(&path).expect("header");
        std::fs::remove_file(&path).expect("remove");

        assert!(engine.controller.control().contains(Control::WRITE_PROTECT));
        assert!(engine.controller.drive_control().contains(DriveControl::RK11D_MODE));
        // the header keeps the first 10 characters of the name
        assert_eq!("rk05tester", header.image_name);
    }

    #[test]
    fn test_adopt_header_starts_from_preset() {
        let rk8e = Preset::RK8E.profile();
        let adopted = adopt_header(&rk8e, &ImageHeader::from_profile(&Preset::RK11E.profile())).expect("adopt");
        assert_eq!(Preset::RK11E.profile().data_bits, adopted.data_bits);
        assert_eq!(Preset::RK11E.profile().rk11d, adopted.rk11d);
        assert_eq!("RK11-E", adopted.controller);

        let mut odd = ImageHeader::from_profile(&Preset::RK11E.profile());
        odd.controller = "homebrew".to_string();
        let adopted = adopt_header(&rk8e, &odd).expect("adopt");
        assert_eq!(rk8e.data_bits, adopted.data_bits);
        assert_eq!("homebrew", adopted.controller);
    }
}
