// Copyright © 2023 David Caldwell <david@porkrind.org>

mod ops;

use std::path::PathBuf;
use std::time::Duration;

use ops::*;

use anyhow::anyhow;
use docopt::Docopt;
use serde::Deserialize;
use strum::VariantNames;

use rk05tester::controller::sim::{Corruption, SimDrive};
use rk05tester::controller::Status1;
use rk05tester::exerciser::{self, InitPattern, Pattern, RunLimit};
use rk05tester::worklist::ListKind;
use rk05tester::{Controller, Engine, ExerciserContext, Preset, RetryPolicy, Timeouts};

fn usage() -> String {
    format!(r#"
Usage:
  rk05tester -h
  rk05tester [options] status
  rk05tester [options] show-profile
  rk05tester [options] read-loop
  rk05tester [options] read-sectors
  rk05tester [options] write-loop [--verify] [--zero]
  rk05tester [options] write-random [--no-verify]
  rk05tester [options] write-sectors
  rk05tester [options] seek-loop [--no-ready-check]
  rk05tester [options] seek-step
  rk05tester [options] init [--with-address]
  rk05tester [options] export <image-file>
  rk05tester [options] import [--adopt] <image-file>
  rk05tester [options] ramtest [<start> <count>]
  rk05tester [options] peek <register>
  rk05tester [options] poke <register> <value>

Options:
  -h --help                 Show this screen.
  -c --controller <name>    Controller preset or drive parameter (DPD) file [default: rk8e].
  -d --drive <n>            Drive address, 0-7 [default: 0].
  -l --list <file>          Sector (or cylinder, for seek-loop) list file.
  -p --passes <n>           Stop looping tests after <n> passes. Without this they run until
                            stopped from the console.
  -w --write-protect        Turn on the tester's write protect line.
  --rk11d <mode>            Force RK11-D mode on or off instead of taking it from the profile.
  --tick-us <us>            Length of one handshake poll [default: 1000].
  --accept-ticks <n>        Polls to wait for a seek address to be accepted [default: 10].
  --ready-ticks <n>         Polls to wait for the drive to be ready [default: 1000].
  --rw-ticks <n>            Polls to wait for a read or write to finish [default: 1000].
  --settle-ms <ms>          Pause between seeks when not checking ready [default: 300].

 Simulated drive:
  --sim-never-accept        Never accept a seek address.
  --sim-never-ready         Never become ready after a seek.
  --sim-stuck-busy          Never finish a read or write.
  --sim-not-ready           Report the drive's file not ready.
  --sim-corrupt <read>      Flip a bit in the data of the <read>th read.

 <name> must be one of: {}
   or the path to a DPD file.

 List files:
   One entry per line: "cylinder head sector" (seek-loop: just "cylinder"), separated by
   spaces or commas. "R" is a restore, "X" ends the list and '#' starts a comment.

 write-loop:
   --verify                 Check each sector against what was written to it.
   --zero                   Write zeros instead of pseudorandom data.

 write-random:
   --no-verify              Don't compare what was read.

 seek-loop:
   --no-ready-check         Don't wait for ready between seeks.

 init:
   --with-address           Fill each sector with its own address instead of zeros.

 import:
   --adopt                  Take the geometry from the image's header.

 ramtest:
   Tests <count> bytes of controller memory from <start> (default: all of it).

 While a test runs, return stops it and p<return> prints its counts.
"#,
    Preset::VARIANTS.join(", "))
}

#[derive(Debug, Deserialize)]
struct Args {
    flag_controller:       String,
    flag_drive:            u8,
    flag_list:             Option<PathBuf>,
    flag_passes:           Option<u64>,
    flag_write_protect:    bool,
    flag_rk11d:            Option<Switch>,
    flag_tick_us:          u64,
    flag_accept_ticks:     u32,
    flag_ready_ticks:      u32,
    flag_rw_ticks:         u32,
    flag_settle_ms:        u64,
    flag_sim_never_accept: bool,
    flag_sim_never_ready:  bool,
    flag_sim_stuck_busy:   bool,
    flag_sim_not_ready:    bool,
    flag_sim_corrupt:      Option<u64>,
    flag_verify:           bool,
    flag_no_verify:        bool,
    flag_zero:             bool,
    flag_no_ready_check:   bool,
    flag_with_address:     bool,
    flag_adopt:            bool,
    cmd_status:            bool,
    cmd_show_profile:      bool,
    cmd_read_loop:         bool,
    cmd_read_sectors:      bool,
    cmd_write_loop:        bool,
    cmd_write_random:      bool,
    cmd_write_sectors:     bool,
    cmd_seek_loop:         bool,
    cmd_seek_step:         bool,
    cmd_init:              bool,
    cmd_export:            bool,
    cmd_import:            bool,
    cmd_ramtest:           bool,
    cmd_peek:              bool,
    cmd_poke:              bool,
    arg_image_file:        PathBuf,
    arg_start:             Option<String>,
    arg_count:             Option<String>,
    arg_register:          String,
    arg_value:             String,
}

fn sim_drive(args: &Args) -> SimDrive {
    let mut sim = SimDrive::new();
    sim.faults.never_accept = args.flag_sim_never_accept;
    sim.faults.never_ready  = args.flag_sim_never_ready;
    sim.faults.stuck_busy   = args.flag_sim_stuck_busy;
    if args.flag_sim_not_ready {
        sim.faults.status1_clear = Status1::FILE_READY;
    }
    if let Some(read) = args.flag_sim_corrupt {
        sim.faults.corrupt.push(Corruption { read, offset: 0, xor: 0x01 });
    }
    sim
}

fn timeouts(args: &Args) -> Timeouts {
    let tick = Duration::from_micros(args.flag_tick_us);
    Timeouts {
        address_accepted: RetryPolicy { max_ticks: args.flag_accept_ticks, tick },
        ready:            RetryPolicy { max_ticks: args.flag_ready_ticks,  tick },
        read_write:       RetryPolicy { max_ticks: args.flag_rw_ticks,     tick },
        seek_settle:      Duration::from_millis(args.flag_settle_ms),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Args = Docopt::new(usage())
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    let mut profile = load_profile(&args.flag_controller)?;
    if args.cmd_import && args.flag_adopt {
        profile = adopt_image_geometry(&profile, &args.arg_image_file)?;
    }

    if args.cmd_show_profile {
        show_profile(&profile);
        return Ok(())
    }

    let mut engine = Engine::new(Controller::new(sim_drive(&args)), timeouts(&args));
    if !engine.controller.is_tester() {
        return Err(anyhow!("No tester found (function id {:#04x})", engine.controller.function_id()));
    }

    let mut ctx = ExerciserContext::new(profile.clone());
    ctx.select_profile(&mut engine, profile)?;
    ctx.select_drive(&mut engine, args.flag_drive)?;
    apply_modes(&mut engine, args.flag_write_protect, args.flag_rk11d);

    if args.cmd_status {
        status(&mut engine);
        return Ok(())
    }
    if args.cmd_peek {
        return peek(&mut engine, &args.arg_register);
    }
    if args.cmd_poke {
        return poke(&mut engine, &args.arg_register, &args.arg_value);
    }

    ctx.limit = RunLimit { passes: args.flag_passes };
    ctx.reporter = Box::new(print_progress);
    if let Some(ref list) = args.flag_list {
        let kind = if args.cmd_seek_loop { ListKind::Cylinder } else { ListKind::Chs };
        ctx.worklist = load_worklist(list, kind, ctx.profile())?;
    }
    spawn_console(ctx.signal.clone());

    if args.cmd_export {
        return export(&mut ctx, &mut engine, &args.arg_image_file);
    }
    if args.cmd_import {
        return import(&mut ctx, &mut engine, &args.arg_image_file);
    }
    if args.cmd_read_sectors {
        let (report, sectors) = exerciser::read_sectors(&mut ctx, &mut engine);
        dump_sectors(&sectors);
        return finish(report);
    }

    let report = match () {
        _ if args.cmd_read_loop     => exerciser::read_loop(&mut ctx, &mut engine),
        _ if args.cmd_write_loop    => exerciser::write_loop(&mut ctx, &mut engine, if args.flag_zero { Pattern::Zero } else { Pattern::Lfsr }, args.flag_verify),
        _ if args.cmd_write_random  => exerciser::write_loop_random(&mut ctx, &mut engine, !args.flag_no_verify),
        _ if args.cmd_write_sectors => exerciser::write_sectors_address(&mut ctx, &mut engine),
        _ if args.cmd_seek_loop     => exerciser::seek_loop(&mut ctx, &mut engine, !args.flag_no_ready_check),
        _ if args.cmd_seek_step     => exerciser::seek_step(&mut ctx, &mut engine),
        _ if args.cmd_init          => exerciser::initialize(&mut ctx, &mut engine, if args.flag_with_address { InitPattern::Address } else { InitPattern::Zero }),
        _ if args.cmd_ramtest       => {
            let start = args.arg_start.as_deref().map(parse_number).transpose()?.unwrap_or(0);
            let count = match args.arg_count.as_deref() {
                Some(c) => parse_number(c)?,
                None    => exerciser::RAM_SPAN.saturating_sub(start as u64) as u32,
            };
            exerciser::ram_test(&mut ctx, &mut engine, start, count)
        },
        _ => Err(anyhow!("Nothing to do"))?,
    };
    finish(report)
}
