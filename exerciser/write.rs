// Copyright © 2023 David Caldwell <david@porkrind.org>

use crate::lfsr::{Lfsr, Lfsr16};

use super::*;

/// What the write loop puts on the pack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pattern {
    Lfsr,
    Zero,
}

// 8 shifts per byte while seeding the pack, 16 once the loop is running.
const SEED_SHIFTS: u32 = 8;
const LOOP_SHIFTS: u32 = 16;

fn pattern_bytes(pattern: Pattern, lfsr: &mut Lfsr16, len: usize, shifts: u32) -> Vec<u8> {
    let mut buf = vec![0; len];
    if pattern == Pattern::Lfsr {
        lfsr.fill(&mut buf, shifts);
    }
    buf
}

/// Writes every sector in the list once, then keeps reading each back (checking it against what
/// was written when `verify` is set) and rewriting it with fresh data.
pub fn write_loop<B: RegisterBus>(ctx: &mut ExerciserContext, engine: &mut Engine<B>, pattern: Pattern, verify: bool) -> LoopReport {
    let test = match (pattern, verify) {
        (Pattern::Lfsr, true)  => "write loop verify",
        (Pattern::Lfsr, false) => "write loop no verify",
        (Pattern::Zero, true)  => "write loop zero verify",
        (Pattern::Zero, false) => "write loop zero no verify",
    };
    run(test, ctx, engine, true, |ctx, engine, tally| {
        let items = require_list(ctx, ListKind::Chs)?;
        let profile = ctx.profile().clone();
        let len = profile.sector_bytes();
        let mut lfsr = Lfsr16::new();

        for &chs in &items {
            engine.seek_and_wait(chs).at(chs)?;
            tally.seeks += 1;
            store_sector(engine, &profile, chs, &pattern_bytes(pattern, &mut lfsr, len, SEED_SHIFTS));
            engine.write_sector(chs).at(chs)?;
            tally.sectors_processed += 1;
        }

        cycle(ctx, engine, tally, &items, |ctx, engine, tally, chs| {
            let expected = match (verify, pattern) {
                (false, _)             => None,
                (true, Pattern::Zero)  => Some(vec![0; len]),
                (true, Pattern::Lfsr)  => Some(fetch_sector(engine, &profile, chs)),
            };
            engine.seek_and_wait(chs).at(chs)?;
            tally.seeks += 1;
            engine.read_sector(chs).at(chs)?;
            if let Some(expected) = expected {
                let actual = fetch_sector(engine, &profile, chs);
                check(ctx, tally, chs, &expected, &actual, None);
            }
            tally.sectors_tested += 1;

            store_sector(engine, &profile, chs, &pattern_bytes(pattern, &mut lfsr, len, LOOP_SHIFTS));
            engine.write_sector(chs).at(chs)?;
            tally.sectors_processed += 1;
            Ok(())
        })
    })
}

// Scales a fresh 16 bit draw onto 0..range. The register never holds 0xffff so this stays in range.
fn draw(lfsr: &mut Lfsr16, range: u32) -> u32 {
    lfsr.advance_by(LOOP_SHIFTS);
    lfsr.value() as u32 * range / 65535
}

/// Fills the whole pack with pseudorandom data, then reads, checks and rewrites sectors picked
/// at random. One pass is as many sectors as the pack holds.
pub fn write_loop_random<B: RegisterBus>(ctx: &mut ExerciserContext, engine: &mut Engine<B>, verify: bool) -> LoopReport {
    run("write loop random", ctx, engine, true, |ctx, engine, tally| {
        let profile = ctx.profile().clone();
        let len = profile.sector_bytes();
        let mut lfsr = Lfsr16::new();

        sweep(ctx, engine, tally, 20, |_, engine, _, chs| {
            store_sector(engine, &profile, chs, &pattern_bytes(Pattern::Lfsr, &mut lfsr, len, SEED_SHIFTS));
            engine.write_sector(chs).at(chs)?;
            Ok(())
        })?;

        let total = profile.total_sectors();
        let mut iterations = 0;
        loop {
            poll_signal(ctx, tally)?;
            let cylinder = draw(&mut lfsr, profile.cylinders as u32) as u16;
            let head = draw(&mut lfsr, profile.heads as u32) as u8;
            let sector = draw(&mut lfsr, profile.sectors_per_track as u32) as u8;
            let chs = Chs::new(cylinder, head, sector);

            let expected = fetch_sector(engine, &profile, chs);
            // wipe it so stale memory can't pass for a good read
            store_sector(engine, &profile, chs, &vec![0xff; len]);
            engine.seek_and_wait(chs).at(chs)?;
            tally.seeks += 1;
            engine.read_sector(chs).at(chs)?;
            if verify {
                let actual = fetch_sector(engine, &profile, chs);
                check(ctx, tally, chs, &expected, &actual, Some(profile.data_bits));
            }
            tally.sectors_tested += 1;

            store_sector(engine, &profile, chs, &pattern_bytes(Pattern::Lfsr, &mut lfsr, len, LOOP_SHIFTS));
            engine.write_sector(chs).at(chs)?;
            tally.sectors_processed += 1;

            iterations += 1;
            if iterations % total == 0 {
                tally.passes += 1;
                if ctx.limit.reached(tally.passes) {
                    return Ok(());
                }
            }
        }
    })
}
