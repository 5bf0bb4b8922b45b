// Copyright © 2023 David Caldwell <david@porkrind.org>

use crate::lfsr::{Lfsr, Lfsr31};

use super::*;

/// Controller memory addresses are 24 bits.
pub const RAM_SPAN: u64 = 1 << 24;

// Check the console about once a megabyte.
const CHUNK: u32 = 1 << 20;

/// Fills `count` bytes of controller memory from `start` with a pseudorandom pattern and checks
/// it, then does the same with the pattern inverted. Doesn't touch the drive.
pub fn ram_test<B: RegisterBus>(ctx: &mut ExerciserContext, engine: &mut Engine<B>, start: u32, count: u32) -> LoopReport {
    run("ram test", ctx, engine, false, |ctx, engine, tally| {
        if count == 0 || start as u64 + count as u64 > RAM_SPAN {
            Err(Abort::RamRange { start, count })?;
        }
        log::info!("Testing RAM {:#x}-{:#x}", start, start as u64 + count as u64 - 1);
        for invert in [0x00, 0xff] {
            let mut lfsr = Lfsr31::new();
            engine.controller.load_ram_address(start);
            for offset in 0..count {
                if offset % CHUNK == 0 {
                    poll_signal(ctx, tally)?;
                }
                engine.controller.store_byte(lfsr.next_byte(1) ^ invert);
            }

            let mut lfsr = Lfsr31::new();
            engine.controller.load_ram_address(start);
            for offset in 0..count {
                if offset % CHUNK == 0 {
                    poll_signal(ctx, tally)?;
                }
                let want = lfsr.next_byte(1) ^ invert;
                let got = engine.controller.read_byte();
                if got != want {
                    log::debug!("RAM error at {:#x}: wrote {:#04x}, read {:#04x}", start as u64 + offset as u64, want, got);
                    tally.byte_errors += 1;
                }
            }
            tally.bytes_tested += count as u64;
            tally.passes += 1;
        }
        Ok(())
    })
}
