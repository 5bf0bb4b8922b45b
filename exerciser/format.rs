// Copyright © 2023 David Caldwell <david@porkrind.org>

use super::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitPattern {
    /// Header word then zeros.
    Zero,
    /// Header word then (cylinder, head/sector) words, so a dump shows where each sector was written.
    Address,
}

// Every sector starts with the cylinder shifted into a header word, low byte first.
fn header_word(chs: Chs, len: usize) -> Vec<u8> {
    let mut data = vec![0; len];
    let header = (chs.physical_cylinder() << 5).to_le_bytes();
    for (d, h) in data.iter_mut().zip(header) {
        *d = h;
    }
    data
}

fn sector_image(pattern: InitPattern, chs: Chs, len: usize) -> Vec<u8> {
    let mut data = header_word(chs, len);
    if pattern == InitPattern::Address {
        for word in data[2..].chunks_mut(2) {
            word[0] = chs.physical_cylinder() as u8;
            if let Some(b) = word.get_mut(1) {
                *b = chs.head << 4 | chs.sector;
            }
        }
    }
    data
}

/// Writes every sector on the pack.
pub fn initialize<B: RegisterBus>(ctx: &mut ExerciserContext, engine: &mut Engine<B>, pattern: InitPattern) -> LoopReport {
    let test = match pattern {
        InitPattern::Zero    => "disk initialize",
        InitPattern::Address => "disk initialize with address",
    };
    run(test, ctx, engine, true, |ctx, engine, tally| {
        let profile = ctx.profile().clone();
        sweep(ctx, engine, tally, 20, |_, engine, _, chs| {
            store_sector(engine, &profile, chs, &sector_image(pattern, chs, profile.sector_bytes()));
            engine.write_sector(chs).at(chs)?;
            Ok(())
        })
    })
}

/// Writes the address pattern to just the sectors in the list.
pub fn write_sectors_address<B: RegisterBus>(ctx: &mut ExerciserContext, engine: &mut Engine<B>) -> LoopReport {
    run("write sectors with address", ctx, engine, true, |ctx, engine, tally| {
        let items = require_list(ctx, ListKind::Chs)?;
        let profile = ctx.profile().clone();
        once(ctx, engine, tally, &items, |_, engine, tally, chs| {
            engine.seek_and_wait(chs).at(chs)?;
            tally.seeks += 1;
            store_sector(engine, &profile, chs, &sector_image(InitPattern::Address, chs, profile.sector_bytes()));
            engine.write_sector(chs).at(chs)?;
            tally.sectors_processed += 1;
            Ok(())
        })
    })
}
