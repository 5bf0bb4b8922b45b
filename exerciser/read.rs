// Copyright © 2023 David Caldwell <david@porkrind.org>

use super::*;

/// Reads the sectors in the list over and over without looking at the data.
pub fn read_loop<B: RegisterBus>(ctx: &mut ExerciserContext, engine: &mut Engine<B>) -> LoopReport {
    run("read loop", ctx, engine, true, |ctx, engine, tally| {
        let items = require_list(ctx, ListKind::Chs)?;
        cycle(ctx, engine, tally, &items, |_, engine, tally, chs| {
            engine.seek_and_wait(chs).at(chs)?;
            tally.seeks += 1;
            engine.read_sector(chs).at(chs)?;
            tally.sectors_processed += 1;
            Ok(())
        })
    })
}

/// Reads each sector in the list once and hands back what was on it.
pub fn read_sectors<B: RegisterBus>(ctx: &mut ExerciserContext, engine: &mut Engine<B>) -> (LoopReport, Vec<(Chs, Vec<u8>)>) {
    let mut sectors = vec![];
    let report = run("read sectors", ctx, engine, true, |ctx, engine, tally| {
        let items = require_list(ctx, ListKind::Chs)?;
        let profile = ctx.profile().clone();
        once(ctx, engine, tally, &items, |_, engine, tally, chs| {
            engine.seek_and_wait(chs).at(chs)?;
            tally.seeks += 1;
            engine.read_sector(chs).at(chs)?;
            sectors.push((chs, fetch_sector(engine, &profile, chs)));
            tally.sectors_processed += 1;
            Ok(())
        })
    });
    (report, sectors)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::controller::sim::SimDrive;
    use crate::exerciser::test::{chs_list, setup, small_profile};

    #[test]
    fn test_read_loop_passes() {
        let (mut ctx, mut engine) = setup(small_profile(), SimDrive::new());
        chs_list(&mut ctx, &[(0, 0, 0), (3, 1, 15), (1, 0, 7)]);
        ctx.limit = RunLimit::passes(4);
        let r = read_loop(&mut ctx, &mut engine);
        assert!(r.completed());
        assert_eq!(4, r.tally.passes);
        assert_eq!(12, r.tally.sectors_processed);
        assert_eq!(12, engine.controller.bus().stats.reads);
        assert_eq!(0, engine.controller.bus().stats.writes);
    }

    #[test]
    fn test_read_sectors() {
        let mut sim = SimDrive::new();
        sim.set_media(Chs::new(2, 1, 5), vec![0x12, 0x34, 0x56]);
        let (mut ctx, mut engine) = setup(small_profile(), sim);
        chs_list(&mut ctx, &[(2, 1, 5), (0, 0, 0)]);
        ctx.limit = RunLimit::passes(10);
        let (r, sectors) = read_sectors(&mut ctx, &mut engine);
        assert!(r.completed());
        assert_eq!(1, r.tally.passes);
        assert_eq!(2, sectors.len());
        assert_eq!(Chs::new(2, 1, 5), sectors[0].0);
        assert_eq!(388, sectors[0].1.len());
        assert_eq!(vec![0x12, 0x34, 0x56, 0x00], sectors[0].1[..4].to_vec());
        assert!(sectors[1].1.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_restore_entry() {
        let (mut ctx, mut engine) = setup(small_profile(), SimDrive::new());
        chs_list(&mut ctx, &[(3, 0, 0)]);
        let profile = ctx.profile().clone();
        ctx.worklist.push(Chs::restore(), &profile).expect("push");
        ctx.limit = RunLimit::passes(1);
        let r = read_loop(&mut ctx, &mut engine);
        assert!(r.completed());
        assert_eq!(1, engine.controller.bus().stats.restores);
        assert_eq!(0, engine.controller.bus().cylinder());
    }
}
