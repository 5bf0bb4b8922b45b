// Copyright © 2023 David Caldwell <david@porkrind.org>

use super::*;

/// Seeks through the cylinder list over and over. With `check_ready` each seek waits for the drive
/// to report ready first; without it the loop just gives the heads time to settle.
pub fn seek_loop<B: RegisterBus>(ctx: &mut ExerciserContext, engine: &mut Engine<B>, check_ready: bool) -> LoopReport {
    let test = if check_ready { "seek loop" } else { "seek loop without ready check" };
    run(test, ctx, engine, check_ready, |ctx, engine, tally| {
        let items = require_list(ctx, ListKind::Cylinder)?;
        cycle(ctx, engine, tally, &items, |_, engine, tally, chs| {
            if check_ready {
                engine.wait_ready().at(chs)?;
            } else if !engine.timeouts.seek_settle.is_zero() {
                std::thread::sleep(engine.timeouts.seek_settle);
            }
            engine.seek(chs);
            tally.seeks += 1;
            tally.cylinders_processed += 1;
            Ok(())
        })
    })
}

fn next_step(cylinder: u16, up: bool, cylinders: u16) -> (u16, bool) {
    match up {
        true if cylinder + 1 < cylinders => (cylinder + 1, true),
        true                             => (cylinder.saturating_sub(1), false),
        false if cylinder > 0            => (cylinder - 1, false),
        false                            => (cylinders.saturating_sub(1).min(1), true),
    }
}

/// Steps the heads one cylinder at a time across the pack and back. Each return to cylinder 0
/// finishes a pass.
pub fn seek_step<B: RegisterBus>(ctx: &mut ExerciserContext, engine: &mut Engine<B>) -> LoopReport {
    run("seek step", ctx, engine, true, |ctx, engine, tally| {
        let cylinders = ctx.profile().cylinders;
        let (mut cylinder, mut up) = (0, true);
        loop {
            poll_signal(ctx, tally)?;
            let at = Chs::new(cylinder, 0, 0);
            engine.seek_and_wait(at).at(at)?;
            tally.seeks += 1;
            tally.cylinders_processed += 1;
            if cylinder % 20 == 0 {
                ctx.report(Progress::Cylinder(cylinder));
            }
            if cylinder == 0 && tally.seeks > 1 {
                tally.passes += 1;
                if ctx.limit.reached(tally.passes) {
                    return Ok(());
                }
            }
            (cylinder, up) = next_step(cylinder, up, cylinders);
        }
    })
}
