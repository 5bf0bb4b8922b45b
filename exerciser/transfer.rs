// Copyright © 2023 David Caldwell <david@porkrind.org>

// Whole pack copies between the drive and an image stream. Controller memory holds the entire pack,
// so each direction is one sweep of the drive plus one pass over the stream.

use std::io::{Read, Write};

use crate::image::{read_header, read_sector_record, write_header, write_sector_record, ImageHeader};

use super::*;

/// Reads the whole pack and writes it to `stream` as an image.
pub fn export_image<B: RegisterBus>(ctx: &mut ExerciserContext, engine: &mut Engine<B>, stream: &mut impl Write) -> LoopReport {
    run("export image", ctx, engine, true, |ctx, engine, tally| {
        let profile = ctx.profile().clone();
        write_header(stream, &profile).map_err(Abort::Header)?;
        sweep(ctx, engine, tally, 20, |_, engine, _, chs| {
            engine.read_sector(chs).at(chs)?;
            Ok(())
        })?;
        log::info!("Writing image");
        for at in natural_order(&profile) {
            let data = fetch_sector(engine, &profile, at);
            write_sector_record(stream, &profile, &data).map_err(|error| Abort::Image { error, at })?;
        }
        stream.flush().map_err(|e| Abort::Image { error: e.into(), at: Chs::default() })?;
        Ok(())
    })
}

/// Loads an image from `stream` and writes it to the whole pack. The image has to have been made
/// with the same layout as the active profile.
pub fn import_image<B: RegisterBus>(ctx: &mut ExerciserContext, engine: &mut Engine<B>, stream: &mut impl Read) -> LoopReport {
    run("import image", ctx, engine, true, |ctx, engine, tally| {
        let profile = ctx.profile().clone();
        let header = read_header(stream).map_err(Abort::Header)?;
        if !profile.same_layout(&header) {
            Err(Abort::Header(ImageError::GeometryMismatch { expected: ImageHeader::from_profile(&profile).layout(),
                                                             found: header.layout() }))?;
        }
        log::info!("Loading image {:?} ({})", header.image_name, header.description);
        let len = profile.sector_bytes();
        for at in natural_order(&profile) {
            let record = read_sector_record(stream, &profile).map_err(|error| Abort::Image { error, at })?;
            if (record.bits as u32) < profile.data_bits {
                ctx.report(Progress::ShortSector { at, bits: record.bits });
            }
            let mut data = record.payload;
            data.resize(len, 0);
            store_sector(engine, &profile, at, &data);
        }
        sweep(ctx, engine, tally, 10, |_, engine, _, chs| {
            engine.write_sector(chs).at(chs)?;
            Ok(())
        })
    })
}
