// Copyright © 2023 David Caldwell <david@porkrind.org>

// RK05 drive exerciser: drives an RK05 through the tester's register-mapped controller and checks
// the drive electronics and media.

pub mod controller;
pub mod dpd;
pub mod exerciser;
pub mod geometry;
pub mod handshake;
pub mod image;
pub mod lfsr;
pub mod signal;
pub mod worklist;

pub use controller::{Controller, RegisterBus};
pub use exerciser::{ExerciserContext, LoopReport, Outcome, Tally};
pub use geometry::{Chs, DriveGeometryProfile, Preset};
pub use handshake::{Engine, RetryPolicy, Timeouts};
