// Copyright © 2023 David Caldwell <david@porkrind.org>

use std::sync::atomic::{AtomicU8, Ordering};

/// What the operator asked for since the loop last looked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Signal {
    None     = 0,
    Progress = 1,
    Cancel   = 2,
}

impl Signal {
    fn from_repr(v: u8) -> Signal {
        match v {
            0 => Signal::None,
            1 => Signal::Progress,
            _ => Signal::Cancel,
        }
    }
}

/// A one slot mailbox between the console and a running loop. A cancel is never overwritten by
/// a later progress request.
#[derive(Debug, Default)]
pub struct SignalChannel(AtomicU8);

impl SignalChannel {
    pub fn new() -> SignalChannel {
        SignalChannel(AtomicU8::new(Signal::None as u8))
    }

    pub fn post(&self, signal: Signal) {
        self.0.fetch_max(signal as u8, Ordering::SeqCst);
    }

    /// `P` asks for progress, any other key cancels.
    pub fn post_key(&self, key: char) {
        self.post(match key {
            'P' | 'p' => Signal::Progress,
            _         => Signal::Cancel,
        })
    }

    pub fn take(&self) -> Signal {
        Signal::from_repr(self.0.swap(Signal::None as u8, Ordering::SeqCst))
    }
}
