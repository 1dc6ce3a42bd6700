//! Keeps the real-time callback away from the rings while the control
//! thread resets them.
//!
//! The callback raises `busy` and then checks `hold`; the control thread
//! raises `hold` and then waits for `busy` to drop. With sequentially
//! consistent ordering at least one side sees the other's flag, so a held
//! gate and a running callback never overlap. The callback never waits: a
//! held gate just means a silent period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const SPIN_SLEEP: Duration = Duration::from_micros(200);

#[derive(Debug, Default)]
pub(crate) struct CallbackGate {
    busy: AtomicBool,
    hold: AtomicBool,
}

impl CallbackGate {
    /// Real-time side. Returns `false` when the gate is held; the callback
    /// must then output silence and not touch any ring.
    #[inline]
    pub(crate) fn enter(&self) -> bool {
        self.busy.store(true, Ordering::SeqCst);
        if self.hold.load(Ordering::SeqCst) {
            self.busy.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    #[inline]
    pub(crate) fn exit(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }

    /// Control side. Returns once no callback is inside the gate; it stays
    /// shut until the returned guard drops.
    pub(crate) fn hold(&self) -> GateHold<'_> {
        self.hold.store(true, Ordering::SeqCst);
        while self.busy.load(Ordering::SeqCst) {
            std::thread::sleep(SPIN_SLEEP);
        }
        GateHold { gate: self }
    }
}

pub(crate) struct GateHold<'a> {
    gate: &'a CallbackGate,
}

impl Drop for GateHold<'_> {
    fn drop(&mut self) {
        self.gate.hold.store(false, Ordering::SeqCst);
    }
}
