//! Shared machine state: spindle rotation state and the system-wide
//! alarm/abort flags.
//!
//! `SystemState` is the cross-context channel between the main command
//! context and the interrupt-context duty refresh path. Both contexts read;
//! only the main context writes (the probing subsystem raises alarms from
//! the main context as well). All fields are atomics, so no locks are
//! required.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Spindle rotation state.
///
/// `Unknown` is the only valid state before `init()` has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SpindleState {
    /// Not yet initialized.
    Unknown = 0,
    /// Stopped / enable line deasserted.
    Disabled = 1,
    /// Rotating clockwise (M3).
    Clockwise = 2,
    /// Rotating counter-clockwise (M4).
    CounterClockwise = 3,
}

impl SpindleState {
    /// Decode from the atomic representation.
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Disabled,
            2 => Self::Clockwise,
            3 => Self::CounterClockwise,
            _ => Self::Unknown,
        }
    }

    /// Whether this state drives rotation.
    #[inline]
    pub const fn is_rotating(&self) -> bool {
        matches!(self, Self::Clockwise | Self::CounterClockwise)
    }
}

/// Executor alarm raised by the probing subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecAlarm {
    /// No alarm pending.
    None = 0,
    /// Probe switch was already tripped when the cycle started.
    ProbeFailInitial = 1,
    /// Probe travel completed without contact.
    ProbeFailContact = 2,
}

impl ExecAlarm {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::ProbeFailInitial,
            2 => Self::ProbeFailContact,
            _ => Self::None,
        }
    }
}

/// System-wide alarm and abort flags, shared between subsystems.
///
/// Checked at the entry of every spindle state transition and after every
/// probe cycle. Wrapped in an `Arc` by the owning firmware.
#[derive(Debug, Default)]
pub struct SystemState {
    abort: AtomicBool,
    alarm: AtomicU8,
}

impl SystemState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a system-wide abort is asserted.
    #[inline]
    pub fn abort(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    pub fn set_abort(&self, on: bool) {
        self.abort.store(on, Ordering::Relaxed);
    }

    /// Currently pending alarm, `ExecAlarm::None` if clear.
    #[inline]
    pub fn alarm(&self) -> ExecAlarm {
        ExecAlarm::from_u8(self.alarm.load(Ordering::Relaxed))
    }

    /// Whether the machine is in an alarm state.
    #[inline]
    pub fn is_alarmed(&self) -> bool {
        self.alarm() != ExecAlarm::None
    }

    /// Raise an alarm requiring operator intervention.
    pub fn raise_alarm(&self, alarm: ExecAlarm) {
        self.alarm.store(alarm as u8, Ordering::Relaxed);
    }

    /// Clear the pending alarm (operator reset).
    pub fn clear_alarm(&self) {
        self.alarm.store(ExecAlarm::None as u8, Ordering::Relaxed);
    }
}
