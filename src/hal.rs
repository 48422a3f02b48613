//! Hardware and motion abstraction traits.
//!
//! The orchestrator and spindle controller never touch peripherals or the
//! motion planner directly; they drive these traits. Production wires them
//! to the real planner and pin drivers, tests and the demo binary use the
//! in-memory implementations in [`simulation`].

pub mod simulation;

use std::thread;
use std::time::Duration;

/// Active G-code distance mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMode {
    /// G90, targets are absolute.
    Absolute,
    /// G91, targets are relative to the current position.
    Incremental,
}

/// A rapid-move target in machine coordinates. Unspecified axes keep their
/// current position (G53 G0 semantics).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MachineTarget {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl MachineTarget {
    pub const fn xy(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: None,
        }
    }

    pub const fn y(y: f64) -> Self {
        Self {
            x: None,
            y: Some(y),
            z: None,
        }
    }

    pub const fn z(z: f64) -> Self {
        Self {
            x: None,
            y: None,
            z: Some(z),
        }
    }

    pub const fn xyz(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: Some(z),
        }
    }
}

/// A clockwise arc (G2) relative to the current position, with the center
/// given as I/J offsets. Used for the rack-avoiding toolsetter approach.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcMove {
    /// X displacement [mm].
    pub dx: f64,
    /// Y displacement [mm].
    pub dy: f64,
    /// Arc center X offset from start [mm].
    pub i: f64,
    /// Arc center Y offset from start [mm].
    pub j: f64,
    /// Feed rate [mm/min].
    pub feed: f64,
}

/// Motion execution and modal-state collaborator (planner + G-code modal
/// state). All calls run on the main command context.
pub trait MotionPort {
    /// Queue a rapid move in machine coordinates. With `sync` the call
    /// blocks until the planner has executed it.
    fn rapid(&mut self, sync: bool, target: MachineTarget);

    /// Queue a relative clockwise arc in the XY plane.
    fn arc(&mut self, arc: ArcMove);

    /// Dwell for the given duration (G4).
    fn dwell(&mut self, seconds: f32);

    /// Issue a downward probe (G38.2) toward the given work-coordinate Z
    /// target, blocking until the cycle completes. A failed probe raises a
    /// system alarm; it is not reported through this call.
    fn probe_down(&mut self, z_target: f64, feed: f64);

    /// Block until the operator acknowledges (M0).
    fn operator_pause(&mut self);

    /// Drain the motion queue: block until all queued motion has executed.
    fn synchronize(&mut self);

    /// Current machine position per axis, derived from executed motion.
    fn machine_position(&self) -> [f64; 3];

    /// Machine position latched at the last probe contact.
    fn probe_position(&self) -> [f64; 3];

    fn distance_mode(&self) -> DistanceMode;
    fn set_distance_mode(&mut self, mode: DistanceMode);

    /// Active work-coordinate Z offset (coordinate system + G92 offset),
    /// excluding the tool length offset.
    fn work_offset_z(&self) -> f64;

    /// Currently applied tool length offset.
    fn tool_length_offset(&self) -> f64;

    /// Apply a tool length offset (G43.1).
    fn apply_tool_length_offset(&mut self, tlo: f64);
}

/// A digital output with synchronous (applied-before-return) writes.
///
/// Implementations must be callable from the interrupt context: no blocking
/// on the planner, no allocation.
pub trait DigitalPort: Send + Sync {
    fn write_sync(&self, on: bool);
}

/// A PWM output with frequency fixed at claim time.
pub trait PwmPort: Send + Sync {
    /// Duty period in device units; the full-scale output value.
    fn period(&self) -> u32;

    /// Set the duty cycle in device units. Interrupt-safe.
    fn set_duty(&self, duty: u32);
}

/// Resolves configured pin bindings into output ports.
///
/// An unknown or unbound name yields `None`; the owning component treats a
/// missing port as a silent no-op write.
pub trait OutputProvider {
    fn claim_digital(&mut self, name: &str) -> Option<Box<dyn DigitalPort>>;
    fn claim_pwm(&mut self, name: &str, frequency_hz: u32) -> Option<Box<dyn PwmPort>>;
}

/// Injectable time source for blocking delays, so tests can simulate
/// elapsed time without real waiting.
pub trait Clock: Send + Sync {
    fn sleep_ms(&self, ms: u32);
}

/// Wall-clock implementation used in production.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep_ms(&self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}
