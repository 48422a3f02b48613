//! In-memory HAL implementations for tests and the demo binary.
//!
//! `SimMotionPort` journals every issued command and tracks the resulting
//! machine position; the probe outcome is scripted per test. Output ports
//! latch their last written value behind shared handles so tests can
//! inspect them after the ports have been claimed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::hal::{
    ArcMove, Clock, DigitalPort, DistanceMode, MachineTarget, MotionPort, OutputProvider, PwmPort,
};
use crate::state::{ExecAlarm, SystemState};

/// Scripted result of the next probe cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeOutcome {
    /// Contact at the given machine Z.
    Contact { z: f64 },
    /// Travel completes without contact; raises `ProbeFailContact`.
    NoContact,
    /// Switch tripped before the cycle started; raises `ProbeFailInitial`.
    AlreadyTripped,
}

/// One journaled motion-port call.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionRecord {
    Rapid { sync: bool, target: MachineTarget },
    Arc(ArcMove),
    Dwell(f32),
    Probe { z_target: f64, feed: f64 },
    OperatorPause,
    Synchronize,
    SetDistanceMode(DistanceMode),
    ApplyTlo(f64),
}

impl MotionRecord {
    /// Whether this record moved (or could move) the machine.
    fn is_motion(&self) -> bool {
        matches!(
            self,
            Self::Rapid { .. } | Self::Arc(_) | Self::Dwell(_) | Self::Probe { .. }
        )
    }
}

/// Simulated motion planner and modal state.
pub struct SimMotionPort {
    system: Arc<SystemState>,
    position: [f64; 3],
    probe_position: [f64; 3],
    distance_mode: DistanceMode,
    tlo: f64,
    work_offset_z: f64,
    probe_outcome: ProbeOutcome,
    pub journal: Vec<MotionRecord>,
}

impl SimMotionPort {
    pub fn new(system: Arc<SystemState>) -> Self {
        Self {
            system,
            position: [0.0; 3],
            probe_position: [0.0; 3],
            distance_mode: DistanceMode::Absolute,
            tlo: 0.0,
            work_offset_z: 0.0,
            probe_outcome: ProbeOutcome::NoContact,
            journal: Vec::new(),
        }
    }

    pub fn set_position(&mut self, position: [f64; 3]) {
        self.position = position;
    }

    pub fn set_probe_outcome(&mut self, outcome: ProbeOutcome) {
        self.probe_outcome = outcome;
    }

    pub fn set_work_offset_z(&mut self, wco: f64) {
        self.work_offset_z = wco;
    }

    /// Number of journaled commands that issue machine motion.
    pub fn motion_count(&self) -> usize {
        self.journal.iter().filter(|r| r.is_motion()).count()
    }
}

impl MotionPort for SimMotionPort {
    fn rapid(&mut self, sync: bool, target: MachineTarget) {
        // machine-coordinate rapids are absolute regardless of distance mode
        if let Some(x) = target.x {
            self.position[0] = x;
        }
        if let Some(y) = target.y {
            self.position[1] = y;
        }
        if let Some(z) = target.z {
            self.position[2] = z;
        }
        self.journal.push(MotionRecord::Rapid { sync, target });
    }

    fn arc(&mut self, arc: ArcMove) {
        self.position[0] += arc.dx;
        self.position[1] += arc.dy;
        self.journal.push(MotionRecord::Arc(arc));
    }

    fn dwell(&mut self, seconds: f32) {
        self.journal.push(MotionRecord::Dwell(seconds));
    }

    fn probe_down(&mut self, z_target: f64, feed: f64) {
        self.journal.push(MotionRecord::Probe { z_target, feed });
        match self.probe_outcome {
            ProbeOutcome::Contact { z } => {
                self.position[2] = z;
                self.probe_position = self.position;
            }
            ProbeOutcome::NoContact => {
                self.system.raise_alarm(ExecAlarm::ProbeFailContact);
            }
            ProbeOutcome::AlreadyTripped => {
                self.system.raise_alarm(ExecAlarm::ProbeFailInitial);
            }
        }
    }

    fn operator_pause(&mut self) {
        self.journal.push(MotionRecord::OperatorPause);
    }

    fn synchronize(&mut self) {
        self.journal.push(MotionRecord::Synchronize);
    }

    fn machine_position(&self) -> [f64; 3] {
        self.position
    }

    fn probe_position(&self) -> [f64; 3] {
        self.probe_position
    }

    fn distance_mode(&self) -> DistanceMode {
        self.distance_mode
    }

    fn set_distance_mode(&mut self, mode: DistanceMode) {
        self.distance_mode = mode;
        self.journal.push(MotionRecord::SetDistanceMode(mode));
    }

    fn work_offset_z(&self) -> f64 {
        self.work_offset_z
    }

    fn tool_length_offset(&self) -> f64 {
        self.tlo
    }

    fn apply_tool_length_offset(&mut self, tlo: f64) {
        self.tlo = tlo;
        self.journal.push(MotionRecord::ApplyTlo(tlo));
    }
}

/// Latched state of a simulated digital output.
#[derive(Debug, Default)]
pub struct SimPinState {
    level: AtomicBool,
    writes: AtomicUsize,
}

impl SimPinState {
    pub fn level(&self) -> bool {
        self.level.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

struct SimDigital(Arc<SimPinState>);

impl DigitalPort for SimDigital {
    fn write_sync(&self, on: bool) {
        self.0.level.store(on, Ordering::Relaxed);
        self.0.writes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Latched state of a simulated PWM output.
#[derive(Debug)]
pub struct SimPwmState {
    period: u32,
    frequency_hz: u32,
    duty: AtomicU32,
    writes: AtomicUsize,
}

impl SimPwmState {
    pub fn duty(&self) -> u32 {
        self.duty.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }
}

struct SimPwm(Arc<SimPwmState>);

impl PwmPort for SimPwm {
    fn period(&self) -> u32 {
        self.0.period
    }

    fn set_duty(&self, duty: u32) {
        self.0.duty.store(duty, Ordering::Relaxed);
        self.0.writes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Provider that fabricates a port for every requested binding and keeps a
/// shared handle for inspection.
pub struct SimOutputProvider {
    period: u32,
    pins: HashMap<String, Arc<SimPinState>>,
    pwms: HashMap<String, Arc<SimPwmState>>,
}

impl SimOutputProvider {
    /// All PWM ports report the given duty period.
    pub fn with_period(period: u32) -> Self {
        Self {
            period,
            pins: HashMap::new(),
            pwms: HashMap::new(),
        }
    }

    /// Inspection handle for a claimed digital pin. Panics on unknown
    /// names; tests claim before they inspect.
    pub fn pin(&self, name: &str) -> &SimPinState {
        &self.pins[name]
    }

    pub fn pwm(&self, name: &str) -> &SimPwmState {
        &self.pwms[name]
    }
}

impl Default for SimOutputProvider {
    fn default() -> Self {
        Self::with_period(1 << 13)
    }
}

impl OutputProvider for SimOutputProvider {
    fn claim_digital(&mut self, name: &str) -> Option<Box<dyn DigitalPort>> {
        let state = self
            .pins
            .entry(name.to_owned())
            .or_insert_with(Arc::default)
            .clone();
        Some(Box::new(SimDigital(state)))
    }

    fn claim_pwm(&mut self, name: &str, frequency_hz: u32) -> Option<Box<dyn PwmPort>> {
        let period = self.period;
        let state = self
            .pwms
            .entry(name.to_owned())
            .or_insert_with(|| {
                Arc::new(SimPwmState {
                    period,
                    frequency_hz,
                    duty: AtomicU32::new(0),
                    writes: AtomicUsize::new(0),
                })
            })
            .clone();
        Some(Box::new(SimPwm(state)))
    }
}

/// Clock that records requested sleeps instead of waiting.
#[derive(Debug, Default)]
pub struct SimClock {
    slept_ms: AtomicU32,
}

impl SimClock {
    /// Total milliseconds requested so far.
    pub fn slept_ms(&self) -> u32 {
        self.slept_ms.load(Ordering::Relaxed)
    }
}

impl Clock for SimClock {
    fn sleep_ms(&self, ms: u32) {
        self.slept_ms.fetch_add(ms, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rapid_updates_only_given_axes() {
        let mut port = SimMotionPort::new(Arc::new(SystemState::new()));
        port.set_position([1.0, 2.0, 3.0]);
        port.rapid(false, MachineTarget::z(-5.0));
        assert_eq!(port.machine_position(), [1.0, 2.0, -5.0]);
        port.rapid(true, MachineTarget::xy(10.0, 20.0));
        assert_eq!(port.machine_position(), [10.0, 20.0, -5.0]);
    }

    #[test]
    fn failed_probe_raises_alarm() {
        let system = Arc::new(SystemState::new());
        let mut port = SimMotionPort::new(system.clone());
        port.set_probe_outcome(ProbeOutcome::NoContact);
        port.probe_down(-50.0, 300.0);
        assert_eq!(system.alarm(), ExecAlarm::ProbeFailContact);
    }

    #[test]
    fn contact_probe_latches_position() {
        let system = Arc::new(SystemState::new());
        let mut port = SimMotionPort::new(system.clone());
        port.set_position([10.0, 20.0, -10.0]);
        port.set_probe_outcome(ProbeOutcome::Contact { z: -55.0 });
        port.probe_down(-60.0, 300.0);
        assert!(!system.is_alarmed());
        assert_eq!(port.probe_position(), [10.0, 20.0, -55.0]);
    }

    #[test]
    fn provider_hands_out_shared_handles() {
        let mut provider = SimOutputProvider::default();
        let port = provider.claim_digital("gpio.5").unwrap();
        port.write_sync(true);
        assert!(provider.pin("gpio.5").level());
        assert_eq!(provider.pin("gpio.5").writes(), 1);
    }
}
