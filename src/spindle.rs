//! Spindle state controller.
//!
//! Owns the speed map and the enable/direction/duty output ports, and
//! manages on/off/direction transitions with spin-up/spin-down timing.
//!
//! Two entry points exist. `set_state` runs on the main command context and
//! may block for the configured spin delay. `set_speed_from_isr` is the
//! interrupt-context fast path: it re-asserts the enable line from the
//! latched modal state and writes the duty value, with no direction change,
//! no delay, no allocation and no logging. All mutable state is atomic, so
//! both paths take `&self` and may run concurrently.

pub mod speed_map;

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::SpindleSection;
use crate::error::ConfigError;
use crate::hal::{Clock, DigitalPort, OutputProvider, PwmPort};
use crate::state::{SpindleState, SystemState};
use speed_map::SpeedMap;

/// Device range used when no PWM port is bound, so the speed map still
/// resolves commanded speeds for observability.
const FALLBACK_DEVICE_MAX: u32 = 1 << 13;

/// Spindle on/off/direction/output controller.
pub struct SpindleController {
    speed_map: SpeedMap,
    pwm: Option<Box<dyn PwmPort>>,
    enable: Option<Box<dyn DigitalPort>>,
    direction: Option<Box<dyn DigitalPort>>,
    system: Arc<SystemState>,
    clock: Arc<dyn Clock>,

    spinup_ms: u32,
    spindown_ms: u32,
    /// Proportional delay scaler, ms per speed unit in 16.16 fixed point:
    /// delay_ms = Δspeed * scaler >> 16. Used when the explicit delay is 0.
    spin_delay_scaler: u32,
    zero_speed_with_disable: bool,
    is_reversable: bool,

    // cross-context latched state
    state: AtomicU8,
    current_speed: AtomicU32,
    current_duty: AtomicU32,
}

impl SpindleController {
    /// Claim output ports per the configured bindings. The controller is
    /// not usable until [`init`](Self::init) has run.
    pub fn new(
        cfg: &SpindleSection,
        provider: &mut dyn OutputProvider,
        system: Arc<SystemState>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let pwm = cfg
            .output_pin
            .as_deref()
            .and_then(|name| provider.claim_pwm(name, cfg.pwm_hz));
        let enable = cfg
            .enable_pin
            .as_deref()
            .and_then(|name| provider.claim_digital(name));
        let direction = cfg
            .direction_pin
            .as_deref()
            .and_then(|name| provider.claim_digital(name));

        Self {
            speed_map: SpeedMap::from_entries(&cfg.speed_map),
            is_reversable: direction.is_some(),
            pwm,
            enable,
            direction,
            system,
            clock,
            spinup_ms: cfg.spinup_ms,
            spindown_ms: cfg.spindown_ms,
            spin_delay_scaler: cfg.spin_delay_scaler,
            zero_speed_with_disable: cfg.zero_speed_with_disable,
            state: AtomicU8::new(SpindleState::Unknown as u8),
            current_speed: AtomicU32::new(0),
            current_duty: AtomicU32::new(0),
        }
    }

    /// Finalize the speed map against the device range and reset the
    /// latched output state. Idempotent; also runs when settings change.
    pub fn init(&mut self) -> Result<(), ConfigError> {
        if self.pwm.is_none() {
            error!("spindle output pin not defined");
        }
        let device_max = self.pwm.as_ref().map_or(FALLBACK_DEVICE_MAX, |p| p.period());

        if self.speed_map.is_empty() {
            // default map: linear from 0=0% to 10000=100%
            self.speed_map = SpeedMap::linear(10_000, 100.0);
        }
        self.speed_map.finalize(device_max)?;

        self.state
            .store(SpindleState::Disabled as u8, Ordering::Relaxed);
        self.current_duty.store(0, Ordering::Relaxed);
        self.current_speed.store(0, Ordering::Relaxed);

        self.config_message(device_max);
        Ok(())
    }

    /// Stop the spindle and release all output ports to an inert state.
    pub fn deinit(&mut self) {
        self.stop();
        self.set_output(self.speed_map.off_output());
        self.set_enable(false);
        self.pwm = None;
        self.enable = None;
        self.direction = None;
    }

    fn config_message(&self, device_max: u32) {
        info!(
            reversable = self.is_reversable,
            device_max,
            max_speed = self.speed_map.max_speed(),
            "spindle configured"
        );
    }

    /// Latched rotation state.
    #[inline]
    pub fn state(&self) -> SpindleState {
        SpindleState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Last commanded speed [rpm].
    #[inline]
    pub fn current_speed(&self) -> u32 {
        self.current_speed.load(Ordering::Relaxed)
    }

    /// Configured explicit spin-down delay [ms].
    #[inline]
    pub fn spindown_ms(&self) -> u32 {
        self.spindown_ms
    }

    /// Request a spindle state transition.
    ///
    /// No-op while a system abort is asserted. The commanded speed is
    /// always resolved through the speed map (the resolved value is the
    /// externally observable commanded speed). Duty is applied before the
    /// enable line (level-shifter boards sample duty at enable time), and
    /// duty writes are debounced against the last applied value. Callers
    /// must stop rotation before requesting a direction change; this
    /// method does not re-sequence an unsafe flip.
    pub fn set_state(&self, state: SpindleState, speed: u32) {
        if self.system.abort() {
            return;
        }

        if self.pwm.is_none() {
            warn!("spindle output pin not defined");
        }

        let mut dev_speed = self.speed_map.map_speed(speed);
        let prev_state = self.state();
        let prev_speed = self.current_speed();

        if state == SpindleState::Disabled {
            if self.zero_speed_with_disable {
                dev_speed = self.speed_map.off_output();
            }
        } else {
            self.set_direction(state == SpindleState::Clockwise);
        }

        self.set_output(dev_speed);
        self.set_enable(state != SpindleState::Disabled);

        self.state.store(state as u8, Ordering::Relaxed);
        self.current_speed.store(speed, Ordering::Relaxed);

        self.spin_delay(prev_state, prev_speed, state, speed);
    }

    /// Stop the spindle (applies the configured spin-down delay).
    pub fn stop(&self) {
        self.set_state(SpindleState::Disabled, 0);
    }

    /// Interrupt-context duty refresh.
    ///
    /// Re-asserts the enable line from the latched modal state and writes
    /// the output value directly. No direction resolve, no delay, no
    /// allocation, no logging. Safe to invoke preemptively against
    /// `set_state`.
    pub fn set_speed_from_isr(&self, dev_speed: u32) {
        self.set_enable(self.state() != SpindleState::Disabled);
        self.set_output(dev_speed);
    }

    /// Debounced duty write. Interrupt-safe; a missing PWM port is a
    /// silent no-op.
    fn set_output(&self, duty: u32) {
        let Some(pwm) = &self.pwm else {
            return;
        };
        if self.current_duty.swap(duty, Ordering::Relaxed) == duty {
            return;
        }
        pwm.set_duty(duty);
    }

    fn set_enable(&self, on: bool) {
        if let Some(enable) = &self.enable {
            enable.write_sync(on);
        }
    }

    fn set_direction(&self, clockwise: bool) {
        if let Some(direction) = &self.direction {
            direction.write_sync(clockwise);
        }
    }

    /// Block for the spin-up/spin-down time of this transition.
    ///
    /// Explicit millisecond delays take precedence; otherwise the delay is
    /// proportional to the speed change: Δspeed * scaler >> 16.
    fn spin_delay(&self, prev_state: SpindleState, prev_speed: u32, state: SpindleState, speed: u32) {
        if prev_state == state && prev_speed == speed {
            return;
        }

        let spinning_up = speed > prev_speed;
        let explicit = if spinning_up {
            self.spinup_ms
        } else {
            self.spindown_ms
        };
        let ms = if explicit != 0 {
            explicit
        } else {
            let delta = speed.abs_diff(prev_speed);
            ((u64::from(delta) * u64::from(self.spin_delay_scaler)) >> 16) as u32
        };

        if ms > 0 {
            debug!(ms, ?state, speed, "spin delay");
            self.clock.sleep_ms(ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::simulation::{SimClock, SimOutputProvider};

    fn test_section() -> SpindleSection {
        SpindleSection {
            output_pin: Some("gpio.2".into()),
            enable_pin: Some("gpio.3".into()),
            direction_pin: Some("gpio.4".into()),
            ..SpindleSection::default()
        }
    }

    fn build(cfg: &SpindleSection) -> (SpindleController, SimOutputProvider, Arc<SimClock>) {
        let mut provider = SimOutputProvider::with_period(8192);
        let system = Arc::new(SystemState::new());
        let clock = Arc::new(SimClock::default());
        let mut controller =
            SpindleController::new(cfg, &mut provider, system, clock.clone());
        controller.init().unwrap();
        (controller, provider, clock)
    }

    #[test]
    fn init_installs_default_linear_map() {
        let (controller, provider, _) = build(&test_section());
        assert_eq!(controller.state(), SpindleState::Disabled);
        controller.set_state(SpindleState::Clockwise, 5000);
        assert_eq!(provider.pwm("gpio.2").duty(), 4096);
        assert_eq!(controller.current_speed(), 5000);
    }

    #[test]
    fn duty_applies_before_enable_and_direction_set() {
        let (controller, provider, _) = build(&test_section());
        controller.set_state(SpindleState::Clockwise, 10_000);
        assert!(provider.pin("gpio.3").level());
        assert!(provider.pin("gpio.4").level());
        controller.set_state(SpindleState::Disabled, 0);
        controller.set_state(SpindleState::CounterClockwise, 10_000);
        assert!(!provider.pin("gpio.4").level());
    }

    #[test]
    fn duty_writes_are_debounced() {
        let (controller, provider, _) = build(&test_section());
        controller.set_state(SpindleState::Clockwise, 5000);
        let writes = provider.pwm("gpio.2").writes();
        controller.set_state(SpindleState::Clockwise, 5000);
        assert_eq!(provider.pwm("gpio.2").writes(), writes);
        controller.set_state(SpindleState::Clockwise, 6000);
        assert_eq!(provider.pwm("gpio.2").writes(), writes + 1);
    }

    #[test]
    fn abort_suppresses_transition() {
        let cfg = test_section();
        let mut provider = SimOutputProvider::with_period(8192);
        let system = Arc::new(SystemState::new());
        let clock = Arc::new(SimClock::default());
        let mut controller = SpindleController::new(
            &cfg,
            &mut provider,
            system.clone(),
            clock,
        );
        controller.init().unwrap();

        system.set_abort(true);
        controller.set_state(SpindleState::Clockwise, 5000);
        assert_eq!(controller.state(), SpindleState::Disabled);
        assert_eq!(controller.current_speed(), 0);
        assert!(!provider.pin("gpio.3").level());
    }

    #[test]
    fn disable_zeroes_output_by_policy() {
        let (controller, provider, _) = build(&test_section());
        controller.set_state(SpindleState::Clockwise, 10_000);
        assert_eq!(provider.pwm("gpio.2").duty(), 8192);
        controller.set_state(SpindleState::Disabled, 10_000);
        assert_eq!(provider.pwm("gpio.2").duty(), 0);
        // speed still resolved and latched for observability
        assert_eq!(controller.current_speed(), 10_000);

        let mut keep = test_section();
        keep.zero_speed_with_disable = false;
        let (controller, provider, _) = build(&keep);
        controller.set_state(SpindleState::Clockwise, 10_000);
        controller.set_state(SpindleState::Disabled, 10_000);
        assert_eq!(provider.pwm("gpio.2").duty(), 8192);
        assert!(!provider.pin("gpio.3").level());
    }

    #[test]
    fn explicit_delays_take_precedence() {
        let mut cfg = test_section();
        cfg.spinup_ms = 1500;
        cfg.spindown_ms = 2500;
        cfg.spin_delay_scaler = 1 << 16;
        let (controller, _, clock) = build(&cfg);

        controller.set_state(SpindleState::Clockwise, 5000);
        assert_eq!(clock.slept_ms(), 1500);
        controller.stop();
        assert_eq!(clock.slept_ms(), 4000);
    }

    #[test]
    fn proportional_delay_from_scaler() {
        let mut cfg = test_section();
        // 16.16 fixed point: half a millisecond per speed unit
        cfg.spin_delay_scaler = 1 << 15;
        let (controller, _, clock) = build(&cfg);

        controller.set_state(SpindleState::Clockwise, 4000);
        assert_eq!(clock.slept_ms(), 2000);
        controller.set_state(SpindleState::Clockwise, 5000);
        assert_eq!(clock.slept_ms(), 2500);
    }

    #[test]
    fn repeated_state_and_speed_skips_delay() {
        let mut cfg = test_section();
        cfg.spinup_ms = 1000;
        let (controller, _, clock) = build(&cfg);
        controller.set_state(SpindleState::Clockwise, 5000);
        controller.set_state(SpindleState::Clockwise, 5000);
        assert_eq!(clock.slept_ms(), 1000);
    }

    #[test]
    fn isr_path_reasserts_latched_state() {
        let (controller, provider, clock) = build(&test_section());
        controller.set_state(SpindleState::Clockwise, 5000);
        let slept = clock.slept_ms();

        controller.set_speed_from_isr(1234);
        assert_eq!(provider.pwm("gpio.2").duty(), 1234);
        assert!(provider.pin("gpio.3").level());
        assert_eq!(controller.state(), SpindleState::Clockwise);
        // fast path never blocks
        assert_eq!(clock.slept_ms(), slept);

        controller.stop();
        controller.set_speed_from_isr(1234);
        assert!(!provider.pin("gpio.3").level());
    }

    #[test]
    fn missing_ports_are_noop_writes() {
        let cfg = SpindleSection::default();
        let mut provider = SimOutputProvider::with_period(8192);
        let system = Arc::new(SystemState::new());
        let clock = Arc::new(SimClock::default());
        let mut controller =
            SpindleController::new(&cfg, &mut provider, system, clock);
        controller.init().unwrap();
        // no ports bound; nothing to assert beyond "does not panic"
        controller.set_state(SpindleState::Clockwise, 5000);
        controller.set_speed_from_isr(100);
        controller.deinit();
    }

    #[test]
    fn deinit_stops_and_releases() {
        let (mut controller, provider, _) = build(&test_section());
        controller.set_state(SpindleState::Clockwise, 10_000);
        controller.deinit();
        assert_eq!(controller.state(), SpindleState::Disabled);
        assert_eq!(provider.pwm("gpio.2").duty(), 0);
        assert!(!provider.pin("gpio.3").level());
    }
}
