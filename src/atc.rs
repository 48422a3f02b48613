//! Tool change orchestrator.
//!
//! Sequences rack-style automatic tool changes on top of the spindle
//! controller: tool return, pickup, manual handoffs, and toolsetter height
//! calibration, while enforcing the clamp safety gate (no clamp actuation
//! while the spindle rotates).
//!
//! Runs entirely on the main command context; every motion command is
//! either fire-and-forget into the planner queue or explicitly awaited.
//! The interrupt-context duty refresh path never touches this state.

pub mod rack;

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::{AtcSection, AxesSection};
use crate::error::{AtcError, ProbeFailKind};
use crate::hal::{ArcMove, Clock, DigitalPort, DistanceMode, MachineTarget, MotionPort, OutputProvider};
use crate::spindle::SpindleController;
use crate::state::{ExecAlarm, SpindleState, SystemState};
use rack::{ToolRack, MANUAL_TOOL, TOOL_COUNT};

/// Dwell after closing the clamp on a tool [s].
const TOOL_GRAB_TIME: f32 = 0.25;
/// Clearance in front of the rack where X travel is safe [mm].
const RACK_SAFE_DIST: f64 = 25.0;
/// Toolsetter probe feed rate [mm/min].
const PROBE_FEEDRATE: f64 = 300.0;
/// Feed rate for the rack-avoiding arc moves [mm/min].
const ARC_FEEDRATE: f64 = 4000.0;
/// Dust-off blast duration [ms].
const DUSTOFF_MS: u32 = 500;
/// Conservative coast-down wait when no spin-down delay is configured [ms].
const SPINDOWN_SAFETY_MS: u32 = 10_000;

/// Rack ATC state machine.
pub struct ToolChanger {
    rack: ToolRack,
    valve: Option<Box<dyn DigitalPort>>,
    atc_dustoff: Option<Box<dyn DigitalPort>>,
    ets_dustoff: Option<Box<dyn DigitalPort>>,
    system: Arc<SystemState>,
    clock: Arc<dyn Clock>,

    current_tool: u8,
    /// Which tool the height reference was taken on; 0 = none established.
    zeroed_tool_index: u8,
    atc_ready: bool,
    /// Machine Z for safe XY travel above everything (Z travel limit minus
    /// pulloff), computed once at init.
    top_of_z: f64,
    /// Machine Z where it is safe to cross over tools with an empty spindle.
    empty_safe_z: f64,
    /// Whether the probe cycle currently executing is the toolsetter probe.
    toolsetter_probing: bool,
}

impl ToolChanger {
    /// Build the changer from configuration. Missing or malformed rack and
    /// toolsetter positions, or an unbound clamp valve, leave the changer
    /// unready: every subsequent tool-change request fails fast.
    pub fn new(
        cfg: &AtcSection,
        axes: &AxesSection,
        provider: &mut dyn OutputProvider,
        system: Arc<SystemState>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let valve = cfg
            .atc_valve_pin
            .as_deref()
            .and_then(|name| provider.claim_digital(name));
        let atc_dustoff = cfg
            .atc_dustoff_pin
            .as_deref()
            .and_then(|name| provider.claim_digital(name));
        let ets_dustoff = cfg
            .ets_dustoff_pin
            .as_deref()
            .and_then(|name| provider.claim_digital(name));

        let mut atc_ready = true;
        if valve.is_none() {
            error!("ATC clamp valve pin must be defined");
            atc_ready = false;
        }

        let rack = match ToolRack::from_config(cfg) {
            Ok(rack) => rack,
            Err(e) => {
                error!("ATC rack positions invalid: {e}");
                atc_ready = false;
                ToolRack::default()
            }
        };

        let top_of_z = axes.z_max_mpos - axes.z_pulloff;

        if atc_ready {
            info!(
                tools = TOOL_COUNT,
                top_of_z,
                empty_safe_z = cfg.empty_safe_z,
                "ATC initialized"
            );
        }

        Self {
            rack,
            valve,
            atc_dustoff,
            ets_dustoff,
            system,
            clock,
            current_tool: 0,
            zeroed_tool_index: 1,
            atc_ready,
            top_of_z,
            empty_safe_z: cfg.empty_safe_z,
            toolsetter_probing: false,
        }
    }

    /// Tool currently held; 0 = none, `MANUAL_TOOL` = operator-held.
    #[inline]
    pub fn current_tool(&self) -> u8 {
        self.current_tool
    }

    /// Height-reference tool index.
    #[inline]
    pub fn zeroed_tool_index(&self) -> u8 {
        self.zeroed_tool_index
    }

    /// Whether initialization found all required positions and outputs.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.atc_ready
    }

    /// Safe travel height.
    #[inline]
    pub fn top_of_z(&self) -> f64 {
        self.top_of_z
    }

    /// Execute a tool change.
    ///
    /// `pre_select` is reserved for future pre-staging and is a no-op
    /// success today. Fails fast with no motion when the changer is
    /// unready or the tool index is out of range. A probe failure aborts
    /// the sequence with the system alarm raised and `current_tool` left
    /// at the picked-up, uncalibrated tool.
    pub fn tool_change(
        &mut self,
        new_tool: u8,
        pre_select: bool,
        motion: &mut dyn MotionPort,
        spindle: &SpindleController,
    ) -> Result<(), AtcError> {
        debug!(
            from = self.current_tool,
            to = new_tool,
            pre_select,
            "tool change requested"
        );

        if pre_select {
            // reserved for pre-staging support (M61)
            return Ok(());
        }
        if !self.atc_ready {
            warn!("ATC not initialized, tool change rejected");
            return Err(AtcError::NotReady);
        }
        if new_tool > MANUAL_TOOL {
            error!(tool = new_tool, "invalid tool number");
            return Err(AtcError::InvalidTool(new_tool));
        }
        if new_tool == self.current_tool {
            if self.current_tool == MANUAL_TOOL {
                // re-run the operator handoff for the held manual tool
                self.manual_handoff(motion, spindle)?;
                self.current_tool = 0;
            }
            return Ok(());
        }

        // establish a consistent position before mutating tool state
        motion.synchronize();
        let saved_mpos = motion.machine_position();

        let was_incremental = motion.distance_mode() == DistanceMode::Incremental;
        if was_incremental {
            motion.set_distance_mode(DistanceMode::Absolute);
        }

        self.goto_top_of_z(motion);

        // stop the spindle, remembering how to restore it afterwards
        let prior = spindle.state();
        let restart = prior
            .is_rotating()
            .then(|| (prior, spindle.current_speed()));
        if restart.is_some() {
            spindle.stop();
            if spindle.spindown_ms() == 0 {
                info!("no spin-down delay configured, waiting out coast-down");
                self.clock.sleep_ms(SPINDOWN_SAFETY_MS);
            }
        }

        // manual handoff branches: no rack motion
        if self.current_tool == 0 && new_tool == MANUAL_TOOL {
            info!("grab manual tool");
            self.manual_handoff(motion, spindle)?;
            self.current_tool = MANUAL_TOOL;
            return Ok(());
        }
        if self.current_tool == MANUAL_TOOL {
            info!("drop manual tool");
            self.manual_handoff(motion, spindle)?;
            if new_tool == 0 {
                self.current_tool = 0;
                return Ok(());
            }
        }

        // return the held tool, if any
        if !self.return_tool(self.current_tool, motion, spindle)? {
            // nothing to return: travel directly over the target slot
            if let Some(slot) = self.rack.slot(new_tool) {
                motion.rapid(true, MachineTarget::xy(slot.mpos[0], slot.mpos[1]));
            }
        }
        self.current_tool = 0;

        if new_tool == 0 {
            // empty spindle requested: park clear of the rack
            motion.rapid(true, MachineTarget::y(self.rack.ets().mpos[1] - RACK_SAFE_DIST));
            return Ok(());
        }

        if new_tool == MANUAL_TOOL {
            info!("grab manual tool");
            self.manual_handoff(motion, spindle)?;
            self.current_tool = MANUAL_TOOL;
            return Ok(());
        }

        // automatic pickup
        info!(tool = new_tool, "automatic tool change");
        let slot = *self
            .rack
            .slot(new_tool)
            .ok_or(AtcError::InvalidTool(new_tool))?;
        self.go_above_slot(&slot, motion);
        self.dustoff_blast(false);
        self.set_clamp(true, spindle)?;
        motion.rapid(true, MachineTarget::z(slot.mpos[2]));
        self.set_clamp(false, spindle)?;
        motion.dwell(TOOL_GRAB_TIME);
        self.goto_top_of_z(motion);
        self.current_tool = new_tool;

        info!(tool = new_tool, "probing tool length");
        self.toolsetter_calibrate(motion)?;

        // restore prior state: spindle first, then position, then modality
        if let Some((state, speed)) = restart {
            spindle.set_state(state, speed);
        }
        motion.rapid(
            false,
            MachineTarget::xyz(saved_mpos[0], saved_mpos[1], self.top_of_z),
        );
        motion.rapid(
            false,
            MachineTarget::z(saved_mpos[2] + motion.tool_length_offset()),
        );
        if was_incremental {
            motion.set_distance_mode(DistanceMode::Incremental);
        }
        Ok(())
    }

    /// Open or close the tool clamp.
    ///
    /// Safety gate: rejected outright, with no output write, unless the
    /// spindle is disabled.
    pub fn set_clamp(&self, open: bool, spindle: &SpindleController) -> Result<(), AtcError> {
        if spindle.state() != SpindleState::Disabled {
            warn!("clamp actuation rejected: spindle not disabled");
            return Err(AtcError::ClampWhileSpinning);
        }
        if let Some(valve) = &self.valve {
            valve.write_sync(open);
        }
        if open {
            info!("tool release");
        } else {
            info!("tool clamp");
        }
        Ok(())
    }

    /// Probe-cycle completion callback, invoked by the probing subsystem
    /// after every probe anywhere in the firmware.
    ///
    /// Ignored when the machine is alarmed or when the completed probe was
    /// the toolsetter probe (handled inline by the calibration step).
    /// Otherwise the currently mounted tool becomes the height reference.
    pub fn probe_notification(&mut self) {
        if self.system.is_alarmed() {
            return;
        }
        if self.toolsetter_probing {
            return;
        }
        self.zeroed_tool_index = self.current_tool;
        debug!(tool = self.zeroed_tool_index, "height reference tool set");
    }

    /// Open the clamp, block for operator acknowledgment, close the clamp.
    fn manual_handoff(
        &mut self,
        motion: &mut dyn MotionPort,
        spindle: &SpindleController,
    ) -> Result<(), AtcError> {
        self.set_clamp(true, spindle)?;
        info!("manual tool change, waiting for operator");
        motion.operator_pause();
        self.set_clamp(false, spindle)
    }

    /// Return the held tool to its rack slot.
    ///
    /// Returns `Ok(false)` when no tool is held (nothing was done). The
    /// manual sentinel has no slot; the handoff branches deal with it.
    fn return_tool(
        &mut self,
        tool: u8,
        motion: &mut dyn MotionPort,
        spindle: &SpindleController,
    ) -> Result<bool, AtcError> {
        debug!(tool, "return tool");
        if tool == 0 {
            return Ok(false);
        }
        let Some(slot) = self.rack.slot(tool).copied() else {
            return Ok(true);
        };

        self.go_above_slot(&slot, motion);
        motion.rapid(true, MachineTarget::z(slot.mpos[2]));
        self.set_clamp(true, spindle)?;
        motion.rapid(true, MachineTarget::z(self.empty_safe_z));
        self.set_clamp(false, spindle)?;
        Ok(true)
    }

    /// Travel over a rack slot. With a tool in the spindle the approach
    /// goes via the safe clearance in front of the rack; with an empty
    /// spindle it crosses at the empty-safe height.
    fn go_above_slot(&self, slot: &rack::ToolSlot, motion: &mut dyn MotionPort) {
        if self.current_tool != 0 {
            self.goto_top_of_z(motion);
            motion.rapid(
                false,
                MachineTarget::xy(slot.mpos[0], slot.mpos[1] - RACK_SAFE_DIST),
            );
        } else {
            motion.rapid(false, MachineTarget::z(self.empty_safe_z));
        }
        motion.rapid(true, MachineTarget::xy(slot.mpos[0], slot.mpos[1]));
    }

    /// Route to the toolsetter, probe the picked-up tool's length, record
    /// it and apply the length-offset delta against the reference tool.
    fn toolsetter_calibrate(&mut self, motion: &mut dyn MotionPort) -> Result<(), AtcError> {
        let ets = *self.rack.ets();

        if self.current_tool == 1 {
            // slot 1 sits next to the toolsetter: straight across
            motion.rapid(true, MachineTarget::xy(ets.mpos[0], ets.mpos[1]));
        } else {
            // arc out of the slot and back in at the toolsetter, staying
            // clear of the intervening slots
            motion.set_distance_mode(DistanceMode::Incremental);
            motion.arc(ArcMove {
                dx: -RACK_SAFE_DIST,
                dy: -RACK_SAFE_DIST,
                i: -RACK_SAFE_DIST,
                j: 0.0,
                feed: ARC_FEEDRATE,
            });
            motion.rapid(
                false,
                MachineTarget::xy(ets.mpos[0] + RACK_SAFE_DIST, ets.mpos[1] - RACK_SAFE_DIST),
            );
            motion.arc(ArcMove {
                dx: -RACK_SAFE_DIST,
                dy: RACK_SAFE_DIST,
                i: 0.0,
                j: RACK_SAFE_DIST,
                feed: ARC_FEEDRATE,
            });
            motion.set_distance_mode(DistanceMode::Absolute);
            motion.rapid(true, MachineTarget::xy(ets.mpos[0], ets.mpos[1]));
        }

        self.dustoff_blast(true);

        // probe target in work coordinates, from the active offsets
        let wco = motion.work_offset_z() + motion.tool_length_offset();
        let probe_to = ets.mpos[2] - wco;

        self.toolsetter_probing = true;
        motion.probe_down(probe_to, PROBE_FEEDRATE);
        self.toolsetter_probing = false;

        if self.system.is_alarmed() {
            let kind = match self.system.alarm() {
                ExecAlarm::ProbeFailInitial => {
                    info!("toolsetter switch already tripped");
                    ProbeFailKind::AlreadyTripped
                }
                _ => {
                    info!("no toolsetter contact, tool missing");
                    ProbeFailKind::NoContact
                }
            };
            return Err(AtcError::Probe(kind));
        }

        let probe_pos = motion.probe_position();
        self.rack.set_offset_z(self.current_tool, probe_pos[2]);

        if self.zeroed_tool_index != 0 {
            let tlo = probe_pos[2] - self.rack.offset_z(self.zeroed_tool_index);
            info!(tool = self.current_tool, tlo, "tool length offset");
            motion.apply_tool_length_offset(tlo);
        }

        self.goto_top_of_z(motion);
        motion.rapid(
            false,
            MachineTarget::xy(ets.mpos[0], ets.mpos[1] - RACK_SAFE_DIST),
        );
        Ok(())
    }

    fn goto_top_of_z(&self, motion: &mut dyn MotionPort) {
        motion.rapid(true, MachineTarget::z(self.top_of_z));
    }

    /// Blow chips off the toolsetter or the target slot, when the output
    /// is bound.
    fn dustoff_blast(&self, toolsetter: bool) {
        let port = if toolsetter {
            &self.ets_dustoff
        } else {
            &self.atc_dustoff
        };
        if let Some(port) = port {
            port.write_sync(true);
            self.clock.sleep_ms(DUSTOFF_MS);
            port.write_sync(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::simulation::{SimClock, SimOutputProvider};

    fn changer() -> ToolChanger {
        let cfg = AtcSection {
            atc_valve_pin: Some("gpio.5".into()),
            ets_mpos_mm: Some(vec![10.0, 20.0, -80.0]),
            tool1_mpos_mm: Some(vec![50.0, 100.0, -90.0]),
            tool2_mpos_mm: Some(vec![70.0, 100.0, -90.0]),
            tool3_mpos_mm: Some(vec![90.0, 100.0, -90.0]),
            tool4_mpos_mm: Some(vec![110.0, 100.0, -90.0]),
            ..AtcSection::default()
        };
        let mut provider = SimOutputProvider::default();
        ToolChanger::new(
            &cfg,
            &AxesSection::default(),
            &mut provider,
            Arc::new(SystemState::new()),
            Arc::new(SimClock::default()),
        )
    }

    #[test]
    fn toolsetter_probe_does_not_rezero() {
        let mut changer = changer();
        changer.current_tool = 3;

        // the calibration probe handles its own offset bookkeeping
        changer.toolsetter_probing = true;
        changer.probe_notification();
        assert_eq!(changer.zeroed_tool_index(), 1);

        // any other completed probe re-zeroes on the mounted tool
        changer.toolsetter_probing = false;
        changer.probe_notification();
        assert_eq!(changer.zeroed_tool_index(), 3);
    }
}
