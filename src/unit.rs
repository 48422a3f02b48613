//! Capability composition: a spindle controller with an optional tool
//! changer, selected by the configured variant.
//!
//! `tool_change` and `probe_notification` are no-ops on a variant without
//! the ATC capability.

use std::sync::Arc;

use tracing::info;

use crate::atc::ToolChanger;
use crate::config::{Config, SpindleVariant};
use crate::error::{AtcError, ConfigError};
use crate::hal::{Clock, MotionPort, OutputProvider};
use crate::spindle::SpindleController;
use crate::state::SystemState;

/// The spindle subsystem as exposed to the rest of the firmware.
pub struct SpindleUnit {
    pub controller: SpindleController,
    pub atc: Option<ToolChanger>,
}

impl SpindleUnit {
    /// Build the configured variant, claiming all output bindings.
    pub fn from_config(
        config: &Config,
        provider: &mut dyn OutputProvider,
        system: Arc<SystemState>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let controller =
            SpindleController::new(&config.spindle, provider, system.clone(), clock.clone());
        let atc = match config.spindle.variant {
            SpindleVariant::PwmAtc => Some(ToolChanger::new(
                &config.atc,
                &config.axes,
                provider,
                system,
                clock,
            )),
            SpindleVariant::Pwm => None,
        };
        info!(variant = ?config.spindle.variant, "spindle unit built");
        Self { controller, atc }
    }

    /// Finalize the speed map and reset output state. Idempotent.
    pub fn init(&mut self) -> Result<(), ConfigError> {
        self.controller.init()
    }

    /// Stop the spindle and release all outputs. Idempotent.
    pub fn deinit(&mut self) {
        self.controller.deinit();
    }

    /// Execute a tool change. A variant without the ATC capability accepts
    /// every request as a no-op.
    pub fn tool_change(
        &mut self,
        new_tool: u8,
        pre_select: bool,
        motion: &mut dyn MotionPort,
    ) -> Result<(), AtcError> {
        match &mut self.atc {
            Some(atc) => atc.tool_change(new_tool, pre_select, motion, &self.controller),
            None => Ok(()),
        }
    }

    /// Probe-cycle completion callback from the probing subsystem.
    pub fn probe_notification(&mut self) {
        if let Some(atc) = &mut self.atc {
            atc.probe_notification();
        }
    }
}
