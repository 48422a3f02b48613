//! # Spindle & ATC Orchestration Unit
//!
//! Spindle speed control and automatic tool-changer (ATC) sequencing for a
//! CNC motion controller. A rack-style changer, driven by a PWM-controlled
//! spindle, sequences tool pickup, return and height calibration while
//! coordinating spin-down/spin-up timing and machine-safety invariants
//! (clamp actuation is forbidden while the spindle rotates).
//!
//! ## Components
//!
//! 1. **Speed map**: calibration table from commanded speed to device output
//! 2. **Spindle controller**: on/off/direction/output transitions + delays
//! 3. **Tool rack registry**: configuration-derived slot positions
//! 4. **Tool change orchestrator**: the ATC state machine
//!
//! ## Execution contexts
//!
//! The orchestrator and the controller's main path run synchronously on the
//! main command context. The interrupt-context fast path
//! (`SpindleController::set_speed_from_isr`) only reads the latched modal
//! state and writes the duty output: no direction change, no delay, no
//! allocation. Cross-context state is atomic; each field has a single
//! writer, so no locks are needed.
//!
//! External collaborators (motion planner, probing, pin drivers, clock) are
//! injected through the traits in [`hal`], so the full pickup/return/
//! calibrate protocol is exercised headlessly in tests.

pub mod atc;
pub mod config;
pub mod error;
pub mod hal;
pub mod spindle;
pub mod state;
pub mod unit;

pub use atc::rack::{ETS_INDEX, MANUAL_TOOL, TOOL_COUNT};
pub use error::{AtcError, ConfigError, ProbeFailKind};
pub use state::{ExecAlarm, SpindleState, SystemState};
pub use unit::SpindleUnit;
