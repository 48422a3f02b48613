//! Tool rack registry: configuration-derived machine positions for each
//! rack slot and the toolsetter.
//!
//! Built once at init; positions are immutable afterwards. Only the
//! per-slot probed Z offset is written, and only by the orchestrator after
//! a successful toolsetter probe.

use crate::config::AtcSection;
use crate::error::ConfigError;

/// Number of rack slots.
pub const TOOL_COUNT: usize = 4;

/// Registry index of the toolsetter (ETS).
pub const ETS_INDEX: u8 = 0;

/// Reserved tool index for an operator-held tool outside the rack.
pub const MANUAL_TOOL: u8 = TOOL_COUNT as u8 + 1;

/// One rack slot (or the toolsetter, at index 0).
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolSlot {
    /// Pickup location in machine coordinates [mm].
    pub mpos: [f64; 3],
    /// Probed tool length, machine Z at toolsetter contact [mm].
    pub offset_z: f64,
}

/// Fixed-size slot registry: index 0 is the toolsetter, 1..=TOOL_COUNT are
/// rack slots.
#[derive(Debug)]
pub struct ToolRack {
    slots: [ToolSlot; TOOL_COUNT + 1],
}

impl Default for ToolRack {
    fn default() -> Self {
        Self {
            slots: [ToolSlot::default(); TOOL_COUNT + 1],
        }
    }
}

impl ToolRack {
    /// Build the registry from configuration.
    ///
    /// Fails when the toolsetter position or any rack slot position is
    /// missing or not a 3-element vector; the caller leaves the ATC
    /// unready in that case.
    pub fn from_config(cfg: &AtcSection) -> Result<Self, ConfigError> {
        let mut slots = [ToolSlot::default(); TOOL_COUNT + 1];

        slots[ETS_INDEX as usize].mpos = position(cfg.ets_mpos_mm.as_deref(), "ets_mpos_mm")?;

        let tools = [
            (&cfg.tool1_mpos_mm, "tool1_mpos_mm"),
            (&cfg.tool2_mpos_mm, "tool2_mpos_mm"),
            (&cfg.tool3_mpos_mm, "tool3_mpos_mm"),
            (&cfg.tool4_mpos_mm, "tool4_mpos_mm"),
        ];
        for (i, (mpos, name)) in tools.iter().enumerate() {
            slots[i + 1].mpos = position(mpos.as_deref(), name)?;
        }

        Ok(Self { slots })
    }

    /// Slot for a tool index; `None` for the manual sentinel and anything
    /// else outside the registry.
    pub fn slot(&self, tool: u8) -> Option<&ToolSlot> {
        self.slots.get(tool as usize)
    }

    /// The toolsetter slot.
    pub fn ets(&self) -> &ToolSlot {
        &self.slots[ETS_INDEX as usize]
    }

    /// Record a probed tool length for a slot. Out-of-range indices are
    /// ignored.
    pub fn set_offset_z(&mut self, tool: u8, z: f64) {
        if let Some(slot) = self.slots.get_mut(tool as usize) {
            slot.offset_z = z;
        }
    }

    /// Probed tool length of a slot, 0.0 when never probed.
    pub fn offset_z(&self, tool: u8) -> f64 {
        self.slot(tool).map_or(0.0, |s| s.offset_z)
    }
}

fn position(mpos: Option<&[f64]>, name: &str) -> Result<[f64; 3], ConfigError> {
    match mpos {
        Some([x, y, z]) => Ok([*x, *y, *z]),
        Some(other) => Err(ConfigError::Validation(format!(
            "{name} must have 3 coordinates, got {}",
            other.len()
        ))),
        None => Err(ConfigError::Validation(format!("{name} is required"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AtcSection;

    fn full_section() -> AtcSection {
        AtcSection {
            ets_mpos_mm: Some(vec![10.0, 20.0, -80.0]),
            tool1_mpos_mm: Some(vec![50.0, 100.0, -90.0]),
            tool2_mpos_mm: Some(vec![70.0, 100.0, -90.0]),
            tool3_mpos_mm: Some(vec![90.0, 100.0, -90.0]),
            tool4_mpos_mm: Some(vec![110.0, 100.0, -90.0]),
            ..AtcSection::default()
        }
    }

    #[test]
    fn builds_from_full_config() {
        let rack = ToolRack::from_config(&full_section()).unwrap();
        assert_eq!(rack.ets().mpos, [10.0, 20.0, -80.0]);
        assert_eq!(rack.slot(2).unwrap().mpos, [70.0, 100.0, -90.0]);
        assert!(rack.slot(MANUAL_TOOL).is_none());
    }

    #[test]
    fn missing_ets_position_fails() {
        let mut cfg = full_section();
        cfg.ets_mpos_mm = None;
        assert!(ToolRack::from_config(&cfg).is_err());
    }

    #[test]
    fn malformed_tool_position_fails() {
        let mut cfg = full_section();
        cfg.tool3_mpos_mm = Some(vec![1.0, 2.0]);
        assert!(ToolRack::from_config(&cfg).is_err());
    }

    #[test]
    fn offsets_default_to_zero_and_record() {
        let mut rack = ToolRack::from_config(&full_section()).unwrap();
        assert_eq!(rack.offset_z(1), 0.0);
        rack.set_offset_z(1, -55.25);
        assert_eq!(rack.offset_z(1), -55.25);
        // manual sentinel is silently ignored
        rack.set_offset_z(MANUAL_TOOL, -1.0);
        assert_eq!(rack.offset_z(MANUAL_TOOL), 0.0);
    }
}
