//! TOML configuration loader with validation.
//!
//! Only the parameters consumed by this subsystem live here; the firmware's
//! wider configuration tree is parsed elsewhere and hands the named pin
//! bindings to an [`OutputProvider`](crate::hal::OutputProvider).
//!
//! Missing or malformed rack/toolsetter positions are not load errors: they
//! leave the ATC unready (see `ToolChanger::new`), and every tool-change
//! request then fails fast.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::spindle::speed_map::SpeedEntry;

/// The ESP-class PWM peripheral cannot represent frequencies below 1 Hz,
/// and above 20 MHz fewer than 4 duty levels remain.
const PWM_HZ_MIN: u32 = 1;
const PWM_HZ_MAX: u32 = 20_000_000;

/// Which spindle capability set to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpindleVariant {
    /// PWM speed control only.
    Pwm,
    /// PWM speed control with the rack tool changer.
    #[default]
    PwmAtc,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub spindle: SpindleSection,
    #[serde(default)]
    pub atc: AtcSection,
    #[serde(default)]
    pub axes: AxesSection,
}

/// `[spindle]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpindleSection {
    pub variant: SpindleVariant,
    /// PWM carrier frequency [Hz].
    pub pwm_hz: u32,
    pub output_pin: Option<String>,
    pub enable_pin: Option<String>,
    pub direction_pin: Option<String>,
    /// Explicit spin-up delay [ms]; 0 = proportional via the scaler.
    pub spinup_ms: u32,
    /// Explicit spin-down delay [ms]; 0 = proportional via the scaler.
    pub spindown_ms: u32,
    /// Proportional delay scaler, ms per speed unit in 16.16 fixed point.
    pub spin_delay_scaler: u32,
    /// Force the off output when disabling instead of holding the last duty.
    pub zero_speed_with_disable: bool,
    /// Calibration points; empty = default linear map (10000 rpm → 100%).
    pub speed_map: Vec<SpeedEntry>,
}

impl Default for SpindleSection {
    fn default() -> Self {
        Self {
            variant: SpindleVariant::default(),
            pwm_hz: 5000,
            output_pin: None,
            enable_pin: None,
            direction_pin: None,
            spinup_ms: 0,
            spindown_ms: 0,
            spin_delay_scaler: 0,
            zero_speed_with_disable: true,
            speed_map: Vec::new(),
        }
    }
}

/// `[atc]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AtcSection {
    pub atc_valve_pin: Option<String>,
    pub atc_dustoff_pin: Option<String>,
    pub ets_dustoff_pin: Option<String>,
    /// Toolsetter position in machine coordinates [mm], 3 values.
    pub ets_mpos_mm: Option<Vec<f64>>,
    pub tool1_mpos_mm: Option<Vec<f64>>,
    pub tool2_mpos_mm: Option<Vec<f64>>,
    pub tool3_mpos_mm: Option<Vec<f64>>,
    pub tool4_mpos_mm: Option<Vec<f64>>,
    /// Machine Z where crossing the rack is safe with an empty spindle [mm].
    pub empty_safe_z: f64,
}

/// `[axes]` section covering the Z travel parameters this subsystem needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AxesSection {
    /// Machine Z at the top of travel [mm].
    pub z_max_mpos: f64,
    /// Homing pulloff from the Z limit [mm].
    pub z_pulloff: f64,
}

impl Default for AxesSection {
    fn default() -> Self {
        Self {
            z_max_mpos: 0.0,
            z_pulloff: 1.0,
        }
    }
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
    parse_config(&raw)
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(raw: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let spindle = &config.spindle;
    if !(PWM_HZ_MIN..=PWM_HZ_MAX).contains(&spindle.pwm_hz) {
        return Err(ConfigError::Validation(format!(
            "pwm_hz {} outside [{PWM_HZ_MIN}, {PWM_HZ_MAX}]",
            spindle.pwm_hz
        )));
    }
    for pair in spindle.speed_map.windows(2) {
        if pair[1].speed <= pair[0].speed {
            return Err(ConfigError::Validation(format!(
                "speed_map entries not ascending at speed {}",
                pair[1].speed
            )));
        }
    }
    for entry in &spindle.speed_map {
        if !(0.0..=100.0).contains(&entry.percent) {
            return Err(ConfigError::Validation(format!(
                "speed_map percent out of range: {}",
                entry.percent
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [spindle]
        variant = "pwm_atc"
        pwm_hz = 5000
        output_pin = "gpio.2"
        enable_pin = "gpio.3"
        direction_pin = "gpio.4"
        spindown_ms = 3000
        speed_map = [
            { speed = 0, percent = 0.0 },
            { speed = 24000, percent = 100.0 },
        ]

        [atc]
        atc_valve_pin = "gpio.5"
        ets_mpos_mm = [10.0, 20.0, -80.0]
        tool1_mpos_mm = [50.0, 100.0, -90.0]
        tool2_mpos_mm = [70.0, 100.0, -90.0]
        tool3_mpos_mm = [90.0, 100.0, -90.0]
        tool4_mpos_mm = [110.0, 100.0, -90.0]
        empty_safe_z = -40.0

        [axes]
        z_max_mpos = 0.0
        z_pulloff = 2.0
    "#;

    #[test]
    fn parses_sample() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.spindle.variant, SpindleVariant::PwmAtc);
        assert_eq!(config.spindle.pwm_hz, 5000);
        assert_eq!(config.spindle.spindown_ms, 3000);
        assert_eq!(config.spindle.speed_map.len(), 2);
        assert_eq!(config.atc.ets_mpos_mm.as_deref(), Some(&[10.0, 20.0, -80.0][..]));
        assert_eq!(config.axes.z_pulloff, 2.0);
    }

    #[test]
    fn defaults_apply() {
        let config = parse_config("").unwrap();
        assert_eq!(config.spindle.pwm_hz, 5000);
        assert!(config.spindle.zero_speed_with_disable);
        assert!(config.spindle.speed_map.is_empty());
        assert_eq!(config.axes.z_pulloff, 1.0);
    }

    #[test]
    fn rejects_pwm_hz_out_of_bounds() {
        assert!(parse_config("[spindle]\npwm_hz = 0\n").is_err());
        assert!(parse_config("[spindle]\npwm_hz = 30000000\n").is_err());
    }

    #[test]
    fn rejects_non_ascending_speed_map() {
        let raw = r#"
            [spindle]
            speed_map = [
                { speed = 5000, percent = 50.0 },
                { speed = 1000, percent = 80.0 },
            ]
        "#;
        assert!(parse_config(raw).is_err());
    }

    #[test]
    fn rejects_percent_out_of_range() {
        let raw = r#"
            [spindle]
            speed_map = [{ speed = 0, percent = 120.0 }]
        "#;
        assert!(parse_config(raw).is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.atc.atc_valve_pin.as_deref(), Some("gpio.5"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/spindle.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
