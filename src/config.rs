// ===========================================================================
// Pipeline configuration
// ===========================================================================
use crate::error::PipelineError;
use geo_types::{Rect, coord};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Mark conflicted lines and leave them out of the high-voltage network.
    #[default]
    Flag,
    /// Resolve to the highest class present and still report the conflict.
    Highest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbstractionScope {
    #[default]
    HighVoltage,
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoltageConfig {
    /// Volts; below this a line is low voltage.
    pub medium_voltage_min: u32,
    /// Volts; at or above this a line is high voltage.
    pub high_voltage_min: u32,
    pub conflict_policy: ConflictPolicy,
}

impl Default for VoltageConfig {
    fn default() -> Self {
        Self {
            medium_voltage_min: 1_000,
            high_voltage_min: 220_000,
            conflict_policy: ConflictPolicy::Flag,
        }
    }
}

/// Tolerances and policies for every stage. Distances are in metres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub coincidence_tolerance: f64,
    pub station_overlap_fraction: f64,
    pub line_overlap_fraction: f64,
    pub line_overlap_buffer: f64,
    pub densify_spacing: f64,
    pub max_merge_deflection_deg: f64,
    pub merge_attribute_keys: Vec<String>,
    pub tag_key: String,
    pub voltage: VoltageConfig,
    pub abstraction_scope: AbstractionScope,
    pub verify_connectivity: bool,
    /// `[min_x, min_y, max_x, max_y]` limiting what is loaded from the store.
    pub region: Option<[f64; 4]>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            coincidence_tolerance: 0.1,
            station_overlap_fraction: 0.1,
            line_overlap_fraction: 0.9,
            line_overlap_buffer: 1.0,
            densify_spacing: 5.0,
            max_merge_deflection_deg: 45.0,
            merge_attribute_keys: ["power", "voltage", "circuits", "cables", "wires", "frequency"]
                .iter()
                .map(|k| k.to_string())
                .collect(),
            tag_key: "ref".to_string(),
            voltage: VoltageConfig::default(),
            abstraction_scope: AbstractionScope::HighVoltage,
            verify_connectivity: true,
            region: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_ron_str(text: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig =
            ron::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_ron_file(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_ron_str(&text)
    }

    pub fn to_ron_pretty(&self) -> Result<String, PipelineError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| PipelineError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let positive = [
            ("coincidence_tolerance", self.coincidence_tolerance),
            ("line_overlap_buffer", self.line_overlap_buffer),
            ("densify_spacing", self.densify_spacing),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(PipelineError::Config(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        let fractions = [
            ("station_overlap_fraction", self.station_overlap_fraction),
            ("line_overlap_fraction", self.line_overlap_fraction),
        ];
        for (name, value) in fractions {
            if !(value > 0.0 && value <= 1.0) {
                return Err(PipelineError::Config(format!(
                    "{} must lie in (0, 1], got {}",
                    name, value
                )));
            }
        }
        if !(0.0..=180.0).contains(&self.max_merge_deflection_deg) {
            return Err(PipelineError::Config(format!(
                "max_merge_deflection_deg must lie in [0, 180], got {}",
                self.max_merge_deflection_deg
            )));
        }
        if self.voltage.medium_voltage_min >= self.voltage.high_voltage_min {
            return Err(PipelineError::Config(
                "voltage.medium_voltage_min must be below voltage.high_voltage_min".to_string(),
            ));
        }
        if self.tag_key.is_empty() {
            return Err(PipelineError::Config("tag_key must not be empty".to_string()));
        }
        if let Some([min_x, min_y, max_x, max_y]) = self.region {
            if !(min_x < max_x && min_y < max_y) {
                return Err(PipelineError::Config(format!(
                    "region {:?} is empty",
                    [min_x, min_y, max_x, max_y]
                )));
            }
        }
        Ok(())
    }

    pub fn region_rect(&self) -> Option<Rect<f64>> {
        self.region.map(|[min_x, min_y, max_x, max_y]| {
            Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_ron_keeps_defaults() {
        let config = PipelineConfig::from_ron_str(
            "(coincidence_tolerance: 0.5, voltage: (conflict_policy: highest))",
        )
        .unwrap();
        assert_eq!(config.coincidence_tolerance, 0.5);
        assert_eq!(config.voltage.conflict_policy, ConflictPolicy::Highest);
        assert_eq!(config.voltage.high_voltage_min, 220_000);
        assert_eq!(config.tag_key, "ref");
        assert!(config.verify_connectivity);
    }

    #[test]
    fn inverted_voltage_thresholds_are_rejected() {
        let err = PipelineConfig::from_ron_str(
            "(voltage: (medium_voltage_min: 300000, high_voltage_min: 220000))",
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn printed_config_loads_back() {
        let config = PipelineConfig {
            tag_key: "name".to_string(),
            abstraction_scope: AbstractionScope::Full,
            ..Default::default()
        };
        let text = config.to_ron_pretty().unwrap();
        assert!(text.contains("tag_key: \"name\""));
        assert_eq!(PipelineConfig::from_ron_str(&text).unwrap(), config);
    }

    #[test]
    fn region_becomes_rect() {
        let config = PipelineConfig {
            region: Some([0.0, 1.0, 10.0, 11.0]),
            ..Default::default()
        };
        let rect = config.region_rect().unwrap();
        assert_eq!(rect.max(), coord! { x: 10.0, y: 11.0 });
    }
}
