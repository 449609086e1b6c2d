use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Engine-wide configuration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavAdjustConfig {
    /// Crossing detection settings
    #[serde(default)]
    pub detector: DetectorConfig,
    /// Misfit grid search settings
    #[serde(default)]
    pub misfit: MisfitConfig,
    /// Inversion solver settings
    #[serde(default)]
    pub solver: SolverConfig,
}

/// Crossing detection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Emit a progress line every this many new crossings
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,
}

/// Misfit volume configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MisfitConfig {
    /// Bathymetry grid size (cells per side), independent of physical extent
    #[serde(default = "default_grid_dim")]
    pub grid_dim: usize,
    /// Default lateral search half-width (cells)
    #[serde(default = "default_search_half_width")]
    pub search_half_width: usize,
    /// Number of z levels in the misfit volume
    #[serde(default = "default_z_levels")]
    pub z_levels: usize,
    /// Total z span covered by the z levels (meters)
    #[serde(default = "default_z_offset_width")]
    pub z_offset_width: f64,
    /// Center the z levels on zero instead of the trial z offset
    #[serde(default)]
    pub auto_center_z: bool,
    /// Initial minimum overlapping cell count for a misfit sample
    #[serde(default = "default_sample_threshold")]
    pub sample_threshold: usize,
    /// Misfit multiple bounding the uncertainty ellipsoid
    #[serde(default = "default_ellipsoid_misfit_factor")]
    pub ellipsoid_misfit_factor: f64,
    /// Minimum |cos| between a sample direction and an ellipsoid axis
    #[serde(default = "default_alignment_cos")]
    pub alignment_cos: f64,
    /// Number of severity classes in the equalized table
    #[serde(default = "default_severity_levels")]
    pub severity_levels: usize,
}

/// Inversion configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Iteration cap of the per-point relaxation
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Stop once the 2-norm of one pass's perturbation update (meters,
    /// over all unknowns) divided by the initial misfit drops below this.
    /// The update norm bounds the change in the perturbation norm, so the
    /// test is never looser than comparing successive norms.
    #[serde(default = "default_convergence_epsilon")]
    pub convergence_epsilon: f64,
    /// Iteration cap of the block estimate
    #[serde(default = "default_block_max_iterations")]
    pub block_max_iterations: usize,
    /// Analyzed crossings required unless every true crossing is analyzed
    #[serde(default = "default_min_analyzed_crossings")]
    pub min_analyzed_crossings: usize,
    /// Emit a progress line every this many iterations
    #[serde(default = "default_progress_interval_iterations")]
    pub progress_interval: usize,
}

fn default_progress_interval() -> usize {
    100
}

fn default_grid_dim() -> usize {
    61
}

fn default_search_half_width() -> usize {
    15
}

fn default_z_levels() -> usize {
    51
}

fn default_z_offset_width() -> f64 {
    5.0
}

fn default_sample_threshold() -> usize {
    100
}

fn default_ellipsoid_misfit_factor() -> f64 {
    3.0
}

fn default_alignment_cos() -> f64 {
    0.8
}

fn default_severity_levels() -> usize {
    10
}

fn default_max_iterations() -> usize {
    500
}

fn default_convergence_epsilon() -> f64 {
    1e-4
}

fn default_block_max_iterations() -> usize {
    200
}

fn default_min_analyzed_crossings() -> usize {
    crate::core::MIN_ANALYZED_CROSSINGS
}

fn default_progress_interval_iterations() -> usize {
    25
}

impl Default for NavAdjustConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            misfit: MisfitConfig::default(),
            solver: SolverConfig::default(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            progress_interval: default_progress_interval(),
        }
    }
}

impl Default for MisfitConfig {
    fn default() -> Self {
        Self {
            grid_dim: default_grid_dim(),
            search_half_width: default_search_half_width(),
            z_levels: default_z_levels(),
            z_offset_width: default_z_offset_width(),
            auto_center_z: false,
            sample_threshold: default_sample_threshold(),
            ellipsoid_misfit_factor: default_ellipsoid_misfit_factor(),
            alignment_cos: default_alignment_cos(),
            severity_levels: default_severity_levels(),
        }
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            convergence_epsilon: default_convergence_epsilon(),
            block_max_iterations: default_block_max_iterations(),
            min_analyzed_crossings: default_min_analyzed_crossings(),
            progress_interval: default_progress_interval_iterations(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Invalid parameter value
    #[error("Invalid {parameter} = {value}: {reason}")]
    InvalidParameter {
        parameter: String,
        value: String,
        reason: String,
    },
    /// Configuration file I/O error
    #[error("Config I/O error: {message}")]
    IoError { message: String },
    /// JSON serialization/deserialization error
    #[error("Config serialization error: {message}")]
    SerializationError { message: String },
}

impl ConfigError {
    fn invalid(parameter: &str, value: impl ToString, reason: &str) -> Self {
        ConfigError::InvalidParameter {
            parameter: parameter.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Configuration validation result
#[derive(Debug)]
pub struct ValidationResult {
    /// Whether configuration is valid
    pub is_valid: bool,
    /// Validation errors
    pub errors: Vec<ConfigError>,
    /// Validation warnings
    pub warnings: Vec<String>,
}

/// Configuration manager with validated runtime updates and JSON persistence
pub struct ConfigurationManager {
    /// Current configuration
    config: NavAdjustConfig,
    /// Configuration file path
    config_file_path: Option<String>,
    /// Whether configuration has been modified
    is_modified: bool,
}

impl Default for ConfigurationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationManager {
    /// Create a new configuration manager with default settings
    pub fn new() -> Self {
        Self {
            config: NavAdjustConfig::default(),
            config_file_path: None,
            is_modified: false,
        }
    }

    /// Create configuration manager and load from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut manager = Self::new();
        manager.load_from_file(path)?;
        Ok(manager)
    }

    /// Get current configuration
    pub fn get_config(&self) -> &NavAdjustConfig {
        &self.config
    }

    /// Replace the configuration after validation
    pub fn update_config(&mut self, config: NavAdjustConfig) -> Result<(), ConfigError> {
        let validation = Self::validate_config(&config);
        if let Some(err) = validation.errors.into_iter().next() {
            return Err(err);
        }
        self.config = config;
        self.is_modified = true;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            message: format!("Failed to read config file '{}': {}", path_str, e),
        })?;

        let config: NavAdjustConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::SerializationError {
                message: format!("Failed to parse config file '{}': {}", path_str, e),
            })?;

        let validation = Self::validate_config(&config);
        for warning in &validation.warnings {
            log::warn!("{}: {}", path_str, warning);
        }
        if let Some(err) = validation.errors.into_iter().next() {
            return Err(err);
        }

        self.config = config;
        self.config_file_path = Some(path_str);
        self.is_modified = false;
        Ok(())
    }

    /// Save configuration to JSON file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content =
            serde_json::to_string_pretty(&self.config).map_err(|e| ConfigError::SerializationError {
                message: format!("Failed to serialize config: {}", e),
            })?;

        fs::write(&path, content).map_err(|e| ConfigError::IoError {
            message: format!("Failed to write config file '{}': {}", path_str, e),
        })?;

        self.config_file_path = Some(path_str);
        self.is_modified = false;
        Ok(())
    }

    /// Save to the currently loaded file path
    pub fn save(&mut self) -> Result<(), ConfigError> {
        if let Some(path) = self.config_file_path.clone() {
            self.save_to_file(path)
        } else {
            Err(ConfigError::IoError {
                message: "No file path set for saving configuration".to_string(),
            })
        }
    }

    /// Check if configuration has been modified since last save
    pub fn is_modified(&self) -> bool {
        self.is_modified
    }

    // Runtime Parameter Adjustment Methods

    /// Update the relaxation iteration cap
    pub fn set_max_iterations(&mut self, iterations: usize) -> Result<usize, ConfigError> {
        if iterations == 0 {
            return Err(ConfigError::invalid(
                "solver.max_iterations",
                iterations,
                "At least one relaxation pass is required",
            ));
        }
        let old_value = self.config.solver.max_iterations;
        self.config.solver.max_iterations = iterations;
        self.is_modified = true;
        Ok(old_value)
    }

    /// Update the convergence ratio
    pub fn set_convergence_epsilon(&mut self, epsilon: f64) -> Result<f64, ConfigError> {
        if !(epsilon > 0.0 && epsilon < 1.0) {
            return Err(ConfigError::invalid(
                "solver.convergence_epsilon",
                epsilon,
                "Convergence ratio must lie in (0, 1)",
            ));
        }
        let old_value = self.config.solver.convergence_epsilon;
        self.config.solver.convergence_epsilon = epsilon;
        self.is_modified = true;
        Ok(old_value)
    }

    /// Update the z span of the misfit volume
    pub fn set_z_offset_width(&mut self, width_m: f64) -> Result<f64, ConfigError> {
        if !(width_m > 0.0) {
            return Err(ConfigError::invalid(
                "misfit.z_offset_width",
                width_m,
                "Z offset width must be positive",
            ));
        }
        let old_value = self.config.misfit.z_offset_width;
        self.config.misfit.z_offset_width = width_m;
        self.is_modified = true;
        Ok(old_value)
    }

    /// Toggle z auto-centering of the misfit volume
    pub fn set_auto_center_z(&mut self, enabled: bool) -> bool {
        let old_value = self.config.misfit.auto_center_z;
        self.config.misfit.auto_center_z = enabled;
        self.is_modified = true;
        old_value
    }

    /// Update the default lateral search half-width
    pub fn set_search_half_width(&mut self, cells: usize) -> Result<usize, ConfigError> {
        if cells == 0 || cells >= self.config.misfit.grid_dim {
            return Err(ConfigError::invalid(
                "misfit.search_half_width",
                cells,
                "Search half-width must be between 1 and the grid size",
            ));
        }
        let old_value = self.config.misfit.search_half_width;
        self.config.misfit.search_half_width = cells;
        self.is_modified = true;
        Ok(old_value)
    }

    /// Validate a configuration without applying it
    pub fn validate_config(config: &NavAdjustConfig) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let misfit = &config.misfit;
        if misfit.grid_dim < 3 {
            errors.push(ConfigError::invalid("misfit.grid_dim", misfit.grid_dim, "Grid needs at least 3 cells per side"));
        }
        if misfit.search_half_width == 0 || misfit.search_half_width >= misfit.grid_dim {
            errors.push(ConfigError::invalid(
                "misfit.search_half_width",
                misfit.search_half_width,
                "Search half-width must be between 1 and the grid size",
            ));
        }
        if misfit.z_levels == 0 {
            errors.push(ConfigError::invalid("misfit.z_levels", misfit.z_levels, "At least one z level is required"));
        } else if misfit.z_levels % 2 == 0 {
            warnings.push("Even z level count: the trial z is not sampled exactly".to_string());
        }
        if !(misfit.z_offset_width >= 0.0) {
            errors.push(ConfigError::invalid("misfit.z_offset_width", misfit.z_offset_width, "Z offset width must not be negative"));
        }
        if misfit.sample_threshold == 0 {
            errors.push(ConfigError::invalid("misfit.sample_threshold", misfit.sample_threshold, "Threshold must be at least 1"));
        }
        if !(misfit.ellipsoid_misfit_factor > 1.0) {
            errors.push(ConfigError::invalid(
                "misfit.ellipsoid_misfit_factor",
                misfit.ellipsoid_misfit_factor,
                "Ellipsoid bound must exceed the minimum misfit",
            ));
        }
        if !(misfit.alignment_cos > 0.0 && misfit.alignment_cos < 1.0) {
            errors.push(ConfigError::invalid("misfit.alignment_cos", misfit.alignment_cos, "Alignment cosine must lie in (0, 1)"));
        }
        if misfit.severity_levels == 0 {
            errors.push(ConfigError::invalid("misfit.severity_levels", misfit.severity_levels, "At least one severity level is required"));
        }

        let solver = &config.solver;
        if solver.max_iterations == 0 {
            errors.push(ConfigError::invalid("solver.max_iterations", solver.max_iterations, "At least one relaxation pass is required"));
        }
        if !(solver.convergence_epsilon > 0.0 && solver.convergence_epsilon < 1.0) {
            errors.push(ConfigError::invalid(
                "solver.convergence_epsilon",
                solver.convergence_epsilon,
                "Convergence ratio must lie in (0, 1)",
            ));
        }
        if solver.block_max_iterations == 0 {
            errors.push(ConfigError::invalid("solver.block_max_iterations", solver.block_max_iterations, "At least one block pass is required"));
        }
        if solver.min_analyzed_crossings < crate::core::MIN_ANALYZED_CROSSINGS {
            warnings.push(format!(
                "Inversions allowed with fewer than {} analyzed crossings",
                crate::core::MIN_ANALYZED_CROSSINGS
            ));
        }
        if config.detector.progress_interval == 0 || solver.progress_interval == 0 {
            errors.push(ConfigError::invalid("progress_interval", 0, "Progress interval must be at least 1"));
        }

        ValidationResult {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = NavAdjustConfig::default();
        let result = ConfigurationManager::validate_config(&config);
        assert!(result.is_valid);
        assert!(result.errors.is_empty());
        assert_eq!(config.misfit.alignment_cos, 0.8);
        assert_eq!(config.solver.min_analyzed_crossings, 10);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = NavAdjustConfig::default();
        config.misfit.search_half_width = 0;
        config.solver.convergence_epsilon = 2.0;
        let result = ConfigurationManager::validate_config(&config);
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 2);

        let mut manager = ConfigurationManager::new();
        assert!(manager.update_config(config).is_err());
        assert!(!manager.is_modified());
    }

    #[test]
    fn test_config_serialization() {
        let mut manager = ConfigurationManager::new();
        manager.set_max_iterations(42).unwrap();

        let temp_path = std::env::temp_dir().join("navadjust_test_config.json");
        manager.save_to_file(&temp_path).unwrap();
        let loaded = ConfigurationManager::from_file(&temp_path).unwrap();
        assert_eq!(loaded.get_config().solver.max_iterations, 42);
        assert!(!loaded.is_modified());

        let _ = fs::remove_file(temp_path);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: NavAdjustConfig =
            serde_json::from_str(r#"{"misfit": {"z_offset_width": 12.0}}"#).unwrap();
        assert_eq!(config.misfit.z_offset_width, 12.0);
        assert_eq!(config.misfit.grid_dim, 61);
        assert_eq!(config.solver, SolverConfig::default());
    }

    #[test]
    fn test_runtime_adjustment() {
        let mut manager = ConfigurationManager::new();
        let old = manager.set_convergence_epsilon(1e-3).unwrap();
        assert_eq!(old, 1e-4);
        assert!(manager.is_modified());
        assert!(manager.set_convergence_epsilon(0.0).is_err());
        assert!(manager.set_z_offset_width(-1.0).is_err());
        assert!(manager.set_search_half_width(100).is_err());
        assert!(!manager.set_auto_center_z(true));
        assert!(manager.get_config().misfit.auto_center_z);
    }

    #[test]
    fn test_save_without_path_fails() {
        let mut manager = ConfigurationManager::new();
        assert!(matches!(manager.save(), Err(ConfigError::IoError { .. })));
    }
}
