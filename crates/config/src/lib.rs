//! Configuration models and loaders for the mission analysis.
//!
//! A mission file names the aircraft parameters (inline or through a
//! separate parameter file), the discretization, solver tolerances, the
//! surrogate source, how legs are executed and the legs themselves.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Aircraft parameters every segment is assembled with.
///
/// Keys follow the parameter files: `S` (1e2 m²), `ac_w` (kN), `thrust_sl`
/// (1e6 N), `SFCSL` (1e-6 1/s), `AR` and `e`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AircraftParams {
    #[serde(rename = "S")]
    pub wing_area: f64,
    pub ac_w: f64,
    pub thrust_sl: f64,
    #[serde(rename = "SFCSL")]
    pub sfc_sl: f64,
    #[serde(rename = "AR")]
    pub aspect_ratio: f64,
    #[serde(rename = "e")]
    pub oswald: f64,
}

impl AircraftParams {
    pub const KEYS: [&'static str; 6] = ["S", "ac_w", "thrust_sl", "SFCSL", "AR", "e"];

    /// Wide-body transport used by the bundled mission.
    pub fn crm() -> Self {
        Self {
            wing_area: 4.278,
            ac_w: 2061.8,
            thrust_sl: 1.02,
            sfc_sl: 87.85,
            aspect_ratio: 8.68,
            oswald: 0.8,
        }
    }

    /// Build from a flat name → value mapping. Extra keys are ignored.
    pub fn from_map(map: &BTreeMap<String, f64>) -> Result<Self, ConfigError> {
        let get = |key: &'static str| {
            map.get(key)
                .copied()
                .ok_or(ConfigError::MissingParameter(key))
        };
        let params = Self {
            wing_area: get("S")?,
            ac_w: get("ac_w")?,
            thrust_sl: get("thrust_sl")?,
            sfc_sl: get("SFCSL")?,
            aspect_ratio: get("AR")?,
            oswald: get("e")?,
        };
        params.validate()?;
        Ok(params)
    }

    /// Values paired with their parameter names.
    pub fn entries(&self) -> [(&'static str, f64); 6] {
        [
            ("S", self.wing_area),
            ("ac_w", self.ac_w),
            ("thrust_sl", self.thrust_sl),
            ("SFCSL", self.sfc_sl),
            ("AR", self.aspect_ratio),
            ("e", self.oswald),
        ]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in self.entries() {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "parameter `{key}` must be positive, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Discretization {
    pub num_elem: usize,
    pub num_cp: usize,
}

impl Default for Discretization {
    fn default() -> Self {
        Self {
            num_elem: 50,
            num_cp: 10,
        }
    }
}

/// Inner Krylov solve of every Newton step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearConfig {
    pub atol: f64,
    pub rtol: f64,
    pub max_iter: usize,
    pub restart: usize,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            atol: 1e-20,
            rtol: 1e-10,
            max_iter: 600,
            restart: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub atol: f64,
    pub rtol: f64,
    pub max_iteration: usize,
    pub damping: f64,
    pub linear: LinearConfig,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            atol: 1e-9,
            rtol: 1e-9,
            max_iteration: 15,
            damping: 1.0,
            linear: LinearConfig::default(),
        }
    }
}

/// Where the aerodynamic surrogate comes from. Without a table the
/// standard table is generated in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurrogateConfig {
    pub table: Option<PathBuf>,
    /// Write the table used by the run to this path.
    pub save: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Serial,
    Parallel,
    Distributed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionConfig {
    #[default]
    RoundRobin,
    Replicated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionConfig {
    #[default]
    Owner,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,
    /// Worker ranks for distributed runs.
    pub ranks: usize,
    pub partition: PartitionConfig,
    pub reduction: ReductionConfig,
    /// Thread cap for parallel runs; all cores when absent.
    pub threads: Option<usize>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Serial,
            ranks: 2,
            partition: PartitionConfig::RoundRobin,
            reduction: ReductionConfig::Owner,
            threads: None,
        }
    }
}

/// One mission leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub range_nmi: f64,
    #[serde(default = "default_mach")]
    pub mach: f64,
    #[serde(default = "default_cruise_altitude")]
    pub cruise_altitude_km: f64,
    #[serde(default)]
    pub pax: f64,
    /// Least-squares fit the altitude control points to the climb-cruise-descent shape.
    #[serde(default)]
    pub fit_profile: bool,
    #[serde(default)]
    pub velocity_specified: bool,
}

fn default_mach() -> f64 {
    0.82
}

fn default_cruise_altitude() -> f64 {
    10.0
}

impl LegConfig {
    pub fn new(range_nmi: f64) -> Self {
        Self {
            name: None,
            range_nmi,
            mach: default_mach(),
            cruise_altitude_km: default_cruise_altitude(),
            pax: 0.0,
            fit_profile: false,
            velocity_specified: false,
        }
    }

    /// Display name, falling back to the range.
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{:.0}nmi", self.range_nmi))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let label = self.label();
        if !(self.range_nmi.is_finite() && self.range_nmi > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "leg `{label}` needs a positive range"
            )));
        }
        if !(self.mach > 0.0 && self.mach < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "leg `{label}` cruise Mach {} is not subsonic",
                self.mach
            )));
        }
        if !(self.cruise_altitude_km > 0.0 && self.cruise_altitude_km.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "leg `{label}` needs a positive cruise altitude"
            )));
        }
        if self.pax < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "leg `{label}` has a negative passenger count"
            )));
        }
        Ok(())
    }
}

/// Mission file as written on disk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MissionFile {
    #[serde(default)]
    pub params_file: Option<PathBuf>,
    #[serde(default)]
    pub aircraft: Option<AircraftParams>,
    #[serde(default)]
    pub discretization: Discretization,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub surrogate: SurrogateConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub legs: Vec<LegConfig>,
}

/// Mission with the parameter source resolved and paths made absolute.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionConfig {
    pub aircraft: AircraftParams,
    pub discretization: Discretization,
    pub solver: SolverConfig,
    pub surrogate: SurrogateConfig,
    pub execution: ExecutionConfig,
    pub legs: Vec<LegConfig>,
}

impl MissionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.aircraft.validate()?;
        if self.discretization.num_elem == 0 {
            return Err(ConfigError::Invalid("num_elem must be at least 1".into()));
        }
        if self.discretization.num_cp < 2 {
            return Err(ConfigError::Invalid("num_cp must be at least 2".into()));
        }
        let solver = &self.solver;
        if !(solver.atol > 0.0 && solver.rtol > 0.0) {
            return Err(ConfigError::Invalid("solver tolerances must be positive".into()));
        }
        if solver.max_iteration == 0 || solver.linear.max_iter == 0 || solver.linear.restart == 0 {
            return Err(ConfigError::Invalid("iteration caps must be at least 1".into()));
        }
        if !(solver.damping > 0.0 && solver.damping <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "damping {} must lie in (0, 1]",
                solver.damping
            )));
        }
        if self.execution.ranks == 0 {
            return Err(ConfigError::Invalid("ranks must be at least 1".into()));
        }
        if self.execution.threads == Some(0) {
            return Err(ConfigError::Invalid("threads must be at least 1".into()));
        }
        if self.legs.is_empty() {
            return Err(ConfigError::Invalid("mission has no legs".into()));
        }
        self.legs.iter().try_for_each(LegConfig::validate)
    }
}

/// Errors that can occur while loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("missing aircraft parameter `{0}`")]
    MissingParameter(&'static str),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Load a flat parameter file (TOML or YAML).
pub fn load_params<P: AsRef<Path>>(path: P) -> Result<AircraftParams, ConfigError> {
    let map: BTreeMap<String, f64> = load_record(path.as_ref())?;
    AircraftParams::from_map(&map)
}

/// Load and validate a mission file. Relative paths inside it resolve
/// against the file's directory.
pub fn load_mission<P: AsRef<Path>>(path: P) -> Result<MissionConfig, ConfigError> {
    let path = path.as_ref();
    let file: MissionFile = load_record(path)?;
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
    resolve(file, &base)
}

/// Resolve a parsed mission file against `base`.
pub fn resolve(file: MissionFile, base: &Path) -> Result<MissionConfig, ConfigError> {
    let aircraft = match (file.aircraft, &file.params_file) {
        (Some(_), Some(_)) => {
            return Err(ConfigError::Invalid(
                "give either `params_file` or `[aircraft]`, not both".into(),
            ));
        }
        (Some(aircraft), None) => aircraft,
        (None, Some(params)) => load_params(rebase(base, params))?,
        (None, None) => {
            return Err(ConfigError::Invalid(
                "mission needs `params_file` or an `[aircraft]` table".into(),
            ));
        }
    };
    let mut surrogate = file.surrogate;
    surrogate.table = surrogate.table.map(|p| rebase(base, &p));
    surrogate.save = surrogate.save.map(|p| rebase(base, &p));

    let config = MissionConfig {
        aircraft,
        discretization: file.discretization,
        solver: file.solver,
        surrogate,
        execution: file.execution,
        legs: file.legs,
    };
    config.validate()?;
    Ok(config)
}

fn rebase(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn load_record<T>(path: &Path) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de>,
{
    if path.extension().map(|ext| ext == "toml").unwrap_or(false) {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    } else {
        let reader = File::open(path)?;
        Ok(serde_yaml::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const PARAMS: &str = "S = 4.278\nac_w = 2061.8\nthrust_sl = 1.02\nSFCSL = 87.85\nAR = 8.68\ne = 0.8\n";

    #[test]
    fn mission_file_resolves_parameter_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("params.toml"), PARAMS).unwrap();
        let mission = dir.path().join("mission.toml");
        fs::write(
            &mission,
            "params_file = \"params.toml\"\n\
             [discretization]\nnum_elem = 20\n\
             [execution]\nmode = \"parallel\"\n\
             [[legs]]\nrange_nmi = 9000\n\
             [[legs]]\nname = \"short\"\nrange_nmi = 5000\nmach = 0.78\n",
        )
        .unwrap();

        let config = load_mission(&mission).unwrap();
        assert_eq!(config.aircraft, AircraftParams::crm());
        assert_eq!(config.discretization.num_elem, 20);
        assert_eq!(config.discretization.num_cp, 10);
        assert_eq!(config.execution.mode, ExecutionMode::Parallel);
        assert_eq!(config.solver.max_iteration, 15);
        assert_eq!(config.legs[0].mach, 0.82);
        assert_eq!(config.legs[0].label(), "9000nmi");
        assert_eq!(config.legs[1].label(), "short");
    }

    #[test]
    fn yaml_parameter_files_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.yaml");
        fs::write(&path, PARAMS.replace(" =", ":")).unwrap();
        assert_eq!(load_params(&path).unwrap(), AircraftParams::crm());
    }

    #[test]
    fn missing_parameter_is_reported_by_name() {
        let mut map: BTreeMap<String, f64> = AircraftParams::crm()
            .entries()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        map.remove("SFCSL");
        assert!(matches!(
            AircraftParams::from_map(&map),
            Err(ConfigError::MissingParameter("SFCSL"))
        ));
    }

    #[test]
    fn empty_missions_are_rejected() {
        let file = MissionFile {
            aircraft: Some(AircraftParams::crm()),
            ..MissionFile::default()
        };
        assert!(matches!(
            resolve(file, Path::new(".")),
            Err(ConfigError::Invalid(_))
        ));
    }
}
