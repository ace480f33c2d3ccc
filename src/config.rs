//! Configuration loading from evolver.toml and pyproject.toml.
//!
//! Follows the ruff/black convention:
//! - Standalone `evolver.toml`
//! - `[tool.evolver]` section in pyproject.toml as fallback
//!
//! Environment variables override whatever the file says:
//! `EVOLVER_STATE_DIR`, `EVOLVER_ORACLE_TIMEOUT_SECS`, `EVOLVER_SIMULATOR`,
//! `EVOLVER_MAX_ITERATIONS`.
//!
//! ## Example
//!
//! ```toml
//! [tool.evolver]
//! state-dir = "/var/lib/evolver"
//! oracle-timeout-secs = 120
//! default-max-iterations = 20
//! max-exposed-failures = 6
//! simulator = "node sim/cli.js"   # or "native"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{EvolverError, Result};
use crate::oracle::{ProcessSimulator, ScoringOracle};

pub const DEFAULT_STATE_DIR: &str = "/tmp/evolver_state";
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
pub const DEFAULT_MAX_EXPOSED_FAILURES: usize = 6;

/// Where fitness comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SimulatorSpec {
    #[default]
    Native,
    /// External command line, see [`ProcessSimulator`]
    Command(String),
}

impl SimulatorSpec {
    fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("native") {
            SimulatorSpec::Native
        } else {
            SimulatorSpec::Command(s.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvolverConfig {
    /// Source file for this config (for display).
    pub source: Option<PathBuf>,
    pub state_dir: PathBuf,
    pub oracle_timeout_secs: u64,
    pub default_max_iterations: u32,
    pub max_exposed_failures: usize,
    pub simulator: SimulatorSpec,
}

impl Default for EvolverConfig {
    fn default() -> Self {
        Self {
            source: None,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            oracle_timeout_secs: DEFAULT_ORACLE_TIMEOUT_SECS,
            default_max_iterations: DEFAULT_MAX_ITERATIONS,
            max_exposed_failures: DEFAULT_MAX_EXPOSED_FAILURES,
            simulator: SimulatorSpec::Native,
        }
    }
}

/// Raw config as deserialized from TOML.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct RawConfig {
    state_dir: Option<String>,
    oracle_timeout_secs: Option<u64>,
    default_max_iterations: Option<u32>,
    max_exposed_failures: Option<usize>,
    simulator: Option<String>,
}

/// Wrapper for pyproject.toml structure.
#[derive(Debug, Deserialize)]
struct PyProject {
    tool: Option<PyProjectTool>,
}

#[derive(Debug, Deserialize)]
struct PyProjectTool {
    evolver: Option<RawConfig>,
}

impl EvolverConfig {
    /// Load configuration for `directory`, then apply environment overrides.
    ///
    /// Search order:
    /// 1. evolver.toml in directory
    /// 2. pyproject.toml [tool.evolver] in directory
    /// 3. Walk up to find pyproject.toml (like ruff)
    /// 4. Defaults if nothing found
    pub fn load(directory: &Path) -> Result<Self> {
        let mut config = Self::load_file(directory)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn load_file(directory: &Path) -> Result<Self> {
        let evolver_toml = directory.join("evolver.toml");
        if evolver_toml.exists() {
            // A broken dedicated config file is an error, not a silent default.
            let content = std::fs::read_to_string(&evolver_toml)
                .map_err(|e| EvolverError::Config(format!("{}: {}", evolver_toml.display(), e)))?;
            let raw: RawConfig = toml::from_str(&content)
                .map_err(|e| EvolverError::Config(format!("{}: {}", evolver_toml.display(), e)))?;
            return Ok(Self::from_raw(raw, Some(evolver_toml)));
        }

        let mut current = Some(directory);
        while let Some(dir) = current {
            let pyproject = dir.join("pyproject.toml");
            if pyproject.exists() {
                if let Some(config) = Self::load_pyproject(&pyproject) {
                    return Ok(config);
                }
            }
            current = dir.parent();
        }

        Ok(Self::default())
    }

    fn load_pyproject(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        let pyproject: PyProject = toml::from_str(&content).ok()?;
        let raw = pyproject.tool?.evolver?;
        Some(Self::from_raw(raw, Some(path.to_path_buf())))
    }

    fn from_raw(raw: RawConfig, source: Option<PathBuf>) -> Self {
        let defaults = Self::default();
        Self {
            source,
            state_dir: raw.state_dir.map(PathBuf::from).unwrap_or(defaults.state_dir),
            oracle_timeout_secs: raw.oracle_timeout_secs.unwrap_or(defaults.oracle_timeout_secs),
            default_max_iterations: raw.default_max_iterations.unwrap_or(defaults.default_max_iterations),
            max_exposed_failures: raw.max_exposed_failures.unwrap_or(defaults.max_exposed_failures),
            simulator: raw.simulator.as_deref().map(SimulatorSpec::parse).unwrap_or_default(),
        }
    }

    /// Apply `EVOLVER_*` overrides read through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = var("EVOLVER_STATE_DIR") {
            self.state_dir = PathBuf::from(dir);
        }
        if let Some(secs) = var("EVOLVER_ORACLE_TIMEOUT_SECS") {
            self.oracle_timeout_secs = parse_env("EVOLVER_ORACLE_TIMEOUT_SECS", &secs)?;
        }
        if let Some(max) = var("EVOLVER_MAX_ITERATIONS") {
            self.default_max_iterations = parse_env("EVOLVER_MAX_ITERATIONS", &max)?;
        }
        if let Some(sim) = var("EVOLVER_SIMULATOR") {
            self.simulator = SimulatorSpec::parse(&sim);
        }
        Ok(())
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs)
    }

    /// Build the scoring oracle this config describes.
    pub fn oracle(&self) -> Result<ScoringOracle> {
        match &self.simulator {
            SimulatorSpec::Native => Ok(ScoringOracle::native(self.oracle_timeout())),
            SimulatorSpec::Command(line) => {
                let sim = ProcessSimulator::from_command_line(line)
                    .ok_or_else(|| EvolverError::Config(format!("empty simulator command: {:?}", line)))?;
                Ok(ScoringOracle::new(Arc::new(sim), self.oracle_timeout()))
            }
        }
    }

    /// Format config for verbose display.
    pub fn display_summary(&self) -> String {
        let mut lines = Vec::new();
        match &self.source {
            Some(source) => lines.push(format!("   Config: {}", source.display())),
            None => lines.push("   Config: (defaults)".to_string()),
        }
        lines.push(format!("   State dir: {}", self.state_dir.display()));
        lines.push(format!("   Oracle timeout: {}s", self.oracle_timeout_secs));
        lines.push(format!("   Max iterations: {}", self.default_max_iterations));
        match &self.simulator {
            SimulatorSpec::Native => lines.push("   Simulator: native".to_string()),
            SimulatorSpec::Command(cmd) => lines.push(format!("   Simulator: {}", cmd)),
        }
        lines.join("\n")
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EvolverError::Config(format!("{} must be a non-negative integer, got {:?}", key, value)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_found() {
        let dir = TempDir::new().unwrap();
        let config = EvolverConfig::load_file(dir.path()).unwrap();
        assert_eq!(config.state_dir, PathBuf::from(DEFAULT_STATE_DIR));
        assert_eq!(config.default_max_iterations, 10);
        assert_eq!(config.max_exposed_failures, 6);
        assert_eq!(config.simulator, SimulatorSpec::Native);
    }

    #[test]
    fn test_evolver_toml() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("evolver.toml"),
            "state-dir = \"/srv/evo\"\noracle-timeout-secs = 5\nsimulator = \"node sim.js\"\n",
        )
        .unwrap();
        let config = EvolverConfig::load_file(dir.path()).unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/srv/evo"));
        assert_eq!(config.oracle_timeout(), Duration::from_secs(5));
        assert_eq!(config.simulator, SimulatorSpec::Command("node sim.js".to_string()));
        assert!(config.source.unwrap().ends_with("evolver.toml"));
    }

    #[test]
    fn test_broken_evolver_toml_is_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("evolver.toml"), "state-dir = [").unwrap();
        let err = EvolverConfig::load_file(dir.path()).unwrap_err();
        assert_eq!(err.kind(), "config_error");
    }

    #[test]
    fn test_pyproject_found_walking_up() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("pyproject.toml"),
            "[project]\nname = \"game\"\n\n[tool.evolver]\ndefault-max-iterations = 25\n",
        )
        .unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        let config = EvolverConfig::load_file(&nested).unwrap();
        assert_eq!(config.default_max_iterations, 25);
        assert_eq!(config.oracle_timeout_secs, DEFAULT_ORACLE_TIMEOUT_SECS);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EvolverConfig::default();
        config
            .apply_env(env(&[
                ("EVOLVER_STATE_DIR", "/data"),
                ("EVOLVER_ORACLE_TIMEOUT_SECS", "9"),
                ("EVOLVER_MAX_ITERATIONS", "3"),
                ("EVOLVER_SIMULATOR", "native"),
            ]))
            .unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/data"));
        assert_eq!(config.oracle_timeout_secs, 9);
        assert_eq!(config.default_max_iterations, 3);
        assert_eq!(config.simulator, SimulatorSpec::Native);

        let err = config.apply_env(env(&[("EVOLVER_MAX_ITERATIONS", "lots")])).unwrap_err();
        assert!(err.to_string().contains("EVOLVER_MAX_ITERATIONS"));
    }

    #[test]
    fn test_oracle_from_command() {
        let config = EvolverConfig {
            simulator: SimulatorSpec::Command("python sim.py".to_string()),
            oracle_timeout_secs: 7,
            ..Default::default()
        };
        assert_eq!(config.oracle().unwrap().timeout(), Duration::from_secs(7));
        assert!(config.display_summary().contains("python sim.py"));
    }
}
