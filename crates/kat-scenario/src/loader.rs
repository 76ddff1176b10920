//! Scenario loader
//!
//! Reads YAML scenario documents from disk, validates them and resolves
//! relative manifest references against the scenario file's directory.

use crate::error::LoadError;
use crate::types::Scenario;
use std::path::{Path, PathBuf};

/// Parse and validate an in-memory scenario document
///
/// # Errors
/// `LoadError::Parse` for malformed YAML, `LoadError::Invalid` for
/// invariant violations
pub fn parse_str(text: &str) -> Result<Scenario, LoadError> {
    parse_at(text, Path::new("<inline>"))
}

/// Load one scenario file
///
/// # Errors
/// `LoadError` if the file cannot be read, parsed or validated
pub fn load(path: impl AsRef<Path>) -> Result<Scenario, LoadError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut scenario = parse_at(&text, path)?;
    if let Some(dir) = path.parent() {
        resolve_manifests(&mut scenario, dir);
    }

    tracing::debug!(
        scenario = %scenario.name,
        path = %path.display(),
        agents = scenario.agents.len(),
        expectations = scenario.expect.len(),
        "loaded scenario"
    );
    Ok(scenario)
}

/// Load every `.yaml` / `.yml` scenario in a directory
///
/// Files are visited in name order; subdirectories and other extensions are
/// skipped. The first file that fails aborts the load.
///
/// # Errors
/// `LoadError` from the directory read or from the first bad file
pub fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<Scenario>, LoadError> {
    let dir = dir.as_ref();
    let io_err = |source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();
        if path.is_file() && is_scenario_file(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    paths.iter().map(load).collect()
}

fn parse_at(text: &str, path: &Path) -> Result<Scenario, LoadError> {
    let scenario: Scenario = serde_yaml::from_str(text).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    scenario.validate()?;
    Ok(scenario)
}

fn is_scenario_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false)
}

fn resolve_manifests(scenario: &mut Scenario, base: &Path) {
    for manifest in &mut scenario.setup.manifests {
        let p = Path::new(manifest.as_str());
        if p.is_relative() {
            *manifest = base.join(p).to_string_lossy().into_owned();
        }
    }
}
