//! Compose file parser

use super::config::ComposeConfig;
use super::manifest::Manifest;
use crate::error::{ComposeError, ManifestError, Result};
use regex::{Captures, Regex};
use serde_yaml::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default compose file names
pub const DEFAULT_COMPOSE_FILES: &[&str] = &[
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

/// Compose file parser
pub struct ComposeParser;

impl ComposeParser {
    /// Find compose file in directory
    pub fn find_compose_file(dir: &Path) -> Option<PathBuf> {
        DEFAULT_COMPOSE_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    }

    /// Parse compose file from path
    pub fn parse_file(path: &Path, env: &HashMap<String, String>) -> Result<ComposeConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ManifestError::Parse(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Ok(Self::parse_str(&content, env)?)
    }

    /// Parse compose document from string, interpolating variables from `env`
    pub fn parse_str(
        content: &str,
        env: &HashMap<String, String>,
    ) -> std::result::Result<ComposeConfig, ManifestError> {
        let mut document: Value = serde_yaml::from_str(content)
            .map_err(|e| ManifestError::Parse(format!("Failed to parse YAML: {}", e)))?;

        if !matches!(document, Value::Mapping(_)) {
            return Err(ManifestError::Parse(
                "Top level of a compose file must be a mapping".to_string(),
            ));
        }

        interpolate_value(&mut document, env);

        serde_yaml::from_value(document)
            .map_err(|e| ManifestError::Parse(format!("Invalid compose file: {}", e)))
    }

    /// Parse multiple compose files (with merging)
    pub fn parse_files(paths: &[PathBuf], env: &HashMap<String, String>) -> Result<ComposeConfig> {
        let mut config: Option<ComposeConfig> = None;

        for path in paths {
            let file_config = Self::parse_file(path, env)?;
            config = Some(match config {
                Some(base) => Self::merge_configs(base, file_config),
                None => file_config,
            });
        }

        config.ok_or_else(|| ComposeError::InvalidConfig("No compose file given".to_string()))
    }

    /// Parse and validate compose files into a manifest
    pub fn load(paths: &[PathBuf], env: &HashMap<String, String>) -> Result<Manifest> {
        let config = Self::parse_files(paths, env)?;
        let manifest = Manifest::from_config(config, env)?;

        for warning in manifest.warnings() {
            tracing::warn!("{}", warning);
        }

        Ok(manifest)
    }

    /// Merge two compose configurations
    pub fn merge_configs(base: ComposeConfig, overlay: ComposeConfig) -> ComposeConfig {
        let mut result = base;

        if overlay.version.is_some() {
            result.version = overlay.version;
        }

        if overlay.name.is_some() {
            result.name = overlay.name;
        }

        for (name, service) in overlay.services {
            match result.services.iter_mut().find(|(n, _)| *n == name) {
                Some((_, existing)) => {
                    // Overlay wins field by field; image and build replace each other
                    if service.image.is_some() {
                        existing.image = service.image;
                        existing.build = None;
                    }
                    if service.build.is_some() {
                        existing.build = service.build;
                        existing.image = None;
                    }
                    if service.command.is_some() {
                        existing.command = service.command;
                    }
                    if service.container_name.is_some() {
                        existing.container_name = service.container_name;
                    }
                    if service.environment.is_some() {
                        existing.environment = service.environment;
                    }
                    if service.ports.is_some() {
                        existing.ports = service.ports;
                    }
                    if service.volumes.is_some() {
                        existing.volumes = service.volumes;
                    }
                    if service.networks.is_some() {
                        existing.networks = service.networks;
                    }
                    if service.depends_on.is_some() {
                        existing.depends_on = service.depends_on;
                    }
                    if service.labels.is_some() {
                        existing.labels = service.labels;
                    }
                    if service.working_dir.is_some() {
                        existing.working_dir = service.working_dir;
                    }
                    if service.stop_grace_period.is_some() {
                        existing.stop_grace_period = service.stop_grace_period;
                    }
                }
                None => result.services.push((name, service)),
            }
        }

        for (name, network) in overlay.networks {
            match result.networks.iter_mut().find(|(n, _)| *n == name) {
                Some((_, existing)) => *existing = network,
                None => result.networks.push((name, network)),
            }
        }

        for (name, volume) in overlay.volumes {
            match result.volumes.iter_mut().find(|(n, _)| *n == name) {
                Some((_, existing)) => *existing = volume,
                None => result.volumes.push((name, volume)),
            }
        }

        result
    }
}

/// Recursively interpolate every string scalar in a YAML document
fn interpolate_value(value: &mut Value, env: &HashMap<String, String>) {
    match value {
        Value::String(s) => *s = interpolate_string(s, env),
        Value::Sequence(seq) => seq.iter_mut().for_each(|v| interpolate_value(v, env)),
        Value::Mapping(map) => map.iter_mut().for_each(|(_, v)| interpolate_value(v, env)),
        Value::Tagged(tagged) => interpolate_value(&mut tagged.value, env),
        _ => {}
    }
}

/// Interpolate `$VAR`, `${VAR}` and `${VAR:-default}`; `$$` escapes a dollar sign
pub fn interpolate_string(s: &str, env: &HashMap<String, String>) -> String {
    if !s.contains('$') {
        return s.to_string();
    }

    let re = match Regex::new(
        r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)(?::?-([^}]*))?\}|\$([A-Za-z_][A-Za-z0-9_]*)",
    ) {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };

    re.replace_all(s, |caps: &Captures| {
        if &caps[0] == "$$" {
            return "$".to_string();
        }
        let var = caps.get(1).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
        match (env.get(var), caps.get(2)) {
            (Some(value), Some(default)) if value.is_empty() && caps[0].contains(":-") => {
                default.as_str().to_string()
            }
            (Some(value), _) => value.clone(),
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => String::new(),
        }
    })
    .into_owned()
}
