//! Project loading: compose file discovery and project naming

use super::manifest::Manifest;
use super::parser::ComposeParser;
use crate::error::{ComposeError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Where to find a project and what to call it
#[derive(Debug, Clone, Default)]
pub struct ProjectOptions {
    /// Compose files, merged in order; discovered when empty
    pub files: Vec<PathBuf>,
    /// Explicit project name
    pub name: Option<String>,
    /// Project directory; defaults to the first file's parent or the
    /// current directory
    pub directory: Option<PathBuf>,
}

/// A loaded compose project
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub directory: PathBuf,
    pub files: Vec<PathBuf>,
    pub manifest: Manifest,
}

impl Project {
    /// Locate, parse and validate the project's compose files
    pub fn load(options: &ProjectOptions, env: &HashMap<String, String>) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let base = options.directory.clone().unwrap_or_else(|| cwd.clone());

        let files: Vec<PathBuf> = if options.files.is_empty() {
            let found = ComposeParser::find_compose_file(&base).ok_or_else(|| {
                ComposeError::InvalidConfig(format!(
                    "no compose file found in {}",
                    base.display()
                ))
            })?;
            vec![found]
        } else {
            options
                .files
                .iter()
                .map(|f| if f.is_absolute() { f.clone() } else { cwd.join(f) })
                .collect()
        };

        let directory = match &options.directory {
            Some(dir) => dir.clone(),
            None => files
                .first()
                .and_then(|f| f.parent())
                .map(Path::to_path_buf)
                .unwrap_or(cwd),
        };

        let manifest = ComposeParser::load(&files, env)?;

        let raw = options
            .name
            .clone()
            .or_else(|| manifest.name().map(str::to_string))
            .or_else(|| {
                directory
                    .file_name()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_default();
        let name = normalize_project_name(&raw);
        if name.is_empty() {
            return Err(ComposeError::InvalidConfig(format!(
                "project name '{}' has no usable characters",
                raw
            )));
        }

        tracing::debug!("Loaded project {} from {} file(s)", name, files.len());

        Ok(Self {
            name,
            directory,
            files,
            manifest,
        })
    }
}

/// Lowercase and keep only `[a-z0-9_-]`, not starting with `-` or `_`
pub fn normalize_project_name(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_')
        .collect::<String>()
        .trim_start_matches(['-', '_'])
        .to_string()
}

/// Default state directory under the user's data dir
pub fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join("rune-compose")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_project_name() {
        assert_eq!(normalize_project_name("My Shop"), "myshop");
        assert_eq!(normalize_project_name("_web.App-2"), "webapp-2");
        assert_eq!(normalize_project_name("!!!"), "");
    }

    #[test]
    fn test_load_discovers_file_and_names_project() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("Shop.Front");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(
            dir.join("compose.yaml"),
            "services:\n  web:\n    image: nginx\n",
        )
        .unwrap();

        let options = ProjectOptions {
            directory: Some(dir.clone()),
            ..Default::default()
        };
        let project = Project::load(&options, &HashMap::new()).unwrap();
        assert_eq!(project.name, "shopfront");
        assert_eq!(project.files, vec![dir.join("compose.yaml")]);
        assert!(project.manifest.service("web").is_some());
    }

    #[test]
    fn test_name_precedence() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("stack.yml");
        std::fs::write(&file, "name: Billing\nservices:\n  api:\n    image: api\n").unwrap();

        let mut options = ProjectOptions {
            files: vec![file],
            ..Default::default()
        };
        assert_eq!(Project::load(&options, &HashMap::new()).unwrap().name, "billing");

        options.name = Some("override".into());
        assert_eq!(Project::load(&options, &HashMap::new()).unwrap().name, "override");
    }

    #[test]
    fn test_missing_compose_file() {
        let temp = tempdir().unwrap();
        let options = ProjectOptions {
            directory: Some(temp.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(
            Project::load(&options, &HashMap::new()),
            Err(ComposeError::InvalidConfig(_))
        ));
    }
}
