//! Project Loader
//!
//! Loads the manifest and the script objects of a project from disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use klax_runtime::{ScriptError, ScriptObject};
use klax_types::ParsePinTypeError;
use tracing::{debug, info};

use super::config::ProjectManifest;

/// Manifest file name at the project root
pub const MANIFEST_FILE: &str = "klax.toml";

/// Directory holding the serialized script objects
pub const SCRIPTS_DIR: &str = "scripts";

/// Error type for project loading
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Project path does not exist: {0}")]
    PathNotFound(PathBuf),

    #[error("Project manifest not found: {0}")]
    ManifestNotFound(PathBuf),

    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Invalid pin type: {0}")]
    InvalidPinType(#[from] ParsePinTypeError),

    #[error("Invalid event '{name}': {source}")]
    InvalidEvent {
        name: String,
        #[source]
        source: ScriptError,
    },

    #[error("Failed to load script {path}: {source}")]
    ScriptParseError {
        path: PathBuf,
        #[source]
        source: ScriptError,
    },

    #[error("Duplicate script name '{0}'")]
    DuplicateScript(String),
}

/// Loaded project with all scripts
#[derive(Debug)]
pub struct Project {
    /// Project root path
    pub path: PathBuf,
    /// Project manifest
    pub manifest: ProjectManifest,
    /// Script objects keyed by name
    pub scripts: BTreeMap<String, ScriptObject>,
}

impl Project {
    /// Get project ID
    pub fn id(&self) -> &str {
        &self.manifest.project.id
    }

    /// Get project name
    pub fn name(&self) -> &str {
        &self.manifest.project.name
    }

    pub fn get_script(&self, name: &str) -> Option<&ScriptObject> {
        self.scripts.get(name)
    }
}

/// Project loader
pub struct ProjectLoader;

impl ProjectLoader {
    /// Load a project from the given path
    pub fn load(path: impl AsRef<Path>) -> Result<Project, LoadError> {
        let path = path.as_ref();
        let manifest = Self::load_manifest(path)?;
        info!("Loaded project manifest: {} ({})", manifest.project.name, manifest.project.id);

        let scripts = Self::load_scripts(path)?;
        info!("Loaded {} scripts", scripts.len());

        Ok(Project {
            path: path.to_path_buf(),
            manifest,
            scripts,
        })
    }

    /// Read just the manifest, e.g. to configure logging before a full load
    pub fn load_manifest(path: impl AsRef<Path>) -> Result<ProjectManifest, LoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LoadError::PathNotFound(path.to_path_buf()));
        }

        let manifest_path = path.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(LoadError::ManifestNotFound(manifest_path));
        }

        let content = fs::read_to_string(&manifest_path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load all script objects from the scripts/ directory
    fn load_scripts(project_path: &Path) -> Result<BTreeMap<String, ScriptObject>, LoadError> {
        let scripts_dir = project_path.join(SCRIPTS_DIR);
        let mut scripts = BTreeMap::new();

        if !scripts_dir.exists() {
            debug!("No scripts directory found");
            return Ok(scripts);
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&scripts_dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<_, _>>()?;
        paths.sort();

        for path in paths {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let script = Self::load_script(&path)?;
            debug!("Loaded script: {}", script.name);
            if scripts.contains_key(&script.name) {
                return Err(LoadError::DuplicateScript(script.name));
            }
            scripts.insert(script.name.clone(), script);
        }

        Ok(scripts)
    }

    /// Load a single script object; an unnamed script takes its file stem
    pub fn load_script(path: &Path) -> Result<ScriptObject, LoadError> {
        let content = fs::read_to_string(path)?;
        let mut script = ScriptObject::from_json(&content).map_err(|source| LoadError::ScriptParseError {
            path: path.to_path_buf(),
            source,
        })?;
        if script.name.is_empty() {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                script.name = stem.to_string();
            }
        }
        Ok(script)
    }

    /// Save a script object to scripts/<name>.json
    pub fn save_script(project_path: &Path, script: &mut ScriptObject) -> Result<PathBuf, LoadError> {
        let scripts_dir = project_path.join(SCRIPTS_DIR);
        fs::create_dir_all(&scripts_dir)?;

        let path = scripts_dir.join(format!("{}.json", script.name));
        let content = script.to_json().map_err(|source| LoadError::ScriptParseError {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, content)?;
        info!("Saved script: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use klax_runtime::{GraphRef, Variable, nodes};
    use klax_types::PinType;
    use tempfile::TempDir;

    fn create_test_project() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"
[project]
id = "test-project"
name = "Test Project"

[runtime]
max_call_depth = 8
"#,
        )
        .unwrap();
        dir
    }

    fn counter_script() -> ScriptObject {
        let mut script = ScriptObject::new("Counter");
        let count = Variable::new("Count", PinType::Int).with_value(3);
        script.add_variable(count.clone());
        let mut event = klax_runtime::EventGraph::new("OnStart", None, &[]);
        event.graph.add_node(nodes::get_variable(&count));
        script.add_event_graph(event);
        script
    }

    #[test]
    fn test_load_project() {
        let dir = create_test_project();
        let project = ProjectLoader::load(dir.path()).unwrap();

        assert_eq!(project.id(), "test-project");
        assert_eq!(project.name(), "Test Project");
        assert_eq!(project.manifest.runtime.limits.max_call_depth, 8);
        assert!(project.scripts.is_empty());
    }

    #[test]
    fn test_missing_manifest() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            ProjectLoader::load(dir.path()),
            Err(LoadError::ManifestNotFound(_))
        ));
        assert!(matches!(
            ProjectLoader::load(dir.path().join("nowhere")),
            Err(LoadError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_save_and_reload_script() {
        let dir = create_test_project();
        let mut script = counter_script();
        let path = ProjectLoader::save_script(dir.path(), &mut script).unwrap();
        assert!(path.ends_with("scripts/Counter.json"));
        // Not a script
        fs::write(dir.path().join(SCRIPTS_DIR).join("notes.txt"), "ignored").unwrap();

        let project = ProjectLoader::load(dir.path()).unwrap();
        let loaded = project.get_script("Counter").unwrap();
        assert_eq!(loaded.variables()[0].value, klax_types::Value::Int(3));
        assert_eq!(loaded.graph(GraphRef::Event(0)).unwrap().len(), 2);
    }

    #[test]
    fn test_unnamed_script_takes_file_stem() {
        let dir = create_test_project();
        let mut script = counter_script();
        script.name.clear();
        let json = script.to_json().unwrap();
        fs::create_dir(dir.path().join(SCRIPTS_DIR)).unwrap();
        fs::write(dir.path().join(SCRIPTS_DIR).join("door.json"), json).unwrap();

        let project = ProjectLoader::load(dir.path()).unwrap();
        assert!(project.get_script("door").is_some());
    }

    #[test]
    fn test_broken_script_reports_path() {
        let dir = create_test_project();
        fs::create_dir(dir.path().join(SCRIPTS_DIR)).unwrap();
        fs::write(dir.path().join(SCRIPTS_DIR).join("bad.json"), "{ nope").unwrap();

        let err = ProjectLoader::load(dir.path()).unwrap_err();
        assert!(matches!(&err, LoadError::ScriptParseError { path, .. } if path.ends_with("bad.json")));
    }
}
