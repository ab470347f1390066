use crate::filter::FilterState;
use crate::model::ClusterWideKind;
use crate::selection::DEFAULT_MAX_SELECTION;
use crate::viewport::ZoomLevel;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub source: Option<String>,
    pub max_selection: usize,
    pub default_zoom: ZoomLevel,
    pub hide_containers: bool,
    pub state_dir: Option<PathBuf>,
    pub cluster_wide_kinds: Vec<ClusterWideKind>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: None,
            max_selection: DEFAULT_MAX_SELECTION,
            default_zoom: ZoomLevel::FitToScreen,
            hide_containers: false,
            state_dir: default_state_dir(),
            cluster_wide_kinds: ClusterWideKind::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct KubetopoConfigFile {
    #[serde(default, alias = "max-selection")]
    max_selection: Option<usize>,
    #[serde(default, alias = "zoom")]
    default_zoom: Option<ZoomLevel>,
    #[serde(default)]
    hide_containers: bool,
    #[serde(default)]
    state_dir: Option<PathBuf>,
    #[serde(default, alias = "kinds")]
    cluster_wide_kinds: Vec<String>,
}

impl AppConfig {
    /// Loads the first config file found, or defaults when there is none.
    pub fn discover() -> Result<Self> {
        let home = std::env::var("HOME").ok().map(PathBuf::from);
        let explicit = std::env::var("KUBETOPO_CONFIG").ok();
        match discover_config_path(explicit.as_deref(), Path::new("."), home.as_deref()) {
            Some(path) => Self::from_path(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let parsed: KubetopoConfigFile = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        debug!(path = %path.display(), "loaded config");
        Ok(Self::from_file(parsed, Some(path.display().to_string())))
    }

    fn from_file(parsed: KubetopoConfigFile, source: Option<String>) -> Self {
        let defaults = Self::default();
        let mut cluster_wide_kinds = Vec::new();
        for token in &parsed.cluster_wide_kinds {
            match ClusterWideKind::from_token(token) {
                Some(kind) if !cluster_wide_kinds.contains(&kind) => cluster_wide_kinds.push(kind),
                Some(_) => {}
                None => warn!(token = %token, "ignoring unknown cluster-wide kind in config"),
            }
        }
        if cluster_wide_kinds.is_empty() {
            cluster_wide_kinds = defaults.cluster_wide_kinds;
        }

        Self {
            source,
            max_selection: parsed
                .max_selection
                .filter(|limit| *limit > 0)
                .unwrap_or(defaults.max_selection),
            default_zoom: parsed.default_zoom.unwrap_or(defaults.default_zoom),
            hide_containers: parsed.hide_containers,
            state_dir: parsed.state_dir.or(defaults.state_dir),
            cluster_wide_kinds,
        }
    }
}

fn default_state_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .filter(|home| !home.trim().is_empty())
        .map(|home| PathBuf::from(home).join(".config/kubetopo/state"))
}

fn discover_config_path(
    explicit: Option<&str>,
    cwd: &Path,
    home: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(path) = explicit
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    for candidate in ["kubetopo.yaml", "kubetopo.yml", ".kubetopo.yaml"] {
        let candidate = cwd.join(candidate);
        if candidate.exists() {
            return Some(candidate);
        }
    }

    let home = home?;
    [
        home.join(".config/kubetopo/config.yaml"),
        home.join(".config/kubetopo/config.yml"),
    ]
    .into_iter()
    .find(|candidate| candidate.exists())
}

/// What survives a restart for one cluster: applied filters and zoom.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewState {
    #[serde(default)]
    pub filters: FilterState,
    #[serde(default)]
    pub zoom: ZoomLevel,
}

/// Per-cluster YAML files under one state directory.
#[derive(Debug, Clone)]
pub struct ViewStateStore {
    dir: PathBuf,
}

impl ViewStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn load(&self, cluster_id: &str) -> Result<Option<ViewState>> {
        let path = self.path_for(cluster_id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read view state {}", path.display()))?;
        let state = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse view state {}", path.display()))?;
        Ok(Some(state))
    }

    pub fn save(&self, cluster_id: &str, state: &ViewState) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create state dir {}", self.dir.display()))?;
        let path = self.path_for(cluster_id);
        let raw = serde_yaml::to_string(state).context("failed to serialize view state")?;
        fs::write(&path, raw)
            .with_context(|| format!("failed to write view state {}", path.display()))?;
        debug!(path = %path.display(), "saved view state");
        Ok(())
    }

    fn path_for(&self, cluster_id: &str) -> PathBuf {
        let file = cluster_id
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                    ch
                } else {
                    '_'
                }
            })
            .collect::<String>();
        self.dir.join(format!("{file}.yaml"))
    }
}

#[cfg(test)]
mod tests {
    use super::{AppConfig, ViewState, ViewStateStore, discover_config_path};
    use crate::filter::{Facet, FilterState};
    use crate::model::ClusterWideKind;
    use crate::viewport::ZoomLevel;
    use std::fs;

    #[test]
    fn config_file_overrides_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("kubetopo.yaml");
        fs::write(
            &path,
            concat!(
                "max_selection: 5\n",
                "default_zoom: !fixed 3.0\n",
                "hide_containers: true\n",
                "cluster_wide_kinds: [nodes, pv, bogus]\n",
            ),
        )
        .expect("write config");

        let config = AppConfig::from_path(&path).expect("load config");
        assert_eq!(config.max_selection, 5);
        assert_eq!(config.default_zoom, ZoomLevel::Fixed(3.0));
        assert!(config.hide_containers);
        assert_eq!(
            config.cluster_wide_kinds,
            vec![ClusterWideKind::Nodes, ClusterWideKind::PersistentVolumes]
        );
    }

    #[test]
    fn empty_config_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("kubetopo.yaml");
        fs::write(&path, "max_selection: 0\n").expect("write config");

        let config = AppConfig::from_path(&path).expect("load config");
        assert_eq!(config.max_selection, 20);
        assert_eq!(config.cluster_wide_kinds.len(), ClusterWideKind::ALL.len());
    }

    #[test]
    fn discovery_prefers_explicit_then_cwd_then_home() {
        let cwd = tempfile::tempdir().expect("cwd");
        let home = tempfile::tempdir().expect("home");
        let home_config = home.path().join(".config/kubetopo/config.yaml");
        fs::create_dir_all(home_config.parent().expect("parent")).expect("mkdir");
        fs::write(&home_config, "").expect("write");

        assert_eq!(
            discover_config_path(None, cwd.path(), Some(home.path())),
            Some(home_config)
        );

        let local = cwd.path().join(".kubetopo.yaml");
        fs::write(&local, "").expect("write");
        assert_eq!(
            discover_config_path(None, cwd.path(), Some(home.path())),
            Some(local)
        );

        assert_eq!(
            discover_config_path(Some("/etc/kubetopo.yaml"), cwd.path(), None),
            Some("/etc/kubetopo.yaml".into())
        );
    }

    #[test]
    fn view_state_is_kept_per_cluster() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ViewStateStore::new(dir.path().join("state"));
        let state = ViewState {
            filters: FilterState::default().with_facet(Facet::Namespaces, ["default"]),
            zoom: ZoomLevel::Fixed(5.0),
        };

        assert_eq!(store.load("prod/admin").expect("load"), None);
        store.save("prod/admin", &state).expect("save");
        assert_eq!(store.load("prod/admin").expect("load"), Some(state));
        assert_eq!(store.load("staging").expect("load"), None);
    }
}
