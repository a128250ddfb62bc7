//! Configuration loading and types

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use keel_core::Spec;

/// Contents of `keel.toml`
///
/// The provisioning [`Spec`] lives at the top level next to the `[daemon]`
/// table, so the same file drives both the local run and the remote upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Progress server and logging settings
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(flatten)]
    pub spec: Spec,
}

/// Progress server and logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Address the progress server binds to
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins when set
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Publish events to this NATS server instead of the in-process bus
    #[serde(default)]
    pub nats_url: Option<String>,
    /// How long the progress server stays up after the run finishes
    #[serde(default = "default_linger_secs")]
    pub linger_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_level: default_log_level(),
            nats_url: None,
            linger_secs: default_linger_secs(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8081".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_linger_secs() -> u64 {
    600
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed, or the spec is invalid
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("reading {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        config.spec.validate()?;
        Ok(config)
    }

    /// Find the config file to use
    ///
    /// An explicit path wins, then `KEEL_CONFIG`, then `./keel.toml`, then
    /// the user config directory.
    pub fn locate(explicit: Option<&Path>) -> eyre::Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        if let Ok(path) = std::env::var("KEEL_CONFIG") {
            return Ok(PathBuf::from(path));
        }

        let mut paths = vec![PathBuf::from("keel.toml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("keel/keel.toml"));
        }

        paths
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| eyre::eyre!("no config file found; pass --config or set KEEL_CONFIG"))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use keel_core::EngineSpec;

    use super::*;

    const RKE: &str = r#"
log_file = "/var/log/keel.log"

[daemon]
bind = "127.0.0.1:9000"
linger_secs = 5

[cluster]
name = "mgmt"
control_plane_count = 1
worker_count = 2

[engine]
kind = "rke"
hostname = "rancher.lab"

[engine.nodes]
mgmt-controlplane-0 = "10.0.0.10"
mgmt-worker-0 = "10.0.0.11"
"#;

    fn write(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_rke_config() {
        let file = write(RKE);
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.daemon.bind, "127.0.0.1:9000");
        assert_eq!(config.daemon.linger_secs, 5);
        assert_eq!(config.daemon.log_level, "info");
        assert!(config.daemon.nats_url.is_none());
        assert_eq!(config.spec.cluster.name, "mgmt");
        assert_eq!(config.spec.log_file, PathBuf::from("/var/log/keel.log"));
        match config.spec.engine {
            EngineSpec::Rke(rke) => {
                assert_eq!(rke.nodes.len(), 2);
                assert_eq!(rke.hostname.as_deref(), Some("rancher.lab"));
            }
            EngineSpec::Capv(_) => panic!("expected rke engine"),
        }
    }

    #[test]
    fn test_daemon_table_is_optional() {
        let file = write(&RKE.replace("[daemon]\nbind = \"127.0.0.1:9000\"\nlinger_secs = 5\n", ""));
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.daemon.bind, "0.0.0.0:8081");
        assert_eq!(config.daemon.linger_secs, 600);
    }

    #[test]
    fn test_invalid_spec_is_rejected() {
        let file = write(&RKE.replace("name = \"mgmt\"", "name = \"\""));
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = Config::locate(Some(Path::new("/etc/keel/custom.toml"))).unwrap();
        assert_eq!(path, PathBuf::from("/etc/keel/custom.toml"));
    }
}
