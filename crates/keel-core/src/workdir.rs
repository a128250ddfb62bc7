//! Per-cluster working directory
//!
//! Every artifact a stage produces lives under `<work_dir>/<cluster>` with a
//! name derived only from the cluster name, so a later run against the same
//! cluster finds the same files. Writes always replace existing content.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::Spec;
use crate::error::CoreError;

const DEFAULT_PARENT: &str = ".keel";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDir {
    root: PathBuf,
    cluster: String,
}

impl ClusterDir {
    /// Resolve the directory for a spec
    ///
    /// # Errors
    /// Returns [`CoreError::Config`] if no work dir is set and the home
    /// directory cannot be determined.
    pub fn for_spec(spec: &Spec) -> Result<Self, CoreError> {
        let parent = match &spec.work_dir {
            Some(dir) => dir.clone(),
            None => dirs::home_dir()
                .map(|home| home.join(DEFAULT_PARENT))
                .ok_or_else(|| CoreError::Config("cannot determine home directory".into()))?,
        };
        Ok(Self::new(parent, &spec.cluster.name))
    }

    #[must_use]
    pub fn new(parent: impl Into<PathBuf>, cluster: &str) -> Self {
        Self {
            root: parent.into().join(cluster),
            cluster: cluster.to_string(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Path of a file inside the directory
    #[must_use]
    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    #[must_use]
    pub fn bootstrap_kubeconfig(&self) -> PathBuf {
        self.file("bootstrap-kubeconfig")
    }

    #[must_use]
    pub fn permanent_kubeconfig(&self) -> PathBuf {
        self.file("kubeconfig")
    }

    #[must_use]
    pub fn credentials_secret(&self) -> PathBuf {
        self.file("vsphere-credentials.yaml")
    }

    #[must_use]
    pub fn base_manifest(&self) -> PathBuf {
        self.file(&format!("{}-base.yaml", self.cluster))
    }

    #[must_use]
    pub fn final_manifest(&self) -> PathBuf {
        self.file(&format!("{}-final.yaml", self.cluster))
    }

    #[must_use]
    pub fn rke_config(&self) -> PathBuf {
        self.file("rke-cluster.yml")
    }

    /// Create the directory if missing
    ///
    /// # Errors
    /// Returns [`CoreError::Io`] on filesystem failure.
    pub async fn ensure(&self) -> Result<(), CoreError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Write (or overwrite) a file inside the directory and return its path
    ///
    /// # Errors
    /// Returns [`CoreError::Io`] on filesystem failure.
    pub async fn write(&self, name: &str, contents: impl AsRef<[u8]>) -> Result<PathBuf, CoreError> {
        self.ensure().await?;
        let path = self.file(name);
        write_file(&path, contents).await?;
        Ok(path)
    }
}

/// Write a file, creating its parent directory first
///
/// # Errors
/// Returns [`CoreError::Io`] on filesystem failure.
pub async fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> Result<(), CoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents.as_ref())
        .await
        .map_err(|e| CoreError::Io(format!("{}: {e}", path.display())))?;
    debug!(path = %path.display(), "wrote artifact");
    Ok(())
}
