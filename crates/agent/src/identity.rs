use std::path::{Path, PathBuf};

use anyhow::Context;
use fleet_core::model::MachineId;

/// Machine id assigned by the daemon, cached in a local file.
#[derive(Debug, Clone)]
pub struct Identity {
    path: PathBuf,
    machine_id: Option<MachineId>,
}

impl Identity {
    /// Read the id file if it exists. A missing or blank file means "not yet registered".
    pub async fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let machine_id = match tokio::fs::read_to_string(&path).await {
            Ok(text) => Some(text.trim().to_string()).filter(|s| !s.is_empty()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).with_context(|| format!("read {}", path.display()));
            }
        };
        Ok(Self { path, machine_id })
    }

    pub fn machine_id(&self) -> Option<&str> {
        self.machine_id.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remember `machine_id`, writing the file only when it changed.
    pub async fn store(&mut self, machine_id: &str) -> anyhow::Result<()> {
        if self.machine_id.as_deref() == Some(machine_id) {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }
        tokio::fs::write(&self.path, machine_id)
            .await
            .with_context(|| format!("write {}", self.path.display()))?;
        self.machine_id = Some(machine_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_means_unregistered() {
        let dir = tempfile::tempdir().unwrap();
        let id = Identity::load(dir.path().join("agent_id")).await.unwrap();
        assert!(id.machine_id().is_none());
    }

    #[tokio::test]
    async fn stored_id_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/agent_id");

        let mut id = Identity::load(&path).await.unwrap();
        id.store("01HZX0MACHINE").await.unwrap();
        assert_eq!(id.machine_id(), Some("01HZX0MACHINE"));

        let reloaded = Identity::load(&path).await.unwrap();
        assert_eq!(reloaded.machine_id(), Some("01HZX0MACHINE"));
    }
}
