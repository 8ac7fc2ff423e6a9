use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use super::{ContextKind, ContextSnapshot};
use crate::{Error, Result};

/// Snapshots on disk, one file per operation kind under `dir`.
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so a reader sees the previous snapshot or the new one, never a mix.
#[derive(Debug, Clone)]
pub struct ContextStore {
    dir: PathBuf,
}

impl ContextStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, kind: ContextKind) -> PathBuf {
        self.dir.join(format!("{kind}.json"))
    }

    pub async fn save(&self, snapshot: &ContextSnapshot) -> Result<PathBuf> {
        let body = snapshot.to_json()?;
        let target = self.path_for(snapshot.kind());
        let temp = self
            .dir
            .join(format!(".{}.{}.tmp", snapshot.kind(), Uuid::new_v4()));

        fs::create_dir_all(&self.dir).await?;
        let written: std::io::Result<()> = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(body.as_bytes()).await?;
            file.sync_all().await?;
            fs::rename(&temp, &target).await
        }
        .await;
        if let Err(e) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        debug!("Saved {} context to {}", snapshot.kind(), target.display());
        Ok(target)
    }

    pub async fn exists(&self, kind: ContextKind) -> bool {
        fs::try_exists(self.path_for(kind)).await.unwrap_or(false)
    }

    pub async fn load(&self, kind: ContextKind) -> Result<ContextSnapshot> {
        let path = self.path_for(kind);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound {
                    resource: format!("{kind} context at {}", path.display()),
                })
            }
            Err(e) => return Err(e.into()),
        };
        ContextSnapshot::from_json(kind, &raw)
    }

    /// Remove the snapshot of `kind`; a missing file is fine.
    pub async fn discard(&self, kind: ContextKind) -> Result<()> {
        match fs::remove_file(self.path_for(kind)).await {
            Ok(()) => {
                debug!("Discarded {} context", kind);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn discard_all(&self) -> Result<()> {
        for kind in ContextKind::ALL {
            self.discard(kind).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DeleteSnapshot;
    use crate::crypto::PrivateKey;

    fn snapshot() -> ContextSnapshot {
        ContextSnapshot::Delete(DeleteSnapshot {
            admin_key: PrivateKey::generate().to_string(),
            existing_node_aliases: vec!["node1".into()],
            upgrade_zip_hash: "hash".into(),
            node_alias: "node1".into(),
        })
    }

    #[tokio::test]
    async fn test_save_load_discard() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContextStore::new(dir.path().join("contexts"));
        let saved = snapshot();

        let path = store.save(&saved).await.unwrap();
        assert!(path.ends_with("delete.json"));
        assert!(store.exists(ContextKind::Delete).await);
        assert_eq!(store.load(ContextKind::Delete).await.unwrap(), saved);

        // only the target file remains, no temp files
        let mut entries = std::fs::read_dir(store.dir()).unwrap();
        assert!(entries.next().is_some());
        assert!(entries.next().is_none());

        store.discard(ContextKind::Delete).await.unwrap();
        store.discard(ContextKind::Delete).await.unwrap();
        assert!(matches!(
            store.load(ContextKind::Delete).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContextStore::new(dir.path());
        std::fs::write(store.path_for(ContextKind::Update), "{\"adminKey\":\"x\"}").unwrap();

        assert!(matches!(
            store.load(ContextKind::Update).await,
            Err(Error::Context { .. })
        ));
    }
}
