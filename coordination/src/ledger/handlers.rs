//! Rollback handler trait and the one built-in implementation.
//!
//! Concrete `command_undo`/`database_restore`/`config_restore` handlers
//! are out of scope for this control plane (§6): the ledger dispatches
//! to whichever implementation the embedding application registers via
//! [`crate::ledger::Ledger::register_handler`]. Only `file_restore` is
//! provided here, since it has no external transport dependency.

use async_trait::async_trait;

use super::RollbackData;

#[async_trait]
pub trait RollbackHandler: Send + Sync {
    async fn rollback(&self, data: &RollbackData) -> Result<(), String>;

    /// Optional post-rollback check. Defaults to "no check performed".
    async fn verify(&self, _data: &RollbackData) -> bool {
        true
    }
}

pub struct FileRestoreHandler;

#[async_trait]
impl RollbackHandler for FileRestoreHandler {
    async fn rollback(&self, data: &RollbackData) -> Result<(), String> {
        let RollbackData::FileRestore { path, original_content } = data else {
            return Err("FileRestoreHandler received a non-file_restore payload".to_string());
        };
        match original_content {
            None => {
                if std::path::Path::new(path).exists() {
                    tokio::fs::remove_file(path).await.map_err(|e| e.to_string())?;
                }
                Ok(())
            }
            Some(content) => tokio::fs::write(path, content).await.map_err(|e| e.to_string()),
        }
    }

    async fn verify(&self, data: &RollbackData) -> bool {
        let RollbackData::FileRestore { path, original_content } = data else {
            return false;
        };
        match original_content {
            None => !std::path::Path::new(path).exists(),
            Some(content) => tokio::fs::read_to_string(path).await.map(|c| &c == content).unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn verify_confirms_deletion_for_newly_created_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.txt").to_string_lossy().to_string();
        let data = RollbackData::FileRestore { path: path.clone(), original_content: None };
        let handler = FileRestoreHandler;
        handler.rollback(&data).await.unwrap();
        assert!(handler.verify(&data).await);
    }

    #[tokio::test]
    async fn verify_confirms_restored_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.txt");
        std::fs::write(&path, "newer").unwrap();
        let data = RollbackData::FileRestore {
            path: path.to_string_lossy().to_string(),
            original_content: Some("older".to_string()),
        };
        let handler = FileRestoreHandler;
        handler.rollback(&data).await.unwrap();
        assert!(handler.verify(&data).await);
    }
}
