//! Publication channel for model artifacts.
//!
//! The serving location is an interchangeable collaborator: local disk, a
//! mounted share, or a remote transfer target all sit behind `ModelTransport`.
//! Delivery is all-or-nothing per version and hash-verified after copy.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;

/// One artifact file to deliver, with its expected content hash.
#[derive(Debug, Clone)]
pub struct PublishFile {
    pub name: String,
    pub bytes: Vec<u8>,
    pub sha256: String,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Delivers a version's full artifact set to the serving location.
#[async_trait::async_trait]
pub trait ModelTransport: Send + Sync {
    /// Publish every file for `version_id`, or fail leaving no partial
    /// version visible at the destination.
    async fn publish(&self, version_id: &str, files: &[PublishFile]) -> Result<()>;
}

/// Directory-based transport: stage into a hidden directory, verify every
/// file's hash, then make the version visible with a single rename.
pub struct DirTransport {
    dest: PathBuf,
}

impl DirTransport {
    pub fn new(dest: impl Into<PathBuf>) -> Self {
        Self { dest: dest.into() }
    }
}

#[async_trait::async_trait]
impl ModelTransport for DirTransport {
    async fn publish(&self, version_id: &str, files: &[PublishFile]) -> Result<()> {
        let staging = self.dest.join(format!(".staging-{}", version_id));
        let final_dir = self.dest.join(version_id);

        let result = async {
            fs::create_dir_all(&staging).await?;
            for file in files {
                let path = staging.join(&file.name);
                fs::write(&path, &file.bytes).await?;
                let written = fs::read(&path).await?;
                let actual = sha256_hex(&written);
                if actual != file.sha256 {
                    anyhow::bail!(
                        "hash mismatch after copy for {}: expected {}, got {}",
                        file.name,
                        file.sha256,
                        actual
                    );
                }
            }
            // Republication after a crashed attempt replaces the old tree.
            if fs::metadata(&final_dir).await.is_ok() {
                fs::remove_dir_all(&final_dir).await?;
            }
            fs::rename(&staging, &final_dir)
                .await
                .context("activating staged version")?;
            Ok(())
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_dir_all(&staging).await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let transport = DirTransport::new(dir.path());

        let good = PublishFile {
            name: "model.json".to_string(),
            bytes: b"{}".to_vec(),
            sha256: sha256_hex(b"{}"),
        };
        let bad = PublishFile {
            name: "scaler.json".to_string(),
            bytes: b"{}".to_vec(),
            sha256: "deadbeef".to_string(),
        };

        // Corrupt expected hash: nothing becomes visible.
        let err = transport.publish("v1", &[good.clone(), bad]).await;
        assert!(err.is_err());
        assert!(!dir.path().join("v1").exists());
        assert!(!dir.path().join(".staging-v1").exists());

        transport.publish("v1", &[good]).await.unwrap();
        assert!(dir.path().join("v1/model.json").exists());
    }
}
