//! Keyed storage for rendered QR images
//!
//! Everything is keyed by bill number alone. Next to each image the store keeps the
//! encoded payload it was rendered from, so a missing image can be rendered again.

use async_trait::async_trait;
use khqr_common::{BillNumber, Error, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn put_payload(&self, bill: &BillNumber, qr: &str) -> Result<()>;

    async fn payload(&self, bill: &BillNumber) -> Result<Option<String>>;

    async fn put_image(&self, bill: &BillNumber, png: &[u8]) -> Result<()>;

    async fn image(&self, bill: &BillNumber) -> Result<Option<Vec<u8>>>;
}

/// Files in one directory: `{bill}.png` and `{bill}.qr`
pub struct FsImageStore {
    dir: PathBuf,
}

impl FsImageStore {
    /// Create the store, creating the directory if needed
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn image_path(&self, bill: &BillNumber) -> PathBuf {
        self.dir.join(format!("{}.png", bill))
    }

    fn payload_path(&self, bill: &BillNumber) -> PathBuf {
        self.dir.join(format!("{}.qr", bill))
    }

    /// Write through a temporary file so readers never see a partial file
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("image");
        let tmp = self
            .dir
            .join(format!(".{}.{:016x}.tmp", file_name, rand::random::<u64>()));

        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| Error::Render(format!("Failed to write {}: {}", file_name, e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::Render(format!("Failed to store {}: {}", file_name, e)))?;

        debug!("Stored {}", path.display());
        Ok(())
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn put_payload(&self, bill: &BillNumber, qr: &str) -> Result<()> {
        self.write_atomic(&self.payload_path(bill), qr.as_bytes()).await
    }

    async fn payload(&self, bill: &BillNumber) -> Result<Option<String>> {
        match read_optional(&self.payload_path(bill)).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| Error::Render(format!("Stored payload for {} is not UTF-8: {}", bill, e))),
            None => Ok(None),
        }
    }

    async fn put_image(&self, bill: &BillNumber, png: &[u8]) -> Result<()> {
        self.write_atomic(&self.image_path(bill), png).await
    }

    async fn image(&self, bill: &BillNumber) -> Result<Option<Vec<u8>>> {
        read_optional(&self.image_path(bill)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(dir.path().join("image")).await.unwrap();
        let bill = BillNumber::parse("NV1").unwrap();

        assert!(store.image(&bill).await.unwrap().is_none());
        assert!(store.payload(&bill).await.unwrap().is_none());

        store.put_payload(&bill, "000201").await.unwrap();
        store.put_image(&bill, &[1, 2, 3]).await.unwrap();

        assert_eq!(store.payload(&bill).await.unwrap().as_deref(), Some("000201"));
        assert_eq!(store.image(&bill).await.unwrap(), Some(vec![1, 2, 3]));
        assert!(store.image_path(&bill).ends_with("NV1.png"));
    }

    #[tokio::test]
    async fn test_no_temporary_files_left() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(dir.path()).await.unwrap();
        let bill = BillNumber::parse("NV2").unwrap();
        store.put_image(&bill, &[0]).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["NV2.png".to_string()]);
    }
}
