use std::path::{Path, PathBuf};

use anyhow::Context;
use axum::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::accounts::dto::AvatarUpload;
use crate::error::{ApiError, FieldError};

pub const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;

const ALLOWED_TYPES: [&str; 4] = ["jpeg", "jpg", "png", "gif"];

/// Destination for validated avatar bytes. Accounts record only the
/// relative `/avatar/<file>` path.
#[async_trait]
pub trait AvatarStore: Send + Sync {
    async fn save(&self, file_name: &str, data: Bytes) -> anyhow::Result<()>;
    async fn remove(&self, file_name: &str) -> anyhow::Result<()>;
}

pub struct DiskAvatarStore {
    dir: PathBuf,
}

impl DiskAvatarStore {
    pub async fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create avatar directory {}", dir.display()))?;
        Ok(Self { dir })
    }
}

#[async_trait]
impl AvatarStore for DiskAvatarStore {
    async fn save(&self, file_name: &str, data: Bytes) -> anyhow::Result<()> {
        let path = self.dir.join(file_name);
        tokio::fs::write(&path, &data)
            .await
            .with_context(|| format!("write avatar {}", path.display()))?;
        debug!(path = %path.display(), bytes = data.len(), "avatar written");
        Ok(())
    }

    async fn remove(&self, file_name: &str) -> anyhow::Result<()> {
        let path = self.dir.join(file_name);
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("remove avatar {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StoredAvatar {
    pub file_name: String,
    pub path: String,
}

/// Validate an uploaded avatar and persist it under a generated filename.
pub async fn store_avatar(
    store: &dyn AvatarStore,
    upload: &AvatarUpload,
) -> Result<StoredAvatar, ApiError> {
    let ext = validate(upload)?;
    let file_name = generate_file_name(&ext);
    store
        .save(&file_name, upload.data.clone())
        .await
        .map_err(ApiError::Internal)?;
    Ok(StoredAvatar {
        path: format!("/avatar/{file_name}"),
        file_name,
    })
}

/// Extension and declared content type must both match the image allow-list,
/// and the payload must stay under the size cap.
fn validate(upload: &AvatarUpload) -> Result<String, ApiError> {
    let ext =
        file_extension(&upload.file_name).filter(|ext| ALLOWED_TYPES.contains(&ext.as_str()));
    let mime_ok = ALLOWED_TYPES
        .iter()
        .any(|t| upload.content_type.contains(t));

    let ext = match (ext, mime_ok) {
        (Some(ext), true) => ext,
        _ => {
            return Err(ApiError::Validation(vec![FieldError::new(
                "avatar",
                "Only image files are allowed",
            )]))
        }
    };

    if upload.data.len() > MAX_AVATAR_BYTES {
        return Err(ApiError::Validation(vec![FieldError::new(
            "avatar",
            "File too large",
        )]));
    }

    Ok(ext)
}

fn file_extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

fn generate_file_name(ext: &str) -> String {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    format!("{}-{}.{}", millis, Uuid::new_v4(), ext)
}
