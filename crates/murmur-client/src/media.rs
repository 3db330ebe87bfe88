//! Media upload boundary.
//!
//! Compression and the transfer itself live outside the engine; the client
//! only hands an upload to a [`MediaUploader`] and stores the returned URL.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use murmur_shared::constants::{
    MEDIA_PREFIX_AUDIO, MEDIA_PREFIX_AVATARS, MEDIA_PREFIX_GROUPS, MEDIA_PREFIX_IMAGES, MEDIA_PREFIX_VIDEOS,
};
use murmur_shared::{ConversationKey, GroupId, MediaKind, UserId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MediaError {
    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Unsupported media type: {0}")]
    Unsupported(String),

    #[error("Media payload is empty")]
    Empty,
}

/// A file to attach to a message or group.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaUpload {
    pub kind: MediaKind,
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
    /// Voice note length in seconds.
    pub duration: Option<f64>,
}

impl MediaUpload {
    pub fn new(kind: MediaKind, file_name: impl Into<String>, content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            file_name: file_name.into(),
            content_type: content_type.into(),
            data: data.into(),
            duration: None,
        }
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration = Some(secs);
        self
    }

    /// Reject uploads that cannot possibly succeed.
    pub fn validate(&self) -> Result<(), MediaError> {
        if self.data.is_empty() {
            return Err(MediaError::Empty);
        }
        let family = self.content_type.split('/').next().unwrap_or_default();
        let expected = match self.kind {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Voice => "audio",
        };
        if family != expected {
            return Err(MediaError::Unsupported(self.content_type.clone()));
        }
        Ok(())
    }
}

/// Storage prefix for message attachments of `kind` in `conversation`.
pub fn message_prefix(kind: MediaKind, conversation: &ConversationKey) -> String {
    let root = match kind {
        MediaKind::Image => MEDIA_PREFIX_IMAGES,
        MediaKind::Video => MEDIA_PREFIX_VIDEOS,
        MediaKind::Voice => MEDIA_PREFIX_AUDIO,
    };
    format!("{root}/{conversation}")
}

pub fn group_prefix(group: &GroupId) -> String {
    format!("{MEDIA_PREFIX_GROUPS}/{group}")
}

pub fn avatar_prefix(user: &UserId) -> String {
    format!("{MEDIA_PREFIX_AVATARS}/{user}")
}

#[async_trait]
pub trait MediaUploader: Send + Sync {
    /// Store `upload` under `prefix` and return its public URL.
    async fn upload(&self, upload: MediaUpload, prefix: &str) -> Result<String, MediaError>;

    async fn delete(&self, url: &str) -> Result<(), MediaError>;
}

/// Uploader that keeps objects in memory. Handy for tests and offline runs.
#[derive(Debug, Default)]
pub struct MemoryUploader {
    objects: Mutex<BTreeMap<String, Bytes>>,
    fail_uploads: Mutex<bool>,
}

impl MemoryUploader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent upload fail.
    pub fn fail_uploads(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_uploads.lock() {
            *flag = fail;
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.objects.lock().is_ok_and(|o| o.contains_key(url))
    }
}

#[async_trait]
impl MediaUploader for MemoryUploader {
    async fn upload(&self, upload: MediaUpload, prefix: &str) -> Result<String, MediaError> {
        upload.validate()?;
        if self.fail_uploads.lock().map(|f| *f).unwrap_or(false) {
            return Err(MediaError::Upload("storage rejected the object".into()));
        }
        let mut objects = self
            .objects
            .lock()
            .map_err(|e| MediaError::Upload(format!("lock poisoned: {e}")))?;
        let url = format!("memory://{prefix}/{}-{}", objects.len(), upload.file_name);
        objects.insert(url.clone(), upload.data);
        Ok(url)
    }

    async fn delete(&self, url: &str) -> Result<(), MediaError> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|e| MediaError::Upload(format!("lock poisoned: {e}")))?;
        objects.remove(url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> MediaUpload {
        MediaUpload::new(MediaKind::Image, "cat.jpg", "image/jpeg", vec![1u8, 2, 3])
    }

    #[test]
    fn test_prefixes() {
        let key = ConversationKey::from("A_B");
        assert_eq!(message_prefix(MediaKind::Image, &key), "chat_images/A_B");
        assert_eq!(message_prefix(MediaKind::Voice, &key), "chat_audio/A_B");
        assert_eq!(message_prefix(MediaKind::Video, &key), "chat_videos/A_B");
        assert_eq!(group_prefix(&GroupId::new("g1")), "groups/g1");
    }

    #[test]
    fn test_validate() {
        assert!(image().validate().is_ok());
        let empty = MediaUpload::new(MediaKind::Image, "x.jpg", "image/jpeg", Vec::<u8>::new());
        assert_eq!(empty.validate(), Err(MediaError::Empty));
        let wrong = MediaUpload::new(MediaKind::Voice, "x.jpg", "image/jpeg", vec![1u8]);
        assert!(matches!(wrong.validate(), Err(MediaError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_memory_uploader_round() {
        let uploader = MemoryUploader::new();
        let url = uploader.upload(image(), "chat_images/A_B").await.unwrap();
        assert!(url.starts_with("memory://chat_images/A_B/"));
        assert!(uploader.contains(&url));
        uploader.delete(&url).await.unwrap();
        assert!(!uploader.contains(&url));

        uploader.fail_uploads(true);
        assert!(uploader.upload(image(), "chat_images/A_B").await.is_err());
        assert!(uploader.urls().is_empty());
    }
}
