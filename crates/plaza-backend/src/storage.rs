//! Object storage helpers

use serde::{Deserialize, Serialize};

/// A file to upload
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upload {
    /// Original file name (used to build object paths)
    pub file_name: String,
    /// MIME type sent with the upload
    pub content_type: String,
    /// File contents
    pub bytes: Vec<u8>,
}

impl Upload {
    /// Create an upload, guessing the content type from the extension
    #[must_use]
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = guess_content_type(&file_name).to_string();
        Self {
            file_name,
            content_type,
            bytes,
        }
    }

    /// Override the content type
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Read a file from disk
    pub async fn from_path(path: &std::path::Path) -> Result<Self, crate::BackendError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        Ok(Self::new(file_name, bytes))
    }

    /// Size in bytes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the file is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for Upload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

fn guess_content_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Public URL of an object: `{base}/storage/v1/object/public/{bucket}/{path}`
#[must_use]
pub fn public_url(base_url: &str, bucket: &str, path: &str) -> String {
    format!(
        "{}/storage/v1/object/public/{}/{}",
        base_url.trim_end_matches('/'),
        bucket,
        path.trim_start_matches('/')
    )
}

/// Recover the object path from a public URL of `bucket`
///
/// Returns `None` when the URL does not point into that bucket.
#[must_use]
pub fn path_from_public_url(url: &str, bucket: &str) -> Option<String> {
    let marker = format!("/object/public/{bucket}/");
    let mut parts = url.split(marker.as_str());
    let _prefix = parts.next()?;
    let path = parts.next()?;
    if parts.next().is_some() || path.is_empty() {
        return None;
    }
    Some(path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_from_extension() {
        assert_eq!(Upload::new("cat.PNG", vec![1]).content_type, "image/png");
        assert_eq!(Upload::new("a.jpeg", vec![]).content_type, "image/jpeg");
        assert_eq!(
            Upload::new("notes", vec![]).content_type,
            "application/octet-stream"
        );
    }

    #[test]
    fn public_url_and_back() {
        let url = public_url("https://x.supabase.co/", "post.imgs", "u1/17_cat.png");
        assert_eq!(
            url,
            "https://x.supabase.co/storage/v1/object/public/post.imgs/u1/17_cat.png"
        );
        assert_eq!(
            path_from_public_url(&url, "post.imgs").as_deref(),
            Some("u1/17_cat.png")
        );
    }

    #[test]
    fn path_from_foreign_url_is_none() {
        let url = public_url("https://x.supabase.co", "avatars", "u1_17");
        assert_eq!(path_from_public_url(&url, "post.imgs"), None);
        assert_eq!(path_from_public_url("not a url", "post.imgs"), None);
        assert_eq!(
            path_from_public_url("https://x/object/public/post.imgs/", "post.imgs"),
            None
        );
    }

    #[tokio::test]
    async fn upload_from_path_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.gif");
        tokio::fs::write(&path, b"GIF89a").await.unwrap();

        let upload = Upload::from_path(&path).await.unwrap();
        assert_eq!(upload.file_name, "photo.gif");
        assert_eq!(upload.content_type, "image/gif");
        assert_eq!(upload.len(), 6);
    }
}
