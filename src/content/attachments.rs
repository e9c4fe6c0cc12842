use anyhow::Context;
use serde::Serialize;
use tracing::{debug, info};

use super::form::Upload;
use crate::storage::StorageClient;

/// A stored object together with the URL browsers fetch it from.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Asset {
    pub key: String,
    pub url: String,
}

/// Storage key for an upload. The same file name under the same prefix maps
/// to the same key, so rows can end up sharing one object.
pub fn object_key(prefix: &str, file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let mut clean: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    clean = clean.trim_start_matches('.').to_string();
    if clean.is_empty() {
        clean = "upload".into();
    }
    format!("{prefix}/{clean}")
}

pub async fn store(
    storage: &dyn StorageClient,
    prefix: &str,
    upload: &Upload,
) -> anyhow::Result<String> {
    let key = object_key(prefix, &upload.file_name);
    storage
        .put_object(&key, upload.bytes.clone(), &upload.content_type)
        .await
        .with_context(|| format!("put_object {key}"))?;
    debug!(%key, size = upload.bytes.len(), "attachment stored");
    Ok(key)
}

/// Deletes `key` from storage when no other row references it.
/// Returns whether the object was removed.
pub async fn release_unreferenced(
    storage: &dyn StorageClient,
    key: &str,
    other_refs: i64,
) -> anyhow::Result<bool> {
    if key.is_empty() || other_refs > 0 {
        debug!(%key, other_refs, "attachment kept");
        return Ok(false);
    }
    storage
        .delete_object(key)
        .await
        .with_context(|| format!("delete_object {key}"))?;
    info!(%key, "attachment released");
    Ok(true)
}

pub async fn resolve(storage: &dyn StorageClient, key: &str) -> anyhow::Result<Asset> {
    let url = storage
        .public_url(key)
        .await
        .with_context(|| format!("public url for {key}"))?;
    Ok(Asset {
        key: key.to_string(),
        url,
    })
}

pub async fn resolve_opt(
    storage: &dyn StorageClient,
    key: Option<&str>,
) -> anyhow::Result<Option<Asset>> {
    match key.filter(|k| !k.is_empty()) {
        Some(k) => Ok(Some(resolve(storage, k).await?)),
        None => Ok(None),
    }
}

pub async fn resolve_all(storage: &dyn StorageClient, keys: &[String]) -> anyhow::Result<Vec<Asset>> {
    let mut out = Vec::with_capacity(keys.len());
    for k in keys {
        out.push(resolve(storage, k).await?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FakeStorage;

    #[test]
    fn object_key_strips_paths_and_odd_characters() {
        assert_eq!(object_key("articles", "photo.png"), "articles/photo.png");
        assert_eq!(object_key("articles", "../../etc/passwd"), "articles/passwd");
        assert_eq!(object_key("files", r"C:\docs\Q1 report.pdf"), "files/Q1_report.pdf");
        assert_eq!(object_key("files", ".."), "files/upload");
        assert_eq!(object_key("files", ""), "files/upload");
    }

    #[tokio::test]
    async fn release_only_when_unreferenced() {
        let storage = FakeStorage::default();
        storage
            .put_object("a/x.png", bytes::Bytes::from_static(b"1"), "image/png")
            .await
            .unwrap();

        assert!(!release_unreferenced(&storage, "a/x.png", 1).await.unwrap());
        assert!(storage.contains("a/x.png"));

        assert!(release_unreferenced(&storage, "a/x.png", 0).await.unwrap());
        assert!(!storage.contains("a/x.png"));
        assert!(!release_unreferenced(&storage, "", 0).await.unwrap());
    }
}
