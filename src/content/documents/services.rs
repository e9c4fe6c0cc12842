use tracing::{info, warn};

use super::{
    repo::DocumentStore,
    repo_types::{DocKind, Document, NewDocument},
};
use crate::{
    content::{attachments, form::FormData},
    error::{ApiError, ApiResult},
    storage::StorageClient,
};

pub async fn load(store: &dyn DocumentStore, kind: DocKind, id: i64) -> ApiResult<Document> {
    store
        .find(kind, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("{} not found", kind.label())))
}

/// Stores the `file` part; `name` defaults to the uploaded file name.
pub async fn create(
    store: &dyn DocumentStore,
    storage: &dyn StorageClient,
    kind: DocKind,
    form: &FormData,
) -> ApiResult<Document> {
    let upload = form
        .file("file")
        .ok_or_else(|| ApiError::validation("File is required"))?;
    let key = attachments::store(storage, kind.slug(), upload).await?;
    let doc = store
        .insert(
            kind,
            &NewDocument {
                name: form.text("name").unwrap_or_else(|| upload.file_name.clone()),
                file_name: upload.file_name.clone(),
                file_path: key,
                file_type: upload.content_type.clone(),
            },
        )
        .await?;
    info!(kind = kind.slug(), id = doc.id, key = %doc.file_path, "document uploaded");
    Ok(doc)
}

/// Renames and/or swaps the file. A replaced object is released once no
/// other row of the kind points at it; failures there are only logged.
pub async fn update(
    store: &dyn DocumentStore,
    storage: &dyn StorageClient,
    kind: DocKind,
    id: i64,
    form: &FormData,
) -> ApiResult<Document> {
    let mut doc = load(store, kind, id).await?;
    let old_key = doc.file_path.clone();

    if let Some(name) = form.text("name") {
        doc.name = name;
    }
    if let Some(upload) = form.file("file") {
        doc.file_path = attachments::store(storage, kind.slug(), upload).await?;
        doc.file_name = upload.file_name.clone();
        doc.file_type = upload.content_type.clone();
    }

    if !store.save(kind, &doc).await? {
        return Err(ApiError::not_found(format!("{} not found", kind.label())));
    }

    if doc.file_path != old_key {
        let released = async {
            let refs = store.references(kind, &old_key, id).await?;
            attachments::release_unreferenced(storage, &old_key, refs).await
        };
        if let Err(e) = released.await {
            warn!(error = %e, key = %old_key, "old document not released");
        }
    }
    Ok(doc)
}

pub async fn delete(
    store: &dyn DocumentStore,
    storage: &dyn StorageClient,
    kind: DocKind,
    id: i64,
) -> ApiResult<()> {
    let doc = load(store, kind, id).await?;
    let refs = store.references(kind, &doc.file_path, id).await?;
    attachments::release_unreferenced(storage, &doc.file_path, refs).await?;
    store.delete(kind, id).await?;
    info!(kind = kind.slug(), id, "document deleted");
    Ok(())
}
