use tracing::{info, warn};

use super::{
    repo::PostStore,
    repo_types::{Post, PostDraft, PostKind},
};
use crate::{
    content::{attachments, form::FormData},
    error::{ApiError, ApiResult},
    storage::StorageClient,
};

/// Single-file attachment slots and their form names.
const SLOTS: [(Slot, &str, &str); 4] = [
    (Slot::Thumbnail, "thumbnail", "removeThumbnail"),
    (Slot::Video, "video", "removeVideo"),
    (Slot::Gif, "gif", "removeGif"),
    (Slot::Pdf, "pdf", "removePdf"),
];

#[derive(Clone, Copy)]
enum Slot {
    Thumbnail,
    Video,
    Gif,
    Pdf,
}

fn slot_mut(draft: &mut PostDraft, slot: Slot) -> &mut Option<String> {
    match slot {
        Slot::Thumbnail => &mut draft.thumbnail,
        Slot::Video => &mut draft.video,
        Slot::Gif => &mut draft.gif,
        Slot::Pdf => &mut draft.pdf,
    }
}

fn role_access(form: &FormData) -> Option<String> {
    form.text("role_access").or_else(|| form.text("roleaccess"))
}

fn image_uploads(form: &FormData) -> Vec<&crate::content::form::Upload> {
    let mut files = form.files("images");
    files.extend(form.files("image"));
    files
}

pub async fn create(
    posts: &dyn PostStore,
    storage: &dyn StorageClient,
    kind: PostKind,
    form: &FormData,
) -> ApiResult<Post> {
    let title = form
        .text("title")
        .ok_or_else(|| ApiError::validation("Title is required"))?;

    let mut draft = PostDraft {
        title,
        content: form.text("content").unwrap_or_default(),
        role_access: role_access(form).unwrap_or_default(),
        ..PostDraft::default()
    };
    for (slot, field, _) in SLOTS {
        if let Some(upload) = form.file(field) {
            *slot_mut(&mut draft, slot) = Some(attachments::store(storage, kind.slug(), upload).await?);
        }
    }
    for upload in image_uploads(form) {
        let key = attachments::store(storage, kind.slug(), upload).await?;
        if !draft.images.contains(&key) {
            draft.images.push(key);
        }
    }

    let post = posts.insert(kind, &draft).await?;
    info!(kind = kind.slug(), id = post.id, "post created");
    Ok(post)
}

/// Merges the form into the stored row. Blank text keeps the current value,
/// an upload replaces its slot, a `remove*` flag clears it. Keys the row no
/// longer points at are released once nothing else references them.
pub async fn update(
    posts: &dyn PostStore,
    storage: &dyn StorageClient,
    kind: PostKind,
    id: i64,
    form: &FormData,
) -> ApiResult<Post> {
    let current = posts
        .find(kind, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("{} not found", kind.label())))?;

    let mut draft = current.draft();
    if let Some(title) = form.text("title") {
        draft.title = title;
    }
    if let Some(content) = form.text("content") {
        draft.content = content;
    }
    if let Some(access) = role_access(form) {
        draft.role_access = access;
    }

    for (slot, field, remove) in SLOTS {
        if let Some(upload) = form.file(field) {
            *slot_mut(&mut draft, slot) = Some(attachments::store(storage, kind.slug(), upload).await?);
        } else if form.flag(remove) {
            *slot_mut(&mut draft, slot) = None;
        }
    }
    let uploads = image_uploads(form);
    if !uploads.is_empty() {
        draft.images.clear();
        for upload in uploads {
            let key = attachments::store(storage, kind.slug(), upload).await?;
            if !draft.images.contains(&key) {
                draft.images.push(key);
            }
        }
    } else if form.flag("removeImage") || form.flag("removeImages") {
        draft.images.clear();
    }

    let updated = posts
        .update(kind, id, &draft)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("{} not found", kind.label())))?;

    let kept = updated.keys();
    for key in current.keys().into_iter().filter(|k| !kept.contains(k)) {
        if let Err(e) = release(posts, storage, kind, &key, None).await {
            warn!(error = %e, %key, "old attachment not released");
        }
    }

    info!(kind = kind.slug(), id, "post updated");
    Ok(updated)
}

pub async fn delete(
    posts: &dyn PostStore,
    storage: &dyn StorageClient,
    kind: PostKind,
    id: i64,
) -> ApiResult<()> {
    let post = posts
        .find(kind, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("{} not found", kind.label())))?;

    for key in post.keys() {
        release(posts, storage, kind, &key, Some(id)).await?;
    }
    posts.delete(kind, id).await?;
    info!(kind = kind.slug(), id, "post deleted");
    Ok(())
}

async fn release(
    posts: &dyn PostStore,
    storage: &dyn StorageClient,
    kind: PostKind,
    key: &str,
    excluding: Option<i64>,
) -> anyhow::Result<bool> {
    let refs = posts.references(kind, key, excluding).await?;
    attachments::release_unreferenced(storage, key, refs).await
}

/// Knowledge rows a plain member may read.
pub async fn knowledge_for_members(posts: &dyn PostStore) -> anyhow::Result<Vec<Post>> {
    Ok(posts
        .list(PostKind::Knowledge)
        .await?
        .into_iter()
        .filter(Post::open_to_members)
        .collect())
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::{
        content::{form::Upload, posts::repo::MemoryPostStore},
        state::FakeStorage,
    };

    fn form(title: &str, files: &[(&str, &str)]) -> FormData {
        let mut f = FormData::default();
        f.fields.insert("title".into(), title.into());
        for (field, name) in files {
            f.files.push(Upload {
                field: field.to_string(),
                file_name: name.to_string(),
                content_type: "image/png".into(),
                bytes: Bytes::from_static(b"png"),
            });
        }
        f
    }

    #[tokio::test]
    async fn shared_image_survives_until_last_article_is_deleted() {
        let store = MemoryPostStore::default();
        let storage = FakeStorage::default();
        let kind = PostKind::Article;

        let first = create(&store, &storage, kind, &form("one", &[("images", "team.png")]))
            .await
            .unwrap();
        let second = create(&store, &storage, kind, &form("two", &[("images", "team.png")]))
            .await
            .unwrap();
        assert_eq!(first.images, vec!["article/team.png".to_string()]);
        assert_eq!(second.images, first.images);

        delete(&store, &storage, kind, first.id).await.unwrap();
        assert!(storage.contains("article/team.png"));
        assert!(storage.deleted().is_empty());

        delete(&store, &storage, kind, second.id).await.unwrap();
        assert!(!storage.contains("article/team.png"));
        assert_eq!(storage.deleted(), vec!["article/team.png".to_string()]);
    }

    #[tokio::test]
    async fn same_key_in_another_kind_does_not_keep_the_asset() {
        let store = MemoryPostStore::default();
        let storage = FakeStorage::default();

        let article = create(&store, &storage, PostKind::Article, &form("a", &[("pdf", "x.pdf")]))
            .await
            .unwrap();
        create(&store, &storage, PostKind::Training, &form("t", &[("pdf", "x.pdf")]))
            .await
            .unwrap();

        delete(&store, &storage, PostKind::Article, article.id).await.unwrap();
        assert!(!storage.contains("article/x.pdf"));
        assert!(storage.contains("training/x.pdf"));
    }

    #[tokio::test]
    async fn update_replaces_and_removes_slots() {
        let store = MemoryPostStore::default();
        let storage = FakeStorage::default();
        let kind = PostKind::Training;

        let post = create(
            &store,
            &storage,
            kind,
            &form("intro", &[("thumbnail", "old.png"), ("video", "clip.mp4")]),
        )
        .await
        .unwrap();

        let mut changes = form("", &[("thumbnail", "new.png")]);
        changes.fields.insert("removeVideo".into(), "true".into());
        let updated = update(&store, &storage, kind, post.id, &changes).await.unwrap();

        assert_eq!(updated.title, "intro");
        assert_eq!(updated.thumbnail.as_deref(), Some("training/new.png"));
        assert_eq!(updated.video, None);
        assert!(!storage.contains("training/old.png"));
        assert!(!storage.contains("training/clip.mp4"));
        assert!(storage.contains("training/new.png"));
    }

    #[tokio::test]
    async fn missing_title_and_missing_row() {
        let store = MemoryPostStore::default();
        let storage = FakeStorage::default();

        let err = create(&store, &storage, PostKind::Security, &form("  ", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = delete(&store, &storage, PostKind::Security, 42).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn members_only_see_open_knowledge() {
        let store = MemoryPostStore::default();
        let storage = FakeStorage::default();
        for access in ["", "user", "adminit"] {
            let mut f = form("k", &[]);
            f.fields.insert("role_access".into(), access.into());
            create(&store, &storage, PostKind::Knowledge, &f).await.unwrap();
        }
        let visible = knowledge_for_members(&store).await.unwrap();
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|p| p.role_access != "adminit"));
    }
}
