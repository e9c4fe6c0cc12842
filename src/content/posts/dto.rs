use serde::Serialize;
use time::OffsetDateTime;

use super::repo_types::Post;
use crate::{
    content::attachments::{self, Asset},
    storage::StorageClient,
};

/// A post as served to clients, with attachment keys resolved to URLs.
#[derive(Debug, Serialize)]
pub struct PostView {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub role_access: String,
    pub thumbnail: Option<Asset>,
    pub images: Vec<Asset>,
    pub video: Option<Asset>,
    pub gif: Option<Asset>,
    pub pdf: Option<Asset>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl PostView {
    pub async fn build(storage: &dyn StorageClient, post: Post) -> anyhow::Result<Self> {
        Ok(Self {
            thumbnail: attachments::resolve_opt(storage, post.thumbnail.as_deref()).await?,
            images: attachments::resolve_all(storage, &post.images).await?,
            video: attachments::resolve_opt(storage, post.video.as_deref()).await?,
            gif: attachments::resolve_opt(storage, post.gif.as_deref()).await?,
            pdf: attachments::resolve_opt(storage, post.pdf.as_deref()).await?,
            id: post.id,
            title: post.title,
            content: post.content,
            role_access: post.role_access,
            created_at: post.created_at,
            updated_at: post.updated_at,
        })
    }

    pub async fn build_all(storage: &dyn StorageClient, posts: Vec<Post>) -> anyhow::Result<Vec<Self>> {
        let mut out = Vec::with_capacity(posts.len());
        for p in posts {
            out.push(Self::build(storage, p).await?);
        }
        Ok(out)
    }
}
