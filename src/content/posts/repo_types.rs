use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

/// The post-shaped content kinds; each lives in its own table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostKind {
    Article,
    Security,
    Activity,
    Knowledge,
    Training,
}

impl PostKind {
    pub const ALL: [PostKind; 5] = [
        PostKind::Article,
        PostKind::Security,
        PostKind::Activity,
        PostKind::Knowledge,
        PostKind::Training,
    ];

    pub fn table(self) -> &'static str {
        match self {
            PostKind::Article => "articles",
            PostKind::Security => "securities",
            PostKind::Activity => "activities",
            PostKind::Knowledge => "knowledges",
            PostKind::Training => "trainings",
        }
    }

    /// Route segment for a single record, also the storage prefix.
    pub fn slug(self) -> &'static str {
        match self {
            PostKind::Article => "article",
            PostKind::Security => "security",
            PostKind::Activity => "activity",
            PostKind::Knowledge => "knowledge",
            PostKind::Training => "training",
        }
    }

    /// Route segment for the listing; matches the table name.
    pub fn plural(self) -> &'static str {
        self.table()
    }

    pub fn label(self) -> &'static str {
        match self {
            PostKind::Article => "Article",
            PostKind::Security => "Security",
            PostKind::Activity => "Activity",
            PostKind::Knowledge => "Knowledge",
            PostKind::Training => "Training",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub role_access: String,
    pub thumbnail: Option<String>,
    pub images: Vec<String>,
    pub video: Option<String>,
    pub gif: Option<String>,
    pub pdf: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Post {
    /// Every storage key the row points at, without duplicates.
    pub fn keys(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let singles = [&self.thumbnail, &self.video, &self.gif, &self.pdf];
        for k in singles.into_iter().flatten().chain(self.images.iter()) {
            if !k.is_empty() && !out.contains(k) {
                out.push(k.clone());
            }
        }
        out
    }

    pub fn references(&self, key: &str) -> bool {
        self.keys().iter().any(|k| k == key)
    }

    /// Knowledge visible to plain members.
    pub fn open_to_members(&self) -> bool {
        matches!(
            self.role_access.trim().to_ascii_lowercase().as_str(),
            "" | "all" | "user"
        )
    }

    pub fn draft(&self) -> PostDraft {
        PostDraft {
            title: self.title.clone(),
            content: self.content.clone(),
            role_access: self.role_access.clone(),
            thumbnail: self.thumbnail.clone(),
            images: self.images.clone(),
            video: self.video.clone(),
            gif: self.gif.clone(),
            pdf: self.pdf.clone(),
        }
    }
}

/// Column values written on insert or update.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    pub role_access: String,
    pub thumbnail: Option<String>,
    pub images: Vec<String>,
    pub video: Option<String>,
    pub gif: Option<String>,
    pub pdf: Option<String>,
}
