use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::{
    auth::{
        claims::{ADMIN_ONLY, HR_ADMINS},
        Role,
    },
    state::AppState,
};

/// Single-file records: shared files, form templates, regulations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocKind {
    File,
    Form,
    Regulation,
}

impl DocKind {
    pub const ALL: [DocKind; 3] = [DocKind::File, DocKind::Form, DocKind::Regulation];

    pub fn table(self) -> &'static str {
        match self {
            DocKind::File => "files",
            DocKind::Form => "forms",
            DocKind::Regulation => "regulations",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            DocKind::File => "file",
            DocKind::Form => "form",
            DocKind::Regulation => "regulation",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DocKind::File => "File",
            DocKind::Form => "Form",
            DocKind::Regulation => "Regulation",
        }
    }

    /// Shared files are uploaded through `/upload`, the others through `/{slug}`.
    pub fn create_path(self) -> String {
        match self {
            DocKind::File => "/upload".into(),
            other => format!("/{}", other.slug()),
        }
    }

    pub fn writers(self) -> &'static [Role] {
        match self {
            DocKind::Form => ADMIN_ONLY,
            DocKind::File | DocKind::Regulation => HR_ADMINS,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Document {
    pub id: i64,
    pub name: String,
    pub file_name: String,
    /// Storage key of the uploaded object.
    pub file_path: String,
    pub file_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub name: String,
    pub file_name: String,
    pub file_path: String,
    pub file_type: String,
}

#[derive(Debug, Serialize)]
pub struct DocumentView {
    #[serde(flatten)]
    pub doc: Document,
    pub url: String,
}

impl Document {
    pub async fn view(self, state: &AppState) -> anyhow::Result<DocumentView> {
        let url = state.storage.public_url(&self.file_path).await?;
        Ok(DocumentView { doc: self, url })
    }
}
