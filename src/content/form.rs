use std::collections::HashMap;

use axum::extract::Multipart;
use bytes::Bytes;

use crate::error::{ApiError, ApiResult};

/// One uploaded file part.
#[derive(Debug, Clone)]
pub struct Upload {
    pub field: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// A drained multipart body: text fields by name, file parts in arrival order.
#[derive(Debug, Default)]
pub struct FormData {
    pub fields: HashMap<String, String>,
    pub files: Vec<Upload>,
}

impl FormData {
    pub async fn read(mut mp: Multipart) -> ApiResult<Self> {
        let mut form = FormData::default();
        while let Some(field) = mp
            .next_field()
            .await
            .map_err(|e| ApiError::validation(format!("Invalid form data: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let content_type = field
                        .content_type()
                        .map(str::to_string)
                        .unwrap_or_else(|| "application/octet-stream".into());
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::validation(format!("Invalid upload: {e}")))?;
                    // browsers send an empty part for an untouched file input
                    if file_name.is_empty() && bytes.is_empty() {
                        continue;
                    }
                    form.files.push(Upload {
                        field: name,
                        file_name,
                        content_type,
                        bytes,
                    });
                }
                None => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| ApiError::validation(format!("Invalid form field: {e}")))?;
                    form.fields.insert(name, text);
                }
            }
        }
        Ok(form)
    }

    /// Trimmed, non-empty text value.
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(
            self.fields.get(name).map(|v| v.trim().to_ascii_lowercase()),
            Some(v) if v == "true" || v == "1" || v == "on"
        )
    }

    /// First file sent under `name`.
    pub fn file(&self, name: &str) -> Option<&Upload> {
        self.files.iter().find(|f| f.field == name)
    }

    /// Every file sent under `name` (also accepts the `name[]` spelling).
    pub fn files(&self, name: &str) -> Vec<&Upload> {
        let bracketed = format!("{name}[]");
        self.files
            .iter()
            .filter(|f| f.field == name || f.field == bracketed)
            .collect()
    }
}
