use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::{
    auth::{claims::ALL_ADMINS, guarded},
    content::{
        attachments::{self, Asset},
        form::FormData,
        UPLOAD_LIMIT,
    },
    error::{ApiError, ApiResult},
    state::AppState,
};

const KEY: &str = "popup";
const PREFIX: &str = "popup";

/// Ordered storage keys of the popup gallery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Popup {
    #[serde(default)]
    pub images: Vec<String>,
}

impl Popup {
    /// Appends keys not already shown; returns the ones added.
    pub fn append(&mut self, keys: Vec<String>) -> Vec<String> {
        let mut added = Vec::new();
        for key in keys {
            if !self.images.contains(&key) {
                self.images.push(key.clone());
                added.push(key);
            }
        }
        added
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.images.len();
        self.images.retain(|k| k != key);
        self.images.len() != before
    }

    /// Replaces the order; `requested` must hold exactly the current keys.
    pub fn reorder(&mut self, requested: Vec<String>) -> ApiResult<()> {
        let mut have = self.images.clone();
        let mut want = requested.clone();
        have.sort();
        want.sort();
        if have != want {
            return Err(ApiError::validation(
                "images must list every current popup image exactly once",
            ));
        }
        self.images = requested;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct PopupView {
    pub images: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
pub struct RemoveImage {
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Deserialize)]
pub struct OrderImages {
    #[serde(default)]
    pub images: Vec<String>,
}

pub fn routes(state: &AppState) -> Router<AppState> {
    let public = Router::new().route("/popup", get(get_popup));

    let admins = Router::new()
        .route(
            "/popup",
            post(upload_images)
                .layer(DefaultBodyLimit::max(UPLOAD_LIMIT))
                .delete(delete_image),
        )
        .route("/popup/order", post(order_images));

    public.merge(guarded(state, ALL_ADMINS, admins))
}

#[instrument(skip(state))]
pub async fn get_popup(State(state): State<AppState>) -> ApiResult<Json<PopupView>> {
    let popup: Popup = super::load(&state.db, KEY).await?;
    let images = attachments::resolve_all(state.storage.as_ref(), &popup.images).await?;
    Ok(Json(PopupView { images }))
}

#[instrument(skip(state, mp))]
pub async fn upload_images(State(state): State<AppState>, mp: Multipart) -> ApiResult<Json<Value>> {
    let form = FormData::read(mp).await?;
    let uploads = form.files("images");
    if uploads.is_empty() {
        return Err(ApiError::validation("No images uploaded"));
    }

    let mut keys = Vec::with_capacity(uploads.len());
    for upload in uploads {
        keys.push(attachments::store(state.storage.as_ref(), PREFIX, upload).await?);
    }

    let mut popup: Popup = super::load(&state.db, KEY).await?;
    let added = popup.append(keys.clone());
    super::save(&state.db, KEY, &popup).await?;
    info!(added = added.len(), total = popup.images.len(), "popup images uploaded");
    Ok(Json(json!({ "message": "Images uploaded", "paths": keys })))
}

#[instrument(skip(state))]
pub async fn delete_image(
    State(state): State<AppState>,
    Json(body): Json<RemoveImage>,
) -> ApiResult<Json<Value>> {
    let key = body.image.trim();
    if key.is_empty() {
        return Err(ApiError::validation("image is required"));
    }
    let mut popup: Popup = super::load(&state.db, KEY).await?;
    if !popup.remove(key) {
        return Err(ApiError::not_found("Image not found"));
    }
    super::save(&state.db, KEY, &popup).await?;
    if let Err(e) = attachments::release_unreferenced(state.storage.as_ref(), key, 0).await {
        warn!(error = ?e, %key, "popup image left in storage");
    }
    Ok(Json(json!({ "message": "Image deleted", "image": key })))
}

#[instrument(skip(state))]
pub async fn order_images(
    State(state): State<AppState>,
    Json(body): Json<OrderImages>,
) -> ApiResult<Json<Value>> {
    if body.images.is_empty() {
        return Err(ApiError::validation("images is required"));
    }
    let mut popup: Popup = super::load(&state.db, KEY).await?;
    popup.reorder(body.images)?;
    super::save(&state.db, KEY, &popup).await?;
    Ok(Json(json!({ "message": "Order updated", "images": popup.images })))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{
            header::{CONTENT_TYPE, COOKIE},
            Request, StatusCode,
        },
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{
        app::build_app,
        auth::{jwt::JwtKeys, Role},
    };

    fn popup(keys: &[&str]) -> Popup {
        Popup {
            images: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn append_skips_keys_already_shown() {
        let mut p = popup(&["popup/a.png"]);
        let added = p.append(keys(&["popup/a.png", "popup/b.png"]));
        assert_eq!(added, keys(&["popup/b.png"]));
        assert_eq!(p.images, keys(&["popup/a.png", "popup/b.png"]));
    }

    #[test]
    fn remove_reports_missing_images() {
        let mut p = popup(&["popup/a.png", "popup/b.png"]);
        assert!(p.remove("popup/a.png"));
        assert!(!p.remove("popup/a.png"));
        assert_eq!(p.images, keys(&["popup/b.png"]));
    }

    #[test]
    fn reorder_requires_same_set() {
        let mut p = popup(&["popup/a.png", "popup/b.png", "popup/c.png"]);
        p.reorder(keys(&["popup/c.png", "popup/a.png", "popup/b.png"]))
            .unwrap();
        assert_eq!(p.images[0], "popup/c.png");

        for bad in [
            keys(&["popup/c.png", "popup/a.png"]),
            keys(&["popup/c.png", "popup/a.png", "popup/a.png"]),
            keys(&["popup/c.png", "popup/a.png", "popup/x.png"]),
        ] {
            assert!(matches!(p.reorder(bad), Err(ApiError::Validation(_))));
        }
        assert_eq!(p.images[0], "popup/c.png");
    }

    #[tokio::test]
    async fn popup_writes_need_an_admin_and_a_body() {
        let state = AppState::fake();
        let issued = JwtKeys::new(&state.config.jwt).issue(1, "root", Role::AdminHr).unwrap();
        let admin = format!("auth_token={}; session_id={}", issued.token, issued.session_id);
        let app = build_app(state);

        let req = Request::post("/popup/order")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"images": []}"#))
            .unwrap();
        assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::UNAUTHORIZED);

        let req = Request::post("/popup/order")
            .header(COOKIE, admin.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"images": []}"#))
            .unwrap();
        assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::BAD_REQUEST);

        let req = Request::delete("/popup")
            .header(COOKIE, admin)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"image": "  "}"#))
            .unwrap();
        assert_eq!(app.oneshot(req).await.unwrap().status(), StatusCode::BAD_REQUEST);
    }
}
