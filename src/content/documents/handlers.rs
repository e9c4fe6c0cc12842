use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header::LOCATION, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::instrument;

use super::{
    repo_types::{DocKind, DocumentView},
    services,
};
use crate::{
    auth::{claims::MEMBERS, guarded},
    content::{form::FormData, UPLOAD_LIMIT},
    error::ApiResult,
    state::AppState,
};

pub fn routes(state: &AppState) -> Router<AppState> {
    DocKind::ALL
        .into_iter()
        .fold(Router::new(), |router, kind| router.merge(kind_routes(state, kind)))
}

fn kind_routes(state: &AppState, kind: DocKind) -> Router<AppState> {
    let item = format!("/{}/:id", kind.slug());

    let read = Router::new()
        .route(
            &format!("/{}", kind.table()),
            get(move |st: State<AppState>| list_documents(st, kind)),
        )
        .route(
            &item,
            get(move |st: State<AppState>, id: Path<i64>| get_document(st, kind, id)),
        );

    let downloads = Router::new().route(
        &format!("/download{}/:id", kind.slug()),
        get(move |st: State<AppState>, id: Path<i64>| download(st, kind, id)),
    );

    let write = Router::new()
        .route(
            &kind.create_path(),
            post(move |st: State<AppState>, mp: Multipart| upload_document(st, kind, mp)),
        )
        .route(
            &item,
            put(move |st: State<AppState>, id: Path<i64>, mp: Multipart| {
                update_document(st, kind, id, mp)
            })
            .delete(move |st: State<AppState>, id: Path<i64>| delete_document(st, kind, id)),
        )
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT));

    read.merge(guarded(state, MEMBERS, downloads))
        .merge(guarded(state, kind.writers(), write))
}

#[instrument(skip(state))]
async fn list_documents(State(state): State<AppState>, kind: DocKind) -> ApiResult<Json<Vec<DocumentView>>> {
    let docs = state.documents.list(kind).await?;
    let mut out = Vec::with_capacity(docs.len());
    for d in docs {
        out.push(d.view(&state).await?);
    }
    Ok(Json(out))
}

#[instrument(skip(state))]
async fn get_document(
    State(state): State<AppState>,
    kind: DocKind,
    Path(id): Path<i64>,
) -> ApiResult<Json<DocumentView>> {
    let doc = services::load(state.documents.as_ref(), kind, id).await?;
    Ok(Json(doc.view(&state).await?))
}

/// Answers 302 to the stored object.
#[instrument(skip(state))]
async fn download(
    State(state): State<AppState>,
    kind: DocKind,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let doc = services::load(state.documents.as_ref(), kind, id).await?;
    let url = state.storage.public_url(&doc.file_path).await?;
    Ok((StatusCode::FOUND, [(LOCATION, url)]))
}

#[instrument(skip(state, mp))]
async fn upload_document(
    State(state): State<AppState>,
    kind: DocKind,
    mp: Multipart,
) -> ApiResult<(StatusCode, Json<DocumentView>)> {
    let form = FormData::read(mp).await?;
    let doc = services::create(state.documents.as_ref(), state.storage.as_ref(), kind, &form).await?;
    Ok((StatusCode::CREATED, Json(doc.view(&state).await?)))
}

#[instrument(skip(state, mp))]
async fn update_document(
    State(state): State<AppState>,
    kind: DocKind,
    Path(id): Path<i64>,
    mp: Multipart,
) -> ApiResult<Json<DocumentView>> {
    let form = FormData::read(mp).await?;
    let doc =
        services::update(state.documents.as_ref(), state.storage.as_ref(), kind, id, &form).await?;
    Ok(Json(doc.view(&state).await?))
}

#[instrument(skip(state))]
async fn delete_document(
    State(state): State<AppState>,
    kind: DocKind,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    services::delete(state.documents.as_ref(), state.storage.as_ref(), kind, id).await?;
    Ok(Json(json!({ "message": "Deleted successful" })))
}
