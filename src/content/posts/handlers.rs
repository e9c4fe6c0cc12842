use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::instrument;

use super::{dto::PostView, repo_types::PostKind, services};
use crate::{
    auth::{
        claims::{HR_ADMINS, IT_ADMINS},
        guarded, Role,
    },
    content::{form::FormData, UPLOAD_LIMIT},
    error::{ApiError, ApiResult},
    state::AppState,
};

pub fn routes(state: &AppState) -> Router<AppState> {
    let knowledge = Router::new()
        .route("/knowledge/user", get(knowledge_for_members))
        .merge(guarded(
            state,
            IT_ADMINS,
            Router::new().route("/knowledge/admin", get(knowledge_for_admins)),
        ));

    PostKind::ALL
        .into_iter()
        .fold(knowledge, |router, kind| router.merge(kind_routes(state, kind)))
}

fn writers(kind: PostKind) -> &'static [Role] {
    match kind {
        PostKind::Knowledge | PostKind::Security => IT_ADMINS,
        PostKind::Article | PostKind::Activity | PostKind::Training => HR_ADMINS,
    }
}

fn kind_routes(state: &AppState, kind: PostKind) -> Router<AppState> {
    let item = format!("/{}/:id", kind.slug());

    let read = Router::new()
        .route(
            &format!("/{}", kind.plural()),
            get(move |st: State<AppState>| list_posts(st, kind)),
        )
        .route(
            &item,
            get(move |st: State<AppState>, id: Path<i64>| get_post(st, kind, id)),
        );

    let write = Router::new()
        .route(
            &format!("/{}", kind.slug()),
            post(move |st: State<AppState>, mp: Multipart| create_post(st, kind, mp)),
        )
        .route(
            &item,
            put(move |st: State<AppState>, id: Path<i64>, mp: Multipart| {
                update_post(st, kind, id, mp)
            })
            .delete(move |st: State<AppState>, id: Path<i64>| delete_post(st, kind, id)),
        )
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT));

    read.merge(guarded(state, writers(kind), write))
}

#[instrument(skip(state))]
async fn list_posts(State(state): State<AppState>, kind: PostKind) -> ApiResult<Json<Vec<PostView>>> {
    let posts = state.posts.list(kind).await?;
    Ok(Json(PostView::build_all(state.storage.as_ref(), posts).await?))
}

#[instrument(skip(state))]
async fn get_post(
    State(state): State<AppState>,
    kind: PostKind,
    Path(id): Path<i64>,
) -> ApiResult<Json<PostView>> {
    let post = state
        .posts
        .find(kind, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("{} not found", kind.label())))?;
    Ok(Json(PostView::build(state.storage.as_ref(), post).await?))
}

#[instrument(skip(state, mp))]
async fn create_post(
    State(state): State<AppState>,
    kind: PostKind,
    mp: Multipart,
) -> ApiResult<(StatusCode, Json<PostView>)> {
    let form = FormData::read(mp).await?;
    let post = services::create(state.posts.as_ref(), state.storage.as_ref(), kind, &form).await?;
    let view = PostView::build(state.storage.as_ref(), post).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[instrument(skip(state, mp))]
async fn update_post(
    State(state): State<AppState>,
    kind: PostKind,
    Path(id): Path<i64>,
    mp: Multipart,
) -> ApiResult<Json<PostView>> {
    let form = FormData::read(mp).await?;
    let post =
        services::update(state.posts.as_ref(), state.storage.as_ref(), kind, id, &form).await?;
    Ok(Json(PostView::build(state.storage.as_ref(), post).await?))
}

#[instrument(skip(state))]
async fn delete_post(
    State(state): State<AppState>,
    kind: PostKind,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    services::delete(state.posts.as_ref(), state.storage.as_ref(), kind, id).await?;
    Ok(Json(json!({ "message": "Deleted successful" })))
}

#[instrument(skip(state))]
async fn knowledge_for_members(State(state): State<AppState>) -> ApiResult<Json<Vec<PostView>>> {
    let posts = services::knowledge_for_members(state.posts.as_ref()).await?;
    Ok(Json(PostView::build_all(state.storage.as_ref(), posts).await?))
}

#[instrument(skip(state))]
async fn knowledge_for_admins(State(state): State<AppState>) -> ApiResult<Json<Vec<PostView>>> {
    let posts = state.posts.list(PostKind::Knowledge).await?;
    Ok(Json(PostView::build_all(state.storage.as_ref(), posts).await?))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{
            header::{CONTENT_TYPE, COOKIE},
            Request, StatusCode,
        },
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::{
        app::build_app,
        auth::{jwt::JwtKeys, Role},
        state::AppState,
    };

    const BOUNDARY: &str = "webcenter-test-boundary";

    fn cookie_for(state: &AppState, role: Role) -> String {
        let issued = JwtKeys::new(&state.config.jwt).issue(1, "editor", role).unwrap();
        format!("auth_token={}; session_id={}", issued.token, issued.session_id)
    }

    fn multipart_body(title: &str, image: &str) -> String {
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\n{title}\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"images\"; filename=\"{image}\"\r\n\
             Content-Type: image/png\r\n\r\nPNGDATA\r\n--{b}--\r\n",
            b = BOUNDARY
        )
    }

    fn create_request(path: &str, cookie: String) -> Request<Body> {
        Request::post(path)
            .header(COOKIE, cookie)
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(multipart_body("Welcome", "team.png")))
            .unwrap()
    }

    #[tokio::test]
    async fn hr_admin_creates_article_and_lists_it() {
        let state = AppState::fake();
        let cookie = cookie_for(&state, Role::AdminHr);
        let app = build_app(state);

        let res = app
            .clone()
            .oneshot(create_request("/article", cookie))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);

        let res = app
            .oneshot(Request::get("/articles").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(&to_bytes(res.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(body[0]["title"], "Welcome");
        assert_eq!(body[0]["images"][0]["key"], "article/team.png");
        assert_eq!(body[0]["images"][0]["url"], "https://fake.local/article/team.png");
    }

    #[tokio::test]
    async fn it_admin_cannot_write_articles_but_can_write_knowledge() {
        let state = AppState::fake();
        let cookie = cookie_for(&state, Role::AdminIt);
        let app = build_app(state);

        let res = app
            .clone()
            .oneshot(create_request("/article", cookie.clone()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = app
            .oneshot(create_request("/knowledge", cookie))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn missing_post_is_404_and_knowledge_admin_needs_login() {
        let app = build_app(AppState::fake());

        let res = app
            .clone()
            .oneshot(Request::get("/training/7").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = app
            .oneshot(Request::get("/knowledge/admin").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
