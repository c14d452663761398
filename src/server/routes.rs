// REST API routes
// Handlers only translate HTTP to Library calls; every JSON body carries
// "success": true, errors are rendered by AppError.

use axum::{
    Extension, Json, Router,
    extract::{FromRequest, FromRequestParts, Path, Query, Request, State},
    http::request::Parts,
    response::Html,
    routing::{get, post, put},
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;

use super::AppState;
use crate::auth::Identity;
use crate::db::AuditFilter;
use crate::error::{AppError, AppResult};
use crate::library::{CollectionUpdate, SongSort};

type ApiResult = AppResult<Json<Value>>;

fn ok(mut body: Value) -> ApiResult {
    if let Value::Object(map) = &mut body {
        map.insert("success".to_string(), Value::Bool(true));
    }
    Ok(Json(body))
}

// ---- Extractors ----

/// `Json` whose rejection is an `AppError`, so a malformed body gets the
/// same `{"success": false}` envelope as every other failure
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
        Ok(ApiJson(value))
    }
}

/// `Query` with the same error envelope as `ApiJson`
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
        Ok(ApiQuery(value))
    }
}

// ---- Request types ----

#[derive(Deserialize)]
pub struct UpdateMeRequest {
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Deserialize)]
pub struct SetAdminRequest {
    pub is_admin: bool,
}

#[derive(Deserialize)]
pub struct AuditLogParams {
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub collection_id: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl From<AuditLogParams> for AuditFilter {
    fn from(p: AuditLogParams) -> Self {
        AuditFilter {
            user_id: p.user_id,
            action: p.action,
            resource_type: p.resource_type,
            resource_id: p.resource_id,
            collection_id: p.collection_id,
            start: p.start,
            end: p.end,
            limit: p.limit.unwrap_or(0),
            offset: p.offset.unwrap_or(0),
        }
    }
}

#[derive(Deserialize)]
pub struct CreateCollectionRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_shared: bool,
}

#[derive(Deserialize)]
pub struct SongListParams {
    pub sort: Option<String>,
}

#[derive(Deserialize)]
pub struct ImportRequest {
    pub playlist_url: String,
    #[serde(default)]
    pub force_refresh: bool,
}

#[derive(Deserialize)]
pub struct ReorderRequest {
    pub playlist_ids: Vec<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct CollaborationRequestBody {
    pub message: Option<String>,
}

#[derive(Deserialize)]
pub struct PreviewRequest {
    pub playlist_url: String,
    pub collection_id: Option<String>,
}

#[derive(Deserialize)]
pub struct LimitParams {
    pub limit: Option<u32>,
}

#[derive(Deserialize)]
pub struct NotesRequest {
    pub notes: String,
}

#[derive(Deserialize)]
pub struct LyricsRequest {
    pub lyrics: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct RefreshLyricsRequest {
    pub force: bool,
}

#[derive(Deserialize)]
pub struct SetBpmRequest {
    pub bpm: Value,
}

#[derive(Deserialize)]
pub struct AuthUrlParams {
    #[serde(default)]
    pub show_dialog: bool,
}

#[derive(Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

// ---- Route registration ----

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/users/me", get(get_me).put(update_me))
        .route("/api/admin/users", get(list_users))
        .route("/api/admin/users/{uid}/admin", put(set_admin))
        .route("/api/admin/audit-logs", get(audit_logs))
        .route("/api/collections", get(list_collections).post(create_collection))
        .route("/api/collections/personal", get(personal_collection))
        .route("/api/collections/shared", get(shared_collections))
        .route(
            "/api/collections/{id}",
            get(get_collection)
                .put(update_collection)
                .delete(delete_collection),
        )
        .route("/api/collections/{id}/songs", get(list_songs))
        .route("/api/collections/{id}/orphans", axum::routing::delete(purge_orphans))
        .route("/api/collections/{id}/playlists", get(linked_playlists))
        .route("/api/collections/{id}/playlists/import", post(import_playlist))
        .route("/api/collections/{id}/playlists/reorder", put(reorder_playlists))
        .route(
            "/api/collections/{id}/playlists/{pid}",
            axum::routing::delete(unlink_playlist),
        )
        .route("/api/collections/{id}/requests", post(request_collaboration))
        .route("/api/collections/{id}/requests/{uid}/accept", post(accept_request))
        .route("/api/collections/{id}/requests/{uid}/deny", post(deny_request))
        .route("/api/playlists/preview", post(playlist_preview))
        .route("/api/playlists/recent", get(recent_playlists))
        .route("/api/playlists/recent/{pid}", axum::routing::delete(forget_playlist))
        .route("/api/songs/{id}", get(get_song).delete(delete_song))
        .route("/api/songs/{id}/notes", put(update_notes))
        .route("/api/songs/{id}/lyrics", put(update_lyrics))
        .route("/api/songs/{id}/lyrics/refresh", post(refresh_lyrics))
        .route("/api/songs/{id}/bpm", post(fetch_bpm).put(set_bpm))
        .route("/api/songs/{id}/history", get(song_history))
        .route("/api/spotify/auth-url", get(spotify_auth_url))
        .route("/api/spotify/callback", get(spotify_callback))
        .route("/api/spotify/token", get(spotify_token))
        .route("/api/spotify/status", get(spotify_status))
        .route("/api/spotify/disconnect", post(spotify_disconnect))
        .route("/api/spotify/preview/{track_id}", get(track_preview))
}

// ---- Users ----

async fn login(State(state): State<Arc<AppState>>, Extension(caller): Extension<Identity>) -> ApiResult {
    let user = state.library.login(&caller)?;
    ok(json!({ "user": user }))
}

async fn get_me(State(state): State<Arc<AppState>>, Extension(caller): Extension<Identity>) -> ApiResult {
    ok(json!({ "user": state.library.me(&caller)? }))
}

async fn update_me(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    ApiJson(body): ApiJson<UpdateMeRequest>,
) -> ApiResult {
    let profile = state.library.update_me(
        &caller,
        body.display_name.as_deref(),
        body.photo_url.as_deref(),
    )?;
    ok(json!({ "user": profile }))
}

async fn list_users(State(state): State<Arc<AppState>>, Extension(caller): Extension<Identity>) -> ApiResult {
    let users = state.library.list_users(&caller)?;
    ok(json!({ "count": users.len(), "users": users }))
}

async fn set_admin(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(uid): Path<String>,
    ApiJson(body): ApiJson<SetAdminRequest>,
) -> ApiResult {
    let user = state.library.set_admin(&caller, &uid, body.is_admin)?;
    ok(json!({ "user": user }))
}

async fn audit_logs(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    ApiQuery(params): ApiQuery<AuditLogParams>,
) -> ApiResult {
    let logs = state.library.audit_log(&caller, params.into())?;
    ok(json!({ "count": logs.len(), "logs": logs }))
}

// ---- Collections ----

async fn list_collections(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
) -> ApiResult {
    let collections = state.library.list_collections(&caller).await?;
    ok(json!({ "collections": collections }))
}

async fn create_collection(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    ApiJson(body): ApiJson<CreateCollectionRequest>,
) -> ApiResult {
    let collection = state.library.create_collection(
        &caller,
        &body.name,
        body.description.as_deref(),
        body.is_shared,
    )?;
    ok(json!({ "collection": collection }))
}

async fn personal_collection(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
) -> ApiResult {
    let collection = state.library.ensure_personal_collection(&caller)?;
    ok(json!({ "collection": collection }))
}

async fn shared_collections(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
) -> ApiResult {
    let collections = state.library.list_shared_collections(&caller)?;
    ok(json!({ "collections": collections }))
}

async fn get_collection(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult {
    ok(json!({ "collection": state.library.get_collection(&caller, &id)? }))
}

async fn update_collection(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<CollectionUpdate>,
) -> ApiResult {
    let collection = state.library.update_collection(&caller, &id, update)?;
    ok(json!({ "collection": collection }))
}

async fn delete_collection(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult {
    let deleted = state.library.delete_collection(&caller, &id)?;
    ok(json!({ "deleted_songs": deleted }))
}

async fn list_songs(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(id): Path<String>,
    ApiQuery(params): ApiQuery<SongListParams>,
) -> ApiResult {
    let sort: SongSort = params.sort.as_deref().unwrap_or_default().parse()?;
    let songs = state.library.list_songs(&caller, &id, sort)?;
    ok(json!({ "count": songs.len(), "songs": songs }))
}

async fn purge_orphans(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult {
    let deleted = state.library.purge_orphans(&caller, &id)?;
    ok(json!({ "deleted": deleted }))
}

async fn linked_playlists(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult {
    ok(json!({ "playlists": state.library.linked_playlists(&caller, &id)? }))
}

async fn import_playlist(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<ImportRequest>,
) -> ApiResult {
    let result = state
        .library
        .import_playlist(&caller, &id, &body.playlist_url, body.force_refresh)
        .await?;
    ok(json!({ "playlist": result.playlist, "stats": result.stats }))
}

async fn reorder_playlists(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<ReorderRequest>,
) -> ApiResult {
    let playlists = state.library.reorder_playlists(&caller, &id, &body.playlist_ids)?;
    ok(json!({ "playlists": playlists }))
}

async fn unlink_playlist(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path((id, pid)): Path<(String, String)>,
) -> ApiResult {
    let orphaned = state.library.unlink_playlist(&caller, &id, &pid)?;
    ok(json!({ "orphaned": orphaned }))
}

async fn request_collaboration(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<CollaborationRequestBody>,
) -> ApiResult {
    state
        .library
        .request_collaboration(&caller, &id, body.message.as_deref())?;
    ok(json!({ "message": "Collaboration request sent" }))
}

async fn accept_request(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path((id, uid)): Path<(String, String)>,
) -> ApiResult {
    let collection = state.library.accept_request(&caller, &id, &uid)?;
    ok(json!({ "collection": collection }))
}

async fn deny_request(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path((id, uid)): Path<(String, String)>,
) -> ApiResult {
    let collection = state.library.deny_request(&caller, &id, &uid)?;
    ok(json!({ "collection": collection }))
}

// ---- Playlists ----

async fn playlist_preview(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    ApiJson(body): ApiJson<PreviewRequest>,
) -> ApiResult {
    let preview = state
        .library
        .playlist_preview(&caller, &body.playlist_url, body.collection_id.as_deref())
        .await?;
    ok(json!({ "preview": preview }))
}

async fn recent_playlists(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    ApiQuery(params): ApiQuery<LimitParams>,
) -> ApiResult {
    let playlists = state.library.recent_playlists(&caller, params.limit)?;
    ok(json!({ "playlists": playlists }))
}

async fn forget_playlist(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(pid): Path<String>,
) -> ApiResult {
    state.library.forget_playlist(&caller, &pid)?;
    ok(json!({}))
}

// ---- Songs ----

async fn get_song(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult {
    ok(json!({ "song": state.library.get_song(&caller, &id).await? }))
}

async fn delete_song(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult {
    state.library.delete_song(&caller, &id)?;
    ok(json!({}))
}

async fn update_notes(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<NotesRequest>,
) -> ApiResult {
    ok(json!({ "song": state.library.update_notes(&caller, &id, &body.notes)? }))
}

async fn update_lyrics(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<LyricsRequest>,
) -> ApiResult {
    ok(json!({ "song": state.library.update_lyrics(&caller, &id, &body.lyrics)? }))
}

async fn refresh_lyrics(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<RefreshLyricsRequest>,
) -> ApiResult {
    let song = state.library.refresh_lyrics(&caller, &id, body.force).await?;
    ok(json!({ "song": song }))
}

async fn fetch_bpm(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult {
    ok(json!({ "song": state.library.fetch_bpm(&caller, &id).await? }))
}

async fn set_bpm(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<SetBpmRequest>,
) -> ApiResult {
    ok(json!({ "song": state.library.set_bpm(&caller, &id, &body.bpm)? }))
}

async fn song_history(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(id): Path<String>,
    ApiQuery(params): ApiQuery<LimitParams>,
) -> ApiResult {
    let history = state
        .library
        .song_history(&caller, &id, params.limit.unwrap_or(0))?;
    ok(json!({ "count": history.len(), "history": history }))
}

// ---- Spotify ----

async fn spotify_auth_url(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    ApiQuery(params): ApiQuery<AuthUrlParams>,
) -> ApiResult {
    let url = state.library.spotify_auth_url(&caller, params.show_dialog)?;
    ok(json!({ "auth_url": url }))
}

/// Popup page that reports the outcome to the opener window and closes itself
fn callback_page(message: Value) -> Html<String> {
    // JSON is valid JS; escape '<' so the payload cannot end the script block
    let payload = message.to_string().replace('<', "\\u003c");
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Spotify</title></head>
<body>
<p>You can close this window.</p>
<script>
  if (window.opener) {{
    window.opener.postMessage({payload}, "*");
  }}
  window.close();
</script>
</body>
</html>"#
    ))
}

async fn spotify_callback(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<CallbackParams>,
) -> Html<String> {
    if let Some(error) = params.error {
        log::warn!("Spotify authorization was declined: {}", error);
        return callback_page(json!({ "type": "spotify-auth-error", "error": error }));
    }
    let (Some(code), Some(auth_state)) = (params.code, params.state) else {
        return callback_page(json!({
            "type": "spotify-auth-error",
            "error": "Missing code or state",
        }));
    };
    match state.library.spotify_callback(&code, &auth_state).await {
        Ok(_) => callback_page(json!({ "type": "spotify-auth-success" })),
        Err(e) => callback_page(json!({ "type": "spotify-auth-error", "error": e.to_string() })),
    }
}

async fn spotify_token(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
) -> ApiResult {
    let token = state.library.spotify_access_token(&caller).await?;
    ok(json!({ "access_token": token.access_token, "expires_at": token.expires_at }))
}

async fn spotify_status(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
) -> ApiResult {
    ok(serde_json::to_value(state.library.spotify_status(&caller)?)?)
}

async fn spotify_disconnect(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
) -> ApiResult {
    let disconnected = state.library.spotify_disconnect(&caller)?;
    ok(json!({ "disconnected": disconnected }))
}

async fn track_preview(
    State(state): State<Arc<AppState>>,
    Path(track_id): Path<String>,
) -> ApiResult {
    let preview_url = state.library.track_preview(&track_id).await?;
    ok(json!({ "preview_url": preview_url }))
}
