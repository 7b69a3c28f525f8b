use std::collections::BTreeMap;

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use nodedeck_runner::project_fs::FileEntry;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::lifecycle::UpdateServer;
use crate::state::AppState;
use crate::store::ServerDto;

#[derive(Debug, Deserialize)]
pub struct CreateServerRequest {
    pub name: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateServerRequest {
    pub name: Option<String>,
    pub env: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub struct FilesQuery {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize)]
pub struct MoveResponse {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub files: usize,
}

pub async fn list_servers(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<ServerDto>>, ApiError> {
    let rows = state.lifecycle.list(&user.user_id).await?;
    Ok(Json(rows.iter().map(ServerDto::from).collect()))
}

pub async fn create_server(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(input): Json<CreateServerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let model = state
        .lifecycle
        .create_server(&user.user_id, &input.name, input.env)
        .await?;
    Ok((StatusCode::CREATED, Json(ServerDto::from(&model))))
}

pub async fn get_server(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<ServerDto>, ApiError> {
    let model = state.lifecycle.get_owned(&user.user_id, &id).await?;
    Ok(Json(ServerDto::from(&model)))
}

pub async fn update_server(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(input): Json<UpdateServerRequest>,
) -> Result<Json<ServerDto>, ApiError> {
    let model = state
        .lifecycle
        .update_server(
            &user.user_id,
            &id,
            UpdateServer {
                name: input.name,
                env: input.env,
            },
        )
        .await?;
    Ok(Json(ServerDto::from(&model)))
}

pub async fn delete_server(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.lifecycle.delete_server(&user.user_id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start_server(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<ServerDto>, ApiError> {
    let model = state.lifecycle.start_server(&user.user_id, &id).await?;
    Ok(Json(ServerDto::from(&model)))
}

pub async fn stop_server(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<ServerDto>, ApiError> {
    let model = state.lifecycle.stop_server(&user.user_id, &id).await?;
    Ok(Json(ServerDto::from(&model)))
}

pub async fn restart_server(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<ServerDto>, ApiError> {
    let model = state.lifecycle.restart_server(&user.user_id, &id).await?;
    Ok(Json(ServerDto::from(&model)))
}

pub async fn upload_project(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<UploadResponse>, ApiError> {
    let files = state
        .lifecycle
        .upload_project(&user.user_id, &id, &body)
        .await?;
    Ok(Json(UploadResponse { files }))
}

pub async fn list_files(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Query(q): Query<FilesQuery>,
) -> Result<Json<Vec<FileEntry>>, ApiError> {
    let entries = state
        .lifecycle
        .list_files(&user.user_id, &id, &q.path)
        .await?;
    Ok(Json(entries))
}

pub async fn move_file(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(input): Json<MoveRequest>,
) -> Result<Json<MoveResponse>, ApiError> {
    let dest = state
        .lifecycle
        .move_file(&user.user_id, &id, &input.from, &input.to)
        .await?;
    Ok(Json(MoveResponse {
        path: dest.to_string_lossy().into_owned(),
    }))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Query(q): Query<FilesQuery>,
) -> Result<StatusCode, ApiError> {
    state
        .lifecycle
        .delete_file(&user.user_id, &id, &q.path)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
