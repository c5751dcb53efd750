mod annotations;
mod config;
mod db;
mod error;
mod export;
mod images;
mod ingest;
mod mirror;
mod models;
mod schema;
mod sync;
mod workbook;

use crate::config::{AppPaths, IMAGE_READ_TIMEOUT};
use crate::db::DbPool;
use crate::error::{Error, Result};
use crate::mirror::SpeciesMirror;
use crate::models::{
    ExportRequest, GlobalSpeciesRequest, GlobalTagsRequest, ReclassifyRequest, RowsUpdateRequest,
    ToggleTagRequest,
};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;

#[derive(Clone)]
pub struct AppState {
    db: DbPool,
    paths: AppPaths,
    mirror: SpeciesMirror,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let paths = AppPaths::discover().expect("Failed to discover app paths");
    let db = db::init_database(&paths).expect("Failed to initialize database");
    let mirror = SpeciesMirror::new(&paths);

    let state = AppState { db, paths, mirror };
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config::server_port()));
    log::info!("Listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind server address");
    axum::serve(listener, app).await.expect("Server error");
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/upload", post(upload_workbook))
        .route("/api/sheets/:filename", get(list_sheets))
        .route("/api/data/:id", get(get_data).put(update_data))
        .route("/api/global-tags", get(get_global_tags).put(put_global_tags))
        .route(
            "/api/global-species",
            get(get_global_species).put(put_global_species),
        )
        .route("/api/update-species", put(update_species))
        .route("/api/toggle-tag", put(toggle_tag))
        .route("/api/export-tags", post(export_tags))
        .route("/api/download-original/:id", get(download_original))
        .route("/api/download-csv", get(download_csv))
        .route("/api/upload-csv", post(upload_csv))
        .route("/api/images/*path", get(serve_image))
        .with_state(state)
}

fn require<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| Error::Validation(format!("Missing required field: {field}")))
}

/// Pulls the first multipart field matching one of `names`, returning its
/// client filename and bytes.
async fn read_upload(
    multipart: &mut Multipart,
    names: &[&str],
) -> Result<Option<(String, Vec<u8>)>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("Invalid multipart payload: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if !names.contains(&name.as_str()) {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload.xlsx").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| Error::Validation(format!("Invalid multipart payload: {e}")))?;
        return Ok(Some((filename, data.to_vec())));
    }
    Ok(None)
}

async fn upload_workbook(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let (filename, bytes) = read_upload(&mut multipart, &["file"])
        .await?
        .ok_or_else(|| Error::Validation("No file uploaded".into()))?;

    let conn = state.db.get()?;
    let sheets = ingest::ingest_workbook(&conn, &filename, &bytes)?;
    Ok(Json(json!({
        "id": sheets[0].id,
        "sheets": sheets,
    })))
}

async fn list_sheets(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse> {
    let conn = state.db.get()?;
    Ok(Json(db::list_sheets(&conn, &filename)?))
}

async fn get_data(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let conn = state.db.get()?;
    let record = db::get_sheet(&conn, id)?
        .ok_or_else(|| Error::NotFound(format!("No sheet record #{id}")))?;
    Ok(Json(record))
}

async fn update_data(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RowsUpdateRequest>,
) -> Result<impl IntoResponse> {
    let conn = state.db.get()?;
    if !db::update_rows(&conn, id, &body.data)? {
        return Err(Error::NotFound(format!("No sheet record #{id}")));
    }
    let record = db::get_sheet(&conn, id)?
        .ok_or_else(|| Error::NotFound(format!("No sheet record #{id}")))?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
struct FilenameQuery {
    filename: Option<String>,
}

async fn get_global_tags(
    State(state): State<AppState>,
    Query(query): Query<FilenameQuery>,
) -> Result<impl IntoResponse> {
    let filename = require(query.filename, "filename")?;
    let conn = state.db.get()?;
    let tags = annotations::get_tags(&conn, &filename)?;
    Ok(Json(json!({ "globalImageTags": tags })))
}

async fn put_global_tags(
    State(state): State<AppState>,
    Json(body): Json<GlobalTagsRequest>,
) -> Result<impl IntoResponse> {
    let filename = require(body.filename, "filename")?;
    let image_path = require(body.image_path, "imagePath")?;
    let tags = require(body.tags, "tags")?;

    let conn = state.db.get()?;
    let updated = annotations::set_tags(&conn, &filename, &image_path, &tags)?;
    Ok(Json(json!({ "success": true, "sheetsUpdated": updated })))
}

async fn get_global_species(
    State(state): State<AppState>,
    Query(query): Query<FilenameQuery>,
) -> Result<impl IntoResponse> {
    let filename = require(query.filename, "filename")?;
    let conn = state.db.get()?;
    let species = annotations::get_species(&conn, &filename)?;
    Ok(Json(json!({ "globalImageSpecies": species })))
}

async fn put_global_species(
    State(state): State<AppState>,
    Json(body): Json<GlobalSpeciesRequest>,
) -> Result<impl IntoResponse> {
    let filename = require(body.filename, "filename")?;
    let image_path = require(body.image_path, "imagePath")?;
    let species = require(body.species, "species")?;

    let conn = state.db.get()?;
    let (_, updated) = annotations::set_species(&conn, &filename, &image_path, &species)?;
    Ok(Json(json!({ "success": true, "sheetsUpdated": updated })))
}

async fn update_species(
    State(state): State<AppState>,
    Json(body): Json<ReclassifyRequest>,
) -> Result<impl IntoResponse> {
    let filename = require(body.filename, "filename")?;
    let sheet_name = require(body.sheet_name, "sheetName")?;
    let image_path = require(body.image_path, "imagePath")?;
    let species = require(body.species, "species")?;

    let conn = state.db.get()?;
    let outcome = sync::apply_reclassification(
        &conn,
        &state.mirror,
        &filename,
        &sheet_name,
        &image_path,
        &species,
    )?;
    Ok(Json(json!({
        "success": true,
        "message": "Species classification updated successfully",
        "updatedImage": outcome.updated_image,
        "species": outcome.species,
        "mirrorUpdated": outcome.mirror_updated,
    })))
}

async fn toggle_tag(
    State(state): State<AppState>,
    Json(body): Json<ToggleTagRequest>,
) -> Result<impl IntoResponse> {
    let filename = require(body.filename, "filename")?;
    let image_path = require(body.image_path, "imagePath")?;
    let tag = require(body.tag, "tag")?;

    let conn = state.db.get()?;
    let tags = sync::apply_tag_toggle(&conn, &filename, &image_path, &tag)?;
    Ok(Json(json!({ "success": true, "tags": tags })))
}

const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

fn attachment(filename: &str) -> String {
    format!("attachment; filename=\"{filename}\"")
}

async fn export_tags(
    State(state): State<AppState>,
    Json(body): Json<ExportRequest>,
) -> Result<impl IntoResponse> {
    let filename = require(body.filename, "filename")?;
    let conn = state.db.get()?;
    let bytes = export::export_tagged(&conn, &filename, body.mode)?;
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                attachment(&export::tagged_export_name(&filename)),
            ),
        ],
        bytes,
    ))
}

async fn download_original(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let conn = state.db.get()?;
    let (bytes, filename) = export::export_original(&conn, id)?;
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                attachment(&format!("original_{filename}")),
            ),
        ],
        bytes,
    ))
}

async fn download_csv(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let content = state.mirror.read_all()?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                attachment("updated_species_data.csv"),
            ),
        ],
        content,
    ))
}

async fn upload_csv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let (filename, bytes) = read_upload(&mut multipart, &["csvFile", "file"])
        .await?
        .ok_or_else(|| Error::Validation("No CSV file provided".into()))?;

    let (headers, row_count) = state.mirror.install(&bytes)?;
    Ok(Json(json!({
        "success": true,
        "message": "CSV file uploaded successfully",
        "filename": filename,
        "savedPath": state.mirror.path().display().to_string(),
        "headers": headers,
        "rowCount": row_count,
    })))
}

async fn serve_image(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse> {
    let (bytes, content_type) =
        images::read_image(&state.paths.images_root, &path, IMAGE_READ_TIMEOUT).await?;
    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CACHE_CONTROL, "public, max-age=3600".to_string()),
        ],
        bytes,
    ))
}
