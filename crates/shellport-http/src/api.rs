use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use shellport_core::HostRecord;
use shellport_ssh::files;
use shellport_ssh::{FileSession, StagingConfig};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWriteExt, ReadBuf};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::AppState;
use crate::error::ApiError;
use crate::settings::{connect_options, credential_for};

// Query types
#[derive(Debug, Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameQuery {
    #[serde(default)]
    pub old_path: String,
    #[serde(default)]
    pub new_path: String,
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    #[serde(default)]
    pub file: String,
}

fn require<'a>(value: &'a str, name: &str) -> Result<&'a str, ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{name} must not be empty")));
    }
    Ok(value)
}

pub(crate) async fn resolve_host(state: &AppState, id: i64) -> Result<HostRecord, ApiError> {
    state
        .registry
        .get_host(id)
        .await?
        .ok_or(ApiError::HostNotFound(id))
}

async fn open_files(state: &AppState, host: &HostRecord) -> Result<FileSession, ApiError> {
    let options = connect_options(host, &state.config.ssh);
    Ok(FileSession::open(&credential_for(host), &options).await?)
}

// SFTP handlers
pub async fn list_files(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Value>, ApiError> {
    let path = if query.path.trim().is_empty() {
        "/".to_string()
    } else {
        query.path
    };
    let host = resolve_host(&state, id).await?;
    let session = open_files(&state, &host).await?;

    let listed = files::list_directory(session.sftp(), &path).await;
    session.close().await;

    let entries = listed?;
    Ok(Json(json!({ "list": entries })))
}

pub async fn upload_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let form = UploadForm::read(multipart, &state.staging).await?;
    let mut upload = form
        .file
        .ok_or_else(|| ApiError::BadRequest("no file in upload".to_string()))?;
    let directory = form.path.unwrap_or_default();
    require(&directory, "path")?;

    let host = resolve_host(&state, id).await?;
    store_upload(&state, &host, &directory, &mut upload).await
}

pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<PathQuery>,
) -> Result<Response, ApiError> {
    let path = require(&query.path, "path")?;
    let host = resolve_host(&state, id).await?;
    stream_file(&state, &host, path).await
}

pub async fn download_directory(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<PathQuery>,
) -> Result<Response, ApiError> {
    let path = require(&query.path, "path")?;
    let host = resolve_host(&state, id).await?;
    let session = open_files(&state, &host).await?;

    let staged = files::download_directory_archive(session.sftp(), path, &state.staging).await;
    session.close().await;

    let archive = staged?;
    let file_name = archive.file_name.clone();
    let size = archive.size;
    Ok(attachment(&file_name, size, "application/zip", archive))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Value>, ApiError> {
    let path = require(&query.path, "path")?;
    let host = resolve_host(&state, id).await?;
    let session = open_files(&state, &host).await?;

    let deleted = files::delete_entry(session.sftp(), path).await;
    session.close().await;

    let kind = deleted?;
    Ok(Json(json!({ "message": "deleted", "path": path, "type": kind })))
}

pub async fn rename_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<RenameQuery>,
) -> Result<Json<Value>, ApiError> {
    let old_path = require(&query.old_path, "oldPath")?;
    let new_path = require(&query.new_path, "newPath")?;
    let host = resolve_host(&state, id).await?;
    let session = open_files(&state, &host).await?;

    let renamed = files::rename_entry(session.sftp(), old_path, new_path).await;
    session.close().await;

    renamed?;
    Ok(Json(json!({ "message": "renamed", "path": new_path })))
}

pub async fn compress_directory(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Value>, ApiError> {
    let path = require(&query.path, "path")?;
    let host = resolve_host(&state, id).await?;
    let session = open_files(&state, &host).await?;

    let compressed = files::compress_directory_in_place(session.sftp(), path, &state.staging).await;
    session.close().await;

    let archive_path = compressed?;
    Ok(Json(json!({ "message": "compressed", "path": archive_path })))
}

// Login-directory handlers: paths are relative to where the SFTP session starts
pub async fn upload_to_home(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let host = resolve_host(&state, id).await?;
    let form = UploadForm::read(multipart, &state.staging).await?;
    let mut upload = form
        .file
        .ok_or_else(|| ApiError::BadRequest("no file in upload".to_string()))?;

    store_upload(&state, &host, "", &mut upload).await
}

pub async fn download_from_home(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<FileQuery>,
) -> Result<Response, ApiError> {
    let file = require(&query.file, "file")?;
    let host = resolve_host(&state, id).await?;
    stream_file(&state, &host, file).await
}

async fn store_upload(
    state: &AppState,
    host: &HostRecord,
    directory: &str,
    upload: &mut SpooledUpload,
) -> Result<Json<Value>, ApiError> {
    let session = open_files(state, host).await?;
    let stored = files::upload_file(session.sftp(), directory, &upload.name, &mut upload.content).await;
    session.close().await;

    let (remote_path, size) = stored?;
    debug!(host_id = host.id, received = upload.size, stored = size, "Upload stored");
    Ok(Json(json!({ "message": "uploaded", "path": remote_path, "size": size })))
}

async fn stream_file(state: &AppState, host: &HostRecord, path: &str) -> Result<Response, ApiError> {
    let session = open_files(state, host).await?;
    match files::download_file(session.sftp(), path).await {
        Ok(download) => {
            let reader = SessionReader {
                reader: download.reader,
                _session: Box::new(session),
            };
            Ok(attachment(
                &download.file_name,
                download.size,
                "application/octet-stream",
                reader,
            ))
        }
        Err(e) => {
            session.close().await;
            Err(e.into())
        }
    }
}

/// A remote file reader that keeps its SSH connection open until the body is done
struct SessionReader<R> {
    reader: R,
    _session: Box<FileSession>,
}

impl<R: AsyncRead + Unpin> AsyncRead for SessionReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

fn attachment<R>(file_name: &str, size: u64, content_type: &'static str, reader: R) -> Response
where
    R: AsyncRead + Send + 'static,
{
    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
        (header::CONTENT_LENGTH, HeaderValue::from(size)),
        (header::CONTENT_DISPOSITION, content_disposition(file_name)),
    ];
    (headers, Body::from_stream(ReaderStream::new(reader))).into_response()
}

/// `attachment; filename="..."` with an RFC 5987 `filename*` for non-ASCII names
fn content_disposition(file_name: &str) -> HeaderValue {
    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            ' '..='~' if c != '"' && c != '\\' => c,
            _ => '_',
        })
        .collect();

    let mut value = format!("attachment; filename=\"{fallback}\"");
    if !file_name.is_ascii() {
        value.push_str("; filename*=UTF-8''");
        for byte in file_name.bytes() {
            if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
                value.push(char::from(byte));
            } else {
                value.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// An uploaded file spooled to local disk
struct SpooledUpload {
    name: String,
    content: tokio::fs::File,
    size: u64,
}

#[derive(Default)]
struct UploadForm {
    path: Option<String>,
    file: Option<SpooledUpload>,
}

impl UploadForm {
    /// Read the `path` and `file` fields; other fields are ignored
    async fn read(mut multipart: Multipart, staging: &StagingConfig) -> Result<Self, ApiError> {
        let mut form = UploadForm::default();
        while let Some(mut field) = multipart.next_field().await? {
            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some("path") => form.path = Some(field.text().await?),
                Some("file") => {
                    let file_name = field.file_name().unwrap_or_default().to_string();
                    let spool = match &staging.parent {
                        Some(parent) => {
                            tokio::fs::create_dir_all(parent).await?;
                            tempfile::tempfile_in(parent)?
                        }
                        None => tempfile::tempfile()?,
                    };
                    let mut content = tokio::fs::File::from_std(spool);
                    let mut size = 0u64;
                    while let Some(chunk) = field.chunk().await? {
                        content.write_all(&chunk).await?;
                        size += chunk.len() as u64;
                    }
                    content.flush().await?;
                    content.rewind().await?;
                    form.file = Some(SpooledUpload {
                        name: file_name,
                        content,
                        size,
                    });
                }
                _ => {}
            }
        }
        Ok(form)
    }
}
