//! # API Endpoint Handlers
//!
//! Core calls are synchronous and may wait on the writer lock or touch
//! disk, so every one of them runs on the blocking pool.
//!
//! Identity is asserted per request:
//! - `X-User-Id` (anonymous when absent)
//! - `X-User-Name` (defaults to the id)
//! - `X-User-Authorities` (comma-separated)
//! - `X-Commit-Message` (recorded in the log header of mutations)

use super::{
    AppState,
    types::{
        ErrorResponse, GrantJson, HealthResponse, LogEntryResponse, MultiStatusResponse,
        PermissionsResponse, QueryRequest, ResourceQuery, SetPermissionRequest,
        SetPermissionResponse,
    },
};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::stream;
use quadfs_core::{CommitContext, FileInfo, Principal, QuadFsError, Store, TransferOutcome};
use std::sync::Arc;
use tokio::sync::mpsc;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_AUTHORITIES_HEADER: &str = "x-user-authorities";
pub const COMMIT_MESSAGE_HEADER: &str = "x-commit-message";
pub const DESTINATION_HEADER: &str = "destination";
pub const OVERWRITE_HEADER: &str = "overwrite";
pub const DEPTH_HEADER: &str = "depth";

/// Mount point of the filesystem routes.
pub const DAV_PREFIX: &str = "/dav";

const ALLOWED_METHODS: &str = "OPTIONS, GET, HEAD, PUT, DELETE, MKCOL, PROPFIND, COPY, MOVE";

// =============================================================================
// ERROR MAPPING
// =============================================================================

/// The request family an error came from. Only `AlreadyExists` and the
/// query-side errors depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Mkcol,
    Transfer,
    Query,
    Other,
}

fn status_for(err: &QuadFsError, verb: Verb) -> StatusCode {
    match err {
        QuadFsError::NotFound(_) => StatusCode::NOT_FOUND,
        QuadFsError::AlreadyExists(_) => match verb {
            Verb::Mkcol => StatusCode::METHOD_NOT_ALLOWED,
            Verb::Transfer => StatusCode::PRECONDITION_FAILED,
            Verb::Query | Verb::Other => StatusCode::CONFLICT,
        },
        QuadFsError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        QuadFsError::NotADirectory(_) | QuadFsError::IsADirectory(_) => StatusCode::CONFLICT,
        QuadFsError::InvalidArgument(_) | QuadFsError::QueryParse(_) => StatusCode::BAD_REQUEST,
        QuadFsError::UnsupportedOperation(_) => match verb {
            Verb::Query => StatusCode::BAD_REQUEST,
            _ => StatusCode::METHOD_NOT_ALLOWED,
        },
        QuadFsError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        QuadFsError::Io(_) | QuadFsError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_kind(err: &QuadFsError) -> &'static str {
    match err {
        QuadFsError::NotFound(_) => "not_found",
        QuadFsError::AlreadyExists(_) => "already_exists",
        QuadFsError::NotADirectory(_) => "not_a_directory",
        QuadFsError::IsADirectory(_) => "is_a_directory",
        QuadFsError::PermissionDenied(_) => "permission_denied",
        QuadFsError::UnsupportedOperation(_) => "unsupported_operation",
        QuadFsError::Io(_) => "io",
        QuadFsError::InvalidArgument(_) => "invalid_argument",
        QuadFsError::Serialization(_) => "serialization",
        QuadFsError::Timeout(_) => "timeout",
        QuadFsError::QueryParse(_) => "query_parse",
    }
}

fn error_response(err: QuadFsError, verb: Verb) -> Response {
    let status = status_for(&err, verb);
    if status.is_server_error() {
        tracing::error!(error = %err, status = status.as_u16(), "request failed");
    } else {
        tracing::debug!(error = %err, status = status.as_u16(), "request rejected");
    }
    (status, Json(ErrorResponse::new(error_kind(&err), err.to_string()))).into_response()
}

/// Run a core call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, QuadFsError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, QuadFsError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| QuadFsError::Io(format!("worker task failed: {}", e)))?
}

// =============================================================================
// IDENTITY
// =============================================================================

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn principal_from(state: &AppState, headers: &HeaderMap) -> Principal {
    let Some(id) = header_str(headers, USER_ID_HEADER) else {
        return Principal::anonymous();
    };
    let name = header_str(headers, USER_NAME_HEADER).unwrap_or(id);
    let principal = if state.admins.contains(id) {
        Principal::admin(id, name)
    } else {
        Principal::new(id, name)
    };
    let authorities: Vec<String> = header_str(headers, USER_AUTHORITIES_HEADER)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    principal.with_authorities(authorities)
}

fn commit_context(state: &AppState, headers: &HeaderMap) -> CommitContext {
    let ctx = CommitContext::new(principal_from(state, headers));
    match header_str(headers, COMMIT_MESSAGE_HEADER) {
        Some(message) => ctx.with_message(message),
        None => ctx,
    }
}

// =============================================================================
// HEALTH & STATUS
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

/// Store summary: backend, quad count, log size, graph checksum.
pub async fn status_handler(State(state): State<AppState>) -> Response {
    let store = state.store.clone();
    match blocking(move || store.status()).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => error_response(e, Verb::Other),
    }
}

/// One committed transaction. The log holds every quad unfiltered, so
/// only administrators may read it.
pub async fn log_handler(
    State(state): State<AppState>,
    Path(index): Path<u64>,
    headers: HeaderMap,
) -> Response {
    let principal = principal_from(&state, &headers);
    if !principal.admin {
        return error_response(
            QuadFsError::PermissionDenied("the transaction log is restricted to admins".into()),
            Verb::Other,
        );
    }
    let store = state.store.clone();
    match blocking(move || store.log().record(index)).await {
        Ok(record) => (StatusCode::OK, Json(LogEntryResponse::from(record))).into_response(),
        Err(e) => error_response(e, Verb::Other),
    }
}

// =============================================================================
// QUERY HANDLER
// =============================================================================

/// Read-only query over what the caller can read.
pub async fn query_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Response {
    if let Err(reason) = request.validate() {
        return error_response(QuadFsError::InvalidArgument(reason), Verb::Query);
    }
    let principal = principal_from(&state, &headers);
    let store = state.store.clone();
    match blocking(move || store.query(&principal, &request.query)).await {
        Ok(results) => (StatusCode::OK, Json(results.to_sparql_json())).into_response(),
        Err(e) => error_response(e, Verb::Query),
    }
}

// =============================================================================
// PERMISSION HANDLERS
// =============================================================================

/// The caller's view of a resource; managers also see its direct grants.
pub async fn get_permissions_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ResourceQuery>,
) -> Response {
    let principal = principal_from(&state, &headers);
    let store = state.store.clone();
    let result = blocking(move || {
        let vfs = store.vfs();
        let view = vfs.access(&principal, &query.resource)?;
        let grants = if view.access().can_manage() {
            let grants = vfs.permissions_of(&principal, &query.resource)?;
            Some(
                grants
                    .into_iter()
                    .map(|(subject, level)| GrantJson { subject, level })
                    .collect(),
            )
        } else {
            None
        };
        Ok(PermissionsResponse { view, grants })
    })
    .await;
    match result {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(e, Verb::Other),
    }
}

/// Checked grant change; the caller needs `Manage` on the resource.
pub async fn put_permissions_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SetPermissionRequest>,
) -> Response {
    let principal = principal_from(&state, &headers);
    let store = state.store.clone();
    let result = blocking(move || {
        let previous = store.vfs().set_permission(
            &principal,
            &request.resource,
            &request.subject,
            request.level,
        )?;
        Ok(SetPermissionResponse {
            resource: request.resource,
            subject: request.subject,
            previous,
            level: request.level,
        })
    })
    .await;
    match result {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(e, Verb::Other),
    }
}

// =============================================================================
// FILESYSTEM HANDLERS
// =============================================================================

/// `/dav` and `/dav/`: the root directory.
pub async fn dav_root_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch(state, method, "/".to_string(), headers, body).await
}

/// `/dav/{*path}`.
pub async fn dav_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch(state, method, format!("/{}", path), headers, body).await
}

async fn dispatch(
    state: AppState,
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    tracing::debug!(method = %method, path = %path, "dav request");
    match method.as_str() {
        "OPTIONS" => options_response(),
        "GET" => get_entry(state, path, headers, false).await,
        "HEAD" => get_entry(state, path, headers, true).await,
        "PUT" => put_file(state, path, headers, body).await,
        "MKCOL" => make_collection(state, path, headers).await,
        "PROPFIND" => propfind(state, path, headers).await,
        "COPY" => transfer(state, path, headers, false).await,
        "MOVE" => transfer(state, path, headers, true).await,
        "DELETE" => delete_entry(state, path, headers).await,
        _ => {
            let mut response = error_response(
                QuadFsError::UnsupportedOperation(format!("method {}", method)),
                Verb::Other,
            );
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
            response
        }
    }
}

fn options_response() -> Response {
    let mut response = StatusCode::OK.into_response();
    let headers = response.headers_mut();
    headers.insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    headers.insert(HeaderName::from_static("dav"), HeaderValue::from_static("1"));
    response
}

// ===== GET / HEAD =====

/// Requested byte window after resolving a `Range` header against the
/// file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ByteRange {
    /// No usable range: send everything.
    Full,
    /// `[start, end)`.
    Partial(u64, u64),
    Unsatisfiable,
}

/// Parse a single `bytes=` range. Multi-range and malformed headers fall
/// back to the full body.
pub(crate) fn parse_range(value: &str, size: u64) -> ByteRange {
    let Some(ranges) = value.trim().strip_prefix("bytes=") else {
        return ByteRange::Full;
    };
    if ranges.contains(',') {
        return ByteRange::Full;
    }
    let Some((first, last)) = ranges.split_once('-') else {
        return ByteRange::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // Suffix range: the last N bytes.
        return match last.parse::<u64>() {
            Ok(0) => ByteRange::Unsatisfiable,
            Ok(_) if size == 0 => ByteRange::Unsatisfiable,
            Ok(n) => ByteRange::Partial(size.saturating_sub(n), size),
            Err(_) => ByteRange::Full,
        };
    }

    let Ok(start) = first.parse::<u64>() else {
        return ByteRange::Full;
    };
    let end = if last.is_empty() {
        size
    } else {
        match last.parse::<u64>() {
            Ok(last) if last < start => return ByteRange::Full,
            Ok(last) => last.saturating_add(1).min(size),
            Err(_) => return ByteRange::Full,
        }
    };
    if start >= size {
        return ByteRange::Unsatisfiable;
    }
    ByteRange::Partial(start, end)
}

enum GetOutcome {
    Listing(Vec<FileInfo>),
    File {
        info: FileInfo,
        range: ByteRange,
        /// Blob to stream; `None` when no body is sent.
        blob_id: Option<String>,
    },
}

async fn get_entry(state: AppState, path: String, headers: HeaderMap, head: bool) -> Response {
    let principal = principal_from(&state, &headers);
    let range_header = header_str(&headers, header::RANGE.as_str()).map(str::to_string);
    let store = state.store.clone();

    let result = blocking(move || {
        let vfs = store.vfs();
        let info = vfs.stat(&principal, &path)?;
        if info.is_directory {
            let mut entries = vec![info];
            entries.extend(vfs.list(&principal, &path)?);
            return Ok(GetOutcome::Listing(entries));
        }
        let range = range_header
            .as_deref()
            .map(|r| parse_range(r, info.size))
            .unwrap_or(ByteRange::Full);
        if head || range == ByteRange::Unsatisfiable {
            return Ok(GetOutcome::File {
                info,
                range,
                blob_id: None,
            });
        }
        if !info.is_readable {
            return Err(QuadFsError::PermissionDenied(format!(
                "{} requires read access",
                path
            )));
        }
        let blob_id = info
            .blob_id
            .clone()
            .ok_or_else(|| QuadFsError::NotFound(format!("content of {}", path)))?;
        Ok(GetOutcome::File {
            info,
            range,
            blob_id: Some(blob_id),
        })
    })
    .await;

    match result {
        Ok(GetOutcome::Listing(entries)) => {
            (StatusCode::OK, Json(MultiStatusResponse { entries })).into_response()
        }
        Ok(GetOutcome::File {
            info,
            range,
            blob_id,
        }) => {
            let body = match (blob_id, range) {
                (Some(id), ByteRange::Full) => stream_blob(state.store.clone(), id, 0, None),
                (Some(id), ByteRange::Partial(start, end)) => {
                    stream_blob(state.store.clone(), id, start, Some(end))
                }
                _ => Body::empty(),
            };
            file_response(&info, range, body)
        }
        Err(e) => error_response(e, Verb::Other),
    }
}

/// Chunks buffered between a blob read and the response body.
const STREAM_CHANNEL_CHUNKS: usize = 4;

type Chunk = Result<Bytes, std::io::Error>;

/// Blocking `Write` end of a streamed body. Each write is sent as one chunk.
struct ChannelWriter(mpsc::Sender<Chunk>);

impl std::io::Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "client went away")
            })?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Read a blob on the blocking pool and stream it as the response body.
///
/// Blobs are immutable, so the body matches the size and ETag taken from
/// the earlier stat even if the file is overwritten meanwhile.
fn stream_blob(store: Arc<Store>, blob_id: String, start: u64, end: Option<u64>) -> Body {
    let (tx, rx) = mpsc::channel::<Chunk>(STREAM_CHANNEL_CHUNKS);
    tokio::task::spawn_blocking(move || {
        let mut writer = ChannelWriter(tx.clone());
        if let Err(e) = store.vfs().blobs().read(&blob_id, &mut writer, start, end) {
            if tx.is_closed() {
                tracing::debug!(blob = %blob_id, "client disconnected during download");
            } else {
                tracing::warn!(blob = %blob_id, error = %e, "blob stream aborted");
                // The receiver may have gone in between; nothing is left to tell.
                let _ = tx.blocking_send(Err(std::io::Error::other(e.to_string())));
            }
        }
    });
    Body::from_stream(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    }))
}

fn file_response(info: &FileInfo, range: ByteRange, body: Body) -> Response {
    let (status, content_range, length) = match range {
        ByteRange::Full => (StatusCode::OK, None, info.size),
        ByteRange::Partial(start, end) => (
            StatusCode::PARTIAL_CONTENT,
            Some(format!("bytes {}-{}/{}", start, end.saturating_sub(1), info.size)),
            end - start,
        ),
        ByteRange::Unsatisfiable => (
            StatusCode::RANGE_NOT_SATISFIABLE,
            Some(format!("bytes */{}", info.size)),
            0,
        ),
    };

    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let Some(value) = content_range.and_then(|v| HeaderValue::from_str(&v).ok()) {
        headers.insert(header::CONTENT_RANGE, value);
    }
    if let Some(value) = etag(info) {
        headers.insert(header::ETAG, value);
    }
    if let Some(value) = info
        .modified
        .map(|m| m.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
        .and_then(|v| HeaderValue::from_str(&v).ok())
    {
        headers.insert(header::LAST_MODIFIED, value);
    }
    response
}

fn etag(info: &FileInfo) -> Option<HeaderValue> {
    info.checksum
        .as_ref()
        .and_then(|c| HeaderValue::from_str(&format!("\"{}\"", c)).ok())
}

// ===== PUT =====

async fn put_file(state: AppState, path: String, headers: HeaderMap, body: Bytes) -> Response {
    let ctx = commit_context(&state, &headers);
    let store = state.store.clone();
    let result = blocking(move || {
        let mut reader: &[u8] = &body;
        store.vfs().write(&ctx, &path, &mut reader)
    })
    .await;

    match result {
        Ok(outcome) => {
            let status = if outcome.replaced {
                StatusCode::NO_CONTENT
            } else {
                StatusCode::CREATED
            };
            let mut response = status.into_response();
            if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", outcome.blob.checksum)) {
                response.headers_mut().insert(header::ETAG, value);
            }
            response
        }
        Err(e) => error_response(e, Verb::Other),
    }
}

// ===== MKCOL =====

async fn make_collection(state: AppState, path: String, headers: HeaderMap) -> Response {
    let ctx = commit_context(&state, &headers);
    let store = state.store.clone();
    let result = blocking(move || {
        let vfs = store.vfs();
        if vfs.stat(&ctx.principal, &path).is_ok() {
            return Err(QuadFsError::AlreadyExists(path));
        }
        vfs.mkdir(&ctx, &path)
    })
    .await;

    match result {
        Ok(info) => (StatusCode::CREATED, Json(info)).into_response(),
        Err(e) => error_response(e, Verb::Mkcol),
    }
}

// ===== PROPFIND =====

async fn propfind(state: AppState, path: String, headers: HeaderMap) -> Response {
    let principal = principal_from(&state, &headers);
    // Depth: infinity is served as depth 1.
    let shallow = header_str(&headers, DEPTH_HEADER) == Some("0");
    let store = state.store.clone();
    let result = blocking(move || {
        let vfs = store.vfs();
        let info = vfs.stat(&principal, &path)?;
        let descend = info.is_directory && !shallow;
        let mut entries = vec![info];
        if descend {
            entries.extend(vfs.list(&principal, &path)?);
        }
        Ok(entries)
    })
    .await;

    match result {
        Ok(entries) => {
            (StatusCode::MULTI_STATUS, Json(MultiStatusResponse { entries })).into_response()
        }
        Err(e) => error_response(e, Verb::Other),
    }
}

// ===== COPY / MOVE =====

/// Decode `%XX` escapes.
fn percent_decode(input: &str) -> Result<String, QuadFsError> {
    let invalid = || QuadFsError::InvalidArgument(format!("bad escape in {:?}", input));
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3).ok_or_else(invalid)?;
            out.push(u8::from_str_radix(hex, 16).map_err(|_| invalid())?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| invalid())
}

/// Filesystem path named by a `Destination` header. Absolute URLs and
/// absolute paths are accepted; either must point under `/dav`.
pub(crate) fn destination_path(value: &str) -> Result<String, QuadFsError> {
    let path = match value.split_once("://") {
        Some((_, rest)) => rest.find('/').and_then(|i| rest.get(i..)).unwrap_or("/"),
        None => value,
    };
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let decoded = percent_decode(path)?;
    match decoded.strip_prefix(DAV_PREFIX) {
        Some("") => Ok("/".to_string()),
        Some(rest) if rest.starts_with('/') => Ok(rest.to_string()),
        _ => Err(QuadFsError::InvalidArgument(format!(
            "destination {:?} is outside {}",
            value, DAV_PREFIX
        ))),
    }
}

async fn transfer(state: AppState, path: String, headers: HeaderMap, is_move: bool) -> Response {
    let destination = match header_str(&headers, DESTINATION_HEADER) {
        Some(value) => match destination_path(value) {
            Ok(destination) => destination,
            Err(e) => return error_response(e, Verb::Transfer),
        },
        None => {
            return error_response(
                QuadFsError::InvalidArgument("missing Destination header".into()),
                Verb::Transfer,
            );
        }
    };
    let overwrite = !matches!(header_str(&headers, OVERWRITE_HEADER), Some("F" | "f"));
    let ctx = commit_context(&state, &headers);
    let store = state.store.clone();

    let result: Result<TransferOutcome, QuadFsError> = blocking(move || {
        let vfs = store.vfs();
        if is_move {
            vfs.rename(&ctx, &path, &destination, overwrite)
        } else {
            vfs.copy(&ctx, &path, &destination, overwrite)
        }
    })
    .await;

    match result {
        Ok(outcome) if outcome.replaced => StatusCode::NO_CONTENT.into_response(),
        Ok(outcome) => (StatusCode::CREATED, Json(outcome.info)).into_response(),
        Err(e) => error_response(e, Verb::Transfer),
    }
}

// ===== DELETE =====

async fn delete_entry(state: AppState, path: String, headers: HeaderMap) -> Response {
    let ctx = commit_context(&state, &headers);
    let store = state.store.clone();
    match blocking(move || store.vfs().delete(&ctx, &path)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e, Verb::Other),
    }
}

// =============================================================================
// TESTS
// =============================================================================
