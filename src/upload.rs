//! 上传处理器：准入检查后把请求体写入 `<dir>/<Dir 头>/<Filename 头>`。

use axum::Error as AxumError;
use axum::RequestPartsExt;
use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{HeaderMap, Request, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use futures_util::stream::StreamExt;
use http_body_util::BodyExt;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

use crate::admission::AdmissionGate;
use crate::atomic::AtomicFile;
use crate::config::{DIR_HEADER, FILENAME_HEADER};
use crate::error::{ApiError, ResponseMode};
use crate::logging::{LogEntry, record};
use crate::settings::Settings;
use crate::storage::Storage;

#[derive(Debug)]
pub struct UploadConfig {
    pub max_size: u64,
    pub timeout: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub url: String,
}

/// 接收上传：所有结果都以 JSON 返回，错误状态码由 [`ResponseMode`] 决定。
pub async fn upload_file(
    Extension(gate): Extension<Arc<AdmissionGate>>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(settings): Extension<Arc<Settings>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    Extension(mode): Extension<ResponseMode>,
    req: Request<AxumBody>,
) -> Response {
    let (mut parts, body) = req.into_parts();
    let remote = parts
        .extract::<ConnectInfo<SocketAddr>>()
        .await
        .ok()
        .map(|ConnectInfo(addr)| addr);

    let client_ip = match gate.admit(&parts.method, remote, &parts.headers).await {
        Ok(ip) => ip,
        Err(rejection) => {
            record(LogEntry::Info(&format!("upload rejected: {rejection}")));
            return ApiError::from(rejection).into_response_with(mode);
        }
    };

    match store_upload(&storage, &settings, &upload, &parts.headers, body).await {
        Ok(stored) => {
            info!(%client_ip, url = stored.url, "upload stored");
            JsonResponse(stored).into_response()
        }
        Err(err) => {
            if err.is_server_fault() {
                record(LogEntry::Error(&err));
            } else {
                record(LogEntry::Info(&format!("upload refused for {client_ip}: {err}")));
            }
            err.into_response_with(mode)
        }
    }
}

async fn store_upload(
    storage: &Storage,
    settings: &Settings,
    upload: &UploadConfig,
    headers: &HeaderMap,
    body: AxumBody,
) -> Result<UploadResponse, ApiError> {
    let dir = required_header(headers, DIR_HEADER, "expected directory header")?;
    let filename = required_header(headers, FILENAME_HEADER, "expected filename header")?;
    let (dir_path, target) = storage.resolve_upload_target(dir, filename).await?;

    if upload.max_size > 0
        && let Some(length) = content_length(headers)
        && length > upload.max_size
    {
        return Err(ApiError::PayloadTooLarge("upload exceeds size limit".into()));
    }

    fs::create_dir_all(&dir_path)
        .await
        .map_err(|err| ApiError::Internal(format!("failed to create directory: {err}")))?;

    let mut file = AtomicFile::create(&target)
        .await
        .map_err(|err| ApiError::Internal(format!("failed to create file: {err}")))?;
    let write = write_body(&mut file, body, upload.max_size);
    let result = if upload.timeout.is_zero() {
        write.await
    } else {
        tokio::time::timeout(upload.timeout, write)
            .await
            .unwrap_or_else(|_| Err(ApiError::RequestTimeout("upload timed out".into())))
    };
    if let Err(err) = result {
        file.discard().await;
        return Err(err);
    }
    let written = file
        .commit()
        .await
        .map_err(|err| ApiError::Internal(format!("failed to write file: {err}")))?;
    debug!(path = ?target, bytes = written, "upload written");

    Ok(UploadResponse {
        url: public_url(settings.base_url(), dir, filename),
    })
}

async fn write_body(file: &mut AtomicFile, body: AxumBody, max_size: u64) -> Result<(), ApiError> {
    let mut data_stream = BodyExt::into_data_stream(body);
    while let Some(chunk) = data_stream.next().await {
        let chunk = chunk.map_err(|err: AxumError| {
            ApiError::Internal(format!("failed to read request body: {err}"))
        })?;
        if chunk.is_empty() {
            continue;
        }
        if max_size > 0 && file.written() + chunk.len() as u64 > max_size {
            return Err(ApiError::PayloadTooLarge("upload exceeds size limit".into()));
        }
        file.write_all(&chunk)
            .await
            .map_err(|err| ApiError::Internal(format!("failed to write file: {err}")))?;
    }
    Ok(())
}

fn required_header<'a>(
    headers: &'a HeaderMap,
    name: &str,
    missing: &str,
) -> Result<&'a str, ApiError> {
    let Some(value) = headers.get(name) else {
        return Err(ApiError::BadRequest(missing.into()));
    };
    let value = value
        .to_str()
        .map_err(|_| ApiError::BadRequest(format!("invalid {name} header")))?;
    if value.is_empty() {
        return Err(ApiError::BadRequest(missing.into()));
    }
    Ok(value)
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
}

/// `<base>/<dir>/<filename>`，各路径段做百分号编码。
fn public_url(base_url: &str, dir: &str, filename: &str) -> String {
    let mut url = base_url.trim_end_matches('/').to_string();
    for segment in dir
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
    {
        url.push('/');
        url.push_str(&urlencoding::encode(segment));
    }
    url.push('/');
    url.push_str(&urlencoding::encode(filename));
    url
}
