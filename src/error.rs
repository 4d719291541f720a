//! 统一的 API 错误类型与转换。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use serde::Serialize;
use std::fmt;
use std::io::ErrorKind;

use crate::admission::Rejection;
use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    MethodNotAllowed(String),
    Forbidden(String),
    TooManyRequests(String),
    BadRequest(String),
    PayloadTooLarge(String),
    RequestTimeout(String),
    NotFound(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RequestTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::MethodNotAllowed(msg)
            | ApiError::Forbidden(msg)
            | ApiError::TooManyRequests(msg)
            | ApiError::BadRequest(msg)
            | ApiError::PayloadTooLarge(msg)
            | ApiError::RequestTimeout(msg)
            | ApiError::NotFound(msg)
            | ApiError::Internal(msg) => msg,
        }
    }

    /// 服务端故障（需要以 error 级别记录）。
    pub fn is_server_fault(&self) -> bool {
        matches!(self, ApiError::Internal(_))
    }

    /// 按响应模式生成 JSON 错误响应。
    pub fn into_response_with(self, mode: ResponseMode) -> Response {
        let mut response = self.into_response();
        if mode == ResponseMode::Compat {
            *response.status_mut() = StatusCode::OK;
        }
        response
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            JsonResponse(ErrorBody {
                error: self.message(),
            }),
        )
            .into_response()
    }
}

/// 上传接口错误的状态码策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseMode {
    /// 所有结果都以 200 返回，错误信息只放在 JSON 中（兼容旧客户端）。
    Compat,
    /// 错误使用对应的 4xx/5xx 状态码。
    Strict,
}

impl ResponseMode {
    pub fn from_strict_flag(strict: bool) -> Self {
        if strict {
            ResponseMode::Strict
        } else {
            ResponseMode::Compat
        }
    }
}

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        let message = rejection.to_string();
        match rejection {
            Rejection::MethodNotAllowed => ApiError::MethodNotAllowed(message),
            Rejection::UnresolvedRemote(_) => ApiError::BadRequest(message),
            Rejection::AddressNotAllowed(_) => ApiError::Forbidden(message),
            Rejection::RateLimited(_) => ApiError::TooManyRequests(message),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidPath => ApiError::BadRequest("invalid path".into()),
            StorageError::InvalidFilename => ApiError::BadRequest("invalid filename".into()),
            StorageError::Io(err) => match err.kind() {
                ErrorKind::NotFound => ApiError::NotFound(err.to_string()),
                _ => ApiError::Internal(err.to_string()),
            },
        }
    }
}
