//! HTTP adapter over the paste engine.

use std::fmt::Write;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Extension, Path};
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use headers::HeaderMapExt;
use stashpad_common::{
    ExpiresIn, PasteSummary, API_ENDPOINT, BURN_AFTER_READ_HEADER_NAME, SLUG_HEADER_NAME,
};
use tower_http::trace::TraceLayer;
use tracing::{error, instrument};

use crate::delivery::Delivery;
use crate::error::Error;
use crate::lifecycle::PasteManager;
use crate::paste::PastePolicy;

pub fn router(manager: Arc<PasteManager>) -> Router {
    Router::new()
        .route(API_ENDPOINT, post(upload))
        .route(&format!("{API_ENDPOINT}/:id"), get(metadata))
        .route("/raw/:id", get(raw))
        .route("/:id", get(view))
        .layer(Extension(manager))
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match e {
            Error::InvalidTtl | Error::InvalidSlug(_) => StatusCode::BAD_REQUEST,
            Error::SlugConflict => StatusCode::CONFLICT,
            Error::ContentTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::SlugSpaceExhausted | Error::SizeMismatch { .. } | Error::StorageFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = if e.is_client_error() {
            e.to_string()
        } else {
            error!("Request failed: {}", e);
            "internal server error".to_string()
        };
        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

fn policy_from_headers(headers: &HeaderMap) -> Result<PastePolicy, ApiError> {
    let ttl = headers
        .typed_try_get::<ExpiresIn>()
        .map_err(|_| ApiError::from(Error::InvalidTtl))?
        .map(|expires_in| expires_in.0);
    let custom_slug = headers
        .get(&*SLUG_HEADER_NAME)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
    let burn_after_read = headers
        .get(&*BURN_AFTER_READ_HEADER_NAME)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.trim().eq_ignore_ascii_case("true"));
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);

    Ok(PastePolicy {
        ttl,
        custom_slug,
        burn_after_read,
        content_type,
    })
}

#[instrument(skip(manager, headers, body), fields(size = body.len()))]
async fn upload(
    Extension(manager): Extension<Arc<PasteManager>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PasteSummary>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("paste is empty"));
    }

    let policy = policy_from_headers(&headers)?;
    Ok(Json(manager.create_paste(body, policy).await?))
}

#[instrument(skip(manager))]
async fn metadata(
    Extension(manager): Extension<Arc<PasteManager>>,
    Path(id): Path<String>,
) -> Result<Json<PasteSummary>, ApiError> {
    Ok(Json(manager.get_metadata(&id).await?))
}

#[instrument(skip(manager))]
async fn raw(
    Extension(manager): Extension<Arc<PasteManager>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    Ok(raw_response(manager.read_content(&id, true).await?))
}

#[instrument(skip(manager, headers))]
async fn view(
    Extension(manager): Extension<Arc<PasteManager>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if !is_browser(&headers) {
        return Ok(raw_response(manager.read_content(&id, true).await?));
    }

    let delivery = manager.read_content(&id, false).await?;
    Ok(Html(render_preview(&id, &delivery)).into_response())
}

fn is_browser(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("text/html"))
}

fn raw_response(delivery: Delivery) -> Response {
    // Never let a paste render as a page on our own origin.
    let content_type = if delivery.content_type.starts_with("text/html") {
        HeaderValue::from_static("text/plain; charset=utf-8")
    } else {
        HeaderValue::from_str(&delivery.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
    };
    ([(CONTENT_TYPE, content_type)], delivery.bytes).into_response()
}

fn render_preview(id: &str, delivery: &Delivery) -> String {
    let id = escape_html(id);
    let mut page = format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{id}</title></head><body>\n<pre>{}</pre>\n",
        escape_html(&String::from_utf8_lossy(&delivery.bytes))
    );
    if delivery.truncated {
        // Writing to a String cannot fail.
        let _ = write!(
            page,
            "<p>Showing the first {} of {} bytes. <a href=\"/raw/{id}\">View the full paste</a></p>\n",
            delivery.bytes.len(),
            delivery.size
        );
    }
    page.push_str("</body></html>\n");
    page
}

fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery(bytes: &'static [u8], size: u64, truncated: bool) -> Delivery {
        Delivery {
            bytes: Bytes::from_static(bytes),
            content_type: "text/plain".to_string(),
            truncated,
            size,
        }
    }

    #[test]
    fn maps_errors_to_statuses() {
        let status = |e: Error| ApiError::from(e).status;
        assert_eq!(status(Error::InvalidTtl), StatusCode::BAD_REQUEST);
        assert_eq!(status(Error::SlugConflict), StatusCode::CONFLICT);
        assert_eq!(
            status(Error::ContentTooLarge { size: 2, limit: 1 }),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(status(Error::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status(Error::SizeMismatch {
                recorded: 2,
                actual: 1
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn server_errors_are_not_leaked() {
        let e = ApiError::from(Error::StorageFailure("redis: connection refused".to_string()));
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.message, "internal server error");
    }

    #[test]
    fn reads_policy_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(&*SLUG_HEADER_NAME, HeaderValue::from_static("MYSLUG"));
        headers.insert(&*BURN_AFTER_READ_HEADER_NAME, HeaderValue::from_static("True"));
        headers.insert("expires-in", HeaderValue::from_static("2h"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/x-rust"));

        let policy = policy_from_headers(&headers).unwrap();
        assert_eq!(policy.custom_slug.as_deref(), Some("MYSLUG"));
        assert!(policy.burn_after_read);
        assert_eq!(policy.ttl, Some(std::time::Duration::from_secs(2 * 60 * 60)));
        assert_eq!(policy.content_type.as_deref(), Some("text/x-rust"));

        let policy = policy_from_headers(&HeaderMap::new()).unwrap();
        assert_eq!(policy.ttl, None);
        assert!(!policy.burn_after_read);
    }

    #[test]
    fn rejects_bad_ttl_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("expires-in", HeaderValue::from_static("2 fortnights"));
        let e = policy_from_headers(&headers).unwrap_err();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn recognizes_browsers() {
        let mut headers = HeaderMap::new();
        assert!(!is_browser(&headers));
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        assert!(!is_browser(&headers));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9"),
        );
        assert!(is_browser(&headers));
    }

    #[test]
    fn previews_escape_and_link_truncated_pastes() {
        let page = render_preview("ABCD", &delivery(b"<b>AAAA", 300_000, true));
        assert!(page.contains("<pre>&lt;b&gt;AAAA</pre>"));
        assert!(page.contains("first 7 of 300000 bytes"));
        assert!(page.contains("href=\"/raw/ABCD\""));

        let page = render_preview("ABCD", &delivery(b"hi", 2, false));
        assert!(!page.contains("/raw/"));
    }
}
