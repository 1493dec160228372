use crate::record::PendingAttachment;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use serde::{Deserialize, Serialize};
use std::fmt;
use tower::{Service, ServiceExt};
use uuid::Uuid;

/// Path of the record endpoint.
pub const ELECTRICITY_PATH: &str = "/api/electricity";

/// One prepared record submission
///
/// Field values are carried as the raw form text; the server is the
/// authority on parsing them.
#[derive(Debug, Clone)]
pub struct RecordSubmission {
    pub month: String,
    pub baseline: String,
    pub consumption: String,
    pub attachments: Vec<PendingAttachment>,
    pub force_update: bool,
}

/// Wire response of the record endpoint: `{success, exists?, message?}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UploadResponse {
    pub success: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exists: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Failure to complete a submission attempt
///
/// There is no retry; one failed attempt surfaces as one error and the
/// caller decides what to show.
#[derive(Debug)]
pub enum ClientError {
    /// The request never completed (connection refused, reset, ...)
    Transport(String),

    /// The server answered but the body was not the expected JSON
    Decode(String),

    /// The credential was rejected before business logic ran
    Unauthorized,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Transport(e) => write!(f, "transport error: {}", e),
            ClientError::Decode(e) => write!(f, "invalid server response: {}", e),
            ClientError::Unauthorized => write!(f, "unauthorized"),
        }
    }
}

impl std::error::Error for ClientError {}

/// Percent-escape the characters that would corrupt a
/// `Content-Disposition` header: quotes end the `filename=` parameter
/// and CR/LF end the header line.
fn escape_file_name(name: &str) -> String {
    name.replace('%', "%25")
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Build the multipart/form-data body for a submission
///
/// Fields: `month`, `baseline`, `consumption_kwh`, one `attachments`
/// part per staged file, and `forceUpdate=true` when forced.
fn multipart_body(submission: &RecordSubmission, boundary: &str) -> Vec<u8> {
    let mut body = Vec::new();

    let text_field = |body: &mut Vec<u8>, name: &str, value: &str| {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                boundary, name, value
            )
            .as_bytes(),
        );
    };

    text_field(&mut body, "month", &submission.month);
    text_field(&mut body, "baseline", &submission.baseline);
    text_field(&mut body, "consumption_kwh", &submission.consumption);
    if submission.force_update {
        text_field(&mut body, "forceUpdate", "true");
    }

    for file in &submission.attachments {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"attachments\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                boundary,
                escape_file_name(&file.name),
                file.mime_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(&file.bytes);
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    body
}

/// Submit one record over a tower service
///
/// The service is the seam: tests and in-process use hand it the axum
/// `Router` directly, deployment hands it a socket-backed client
/// service with the same signature. Serializes the record and
/// attachment blobs into a single multipart request bearing the token,
/// sends it once, and decodes `{success, exists?, message?}` without
/// interpreting it further.
pub async fn submit<S>(
    service: S,
    token: &str,
    submission: &RecordSubmission,
) -> Result<UploadResponse, ClientError>
where
    S: Service<Request<Body>, Response = Response>,
    S::Error: fmt::Display,
{
    let boundary = format!("wattlog-{}", Uuid::new_v4().simple());
    let body = multipart_body(submission, &boundary);

    let request = Request::builder()
        .method(Method::POST)
        .uri(ELECTRICITY_PATH)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .map_err(|e| ClientError::Transport(e.to_string()))?;

    let response = service
        .oneshot(request)
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;

    if response.status() == StatusCode::UNAUTHORIZED {
        return Err(ClientError::Unauthorized);
    }

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;

    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
}
