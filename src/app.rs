use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Extension, Multipart, State},
    middleware,
    routing::post,
};
use chrono::{Datelike, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{self, AuthStore, Owner};
use crate::client::UploadResponse;
use crate::record::{
    ConsumptionRecord, Month, is_allowed_mime, MAX_ATTACHMENTS, MAX_ATTACHMENT_BYTES,
};
use crate::store::{NewAttachment, NewRecord, RecordStore, UpsertOutcome};
use crate::validate::{parse_non_negative, validate_fields};

/// Shared server state: the record store and the user database.
pub struct AppState {
    pub store: RecordStore,
    pub auth: AuthStore,
}

impl AppState {
    pub fn open(root: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(AppState {
            store: RecordStore::open(root)?,
            auth: AuthStore::open(root)?,
        })
    }
}

/// Build the application router
///
/// The record routes sit behind the bearer-token middleware; the auth
/// routes are open. CORS is permissive (internal tool served to a
/// separate frontend origin) and every request is traced.
pub fn router(state: Arc<AppState>) -> Router {
    let records = Router::new()
        .route("/api/electricity", post(upload_record).get(list_records))
        .route_layer(middleware::from_fn(auth::require_auth));

    Router::new()
        .merge(records)
        .route("/api/auth/login", post(auth::handle_login))
        .route("/api/auth/register", post(auth::handle_register))
        .layer(DefaultBodyLimit::max(MAX_ATTACHMENT_BYTES * (MAX_ATTACHMENTS + 1)))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(message: &str) -> Json<UploadResponse> {
    Json(UploadResponse {
        success: false,
        exists: false,
        message: Some(message.to_string()),
    })
}

/// Handle `POST /api/electricity`
///
/// Reads the multipart submission, re-applies the attachment policy
/// and field validation server-side, derives the year from the current
/// date, and performs the atomic upsert. A record that already exists
/// for (owner, month, year) answers `{exists: true, success: false}`
/// without mutating storage unless the `forceUpdate` field is set.
async fn upload_record(
    State(state): State<Arc<AppState>>,
    Extension(Owner(owner)): Extension<Owner>,
    mut multipart: Multipart,
) -> Json<UploadResponse> {
    let mut month_raw = String::new();
    let mut baseline_raw = String::new();
    let mut consumption_raw = String::new();
    let mut force_update = false;
    let mut attachments: Vec<NewAttachment> = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                log::warn!("malformed multipart body from {}: {}", owner, e);
                return error_response("Invalid upload");
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "month" => month_raw = field.text().await.unwrap_or_default(),
            "baseline" => baseline_raw = field.text().await.unwrap_or_default(),
            "consumption_kwh" => consumption_raw = field.text().await.unwrap_or_default(),
            "forceUpdate" => {
                force_update = field.text().await.unwrap_or_default() == "true";
            }
            "attachments" => {
                if attachments.len() >= MAX_ATTACHMENTS {
                    return error_response(&format!(
                        "At most {} attachments per record.",
                        MAX_ATTACHMENTS
                    ));
                }
                let file_name = field.file_name().unwrap_or("attachment").to_string();
                let mime_type = field.content_type().unwrap_or_default().to_string();
                if !is_allowed_mime(&mime_type) {
                    return error_response("Only images and PDFs are allowed.");
                }
                let bytes = match field.bytes().await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        log::warn!(
                            "failed reading attachment {} from {}: {}",
                            file_name,
                            owner,
                            e
                        );
                        return error_response("Invalid upload");
                    }
                };
                if bytes.len() > MAX_ATTACHMENT_BYTES {
                    return error_response(&format!(
                        "Files larger than {} MB are not allowed.",
                        MAX_ATTACHMENT_BYTES / (1024 * 1024)
                    ));
                }
                attachments.push(NewAttachment {
                    file_name,
                    mime_type,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {} // Unknown fields are ignored
        }
    }

    // Same rules the client applies before submitting.
    let errors = validate_fields(&month_raw, &baseline_raw, &consumption_raw, attachments.len());
    if !errors.is_empty() {
        let combined = errors.values().cloned().collect::<Vec<_>>().join(" ");
        return error_response(&combined);
    }

    // The checks above guarantee these parses succeed.
    let month: Month = match month_raw.parse() {
        Ok(month) => month,
        Err(_) => return error_response("Month is required."),
    };
    let baseline_cost = parse_non_negative(&baseline_raw).unwrap_or(0.0);
    let consumption_kwh = parse_non_negative(&consumption_raw).unwrap_or(0.0);

    let record = NewRecord {
        owner,
        month,
        year: Utc::now().year(),
        baseline_cost,
        consumption_kwh,
        attachments,
    };

    match state.store.upsert(record, force_update) {
        Ok(UpsertOutcome::Inserted) | Ok(UpsertOutcome::Updated) => Json(UploadResponse {
            success: true,
            exists: false,
            message: None,
        }),
        Ok(UpsertOutcome::Exists) => Json(UploadResponse {
            success: false,
            exists: true,
            message: None,
        }),
        Err(e) => {
            log::error!("upsert failed: {}", e);
            error_response("Error saving data")
        }
    }
}

/// Handle `GET /api/electricity`: the caller's records, oldest first.
async fn list_records(
    State(state): State<Arc<AppState>>,
    Extension(Owner(owner)): Extension<Owner>,
) -> Json<Vec<ConsumptionRecord>> {
    Json(state.store.list(&owner))
}

/// Start the server
///
/// Opens the store under `root` and serves on `port` until shutdown.
pub async fn run(root: &Path, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(AppState::open(root)?);
    let app = router(state);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    log::info!("Server running on port {}", port);
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::issue_token;
    use crate::client::{self, ClientError, RecordSubmission};
    use crate::record::PendingAttachment;
    use crate::workflow::{Phase, UploadWorkflow};
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_app() -> (Arc<AppState>, Router, TempDir) {
        let dir = TempDir::new().unwrap();
        let state = Arc::new(AppState::open(dir.path()).unwrap());
        let app = router(state.clone());
        (state, app, dir)
    }

    fn submission(month: &str, baseline: &str) -> RecordSubmission {
        RecordSubmission {
            month: month.to_string(),
            baseline: baseline.to_string(),
            consumption: "320.5".to_string(),
            attachments: vec![PendingAttachment::new("bill.png", "image/png", vec![1, 2, 3])],
            force_update: false,
        }
    }

    #[tokio::test]
    async fn request_without_valid_token_is_rejected() {
        let (_state, app, _dir) = test_app();
        let result = client::submit(app, "bogus-token", &submission("March", "1500")).await;
        assert!(matches!(result, Err(ClientError::Unauthorized)));
    }

    #[tokio::test]
    async fn first_submission_saves_the_record() {
        let (state, app, _dir) = test_app();
        let token = issue_token("alice");

        let response = client::submit(app, &token, &submission("March", "1500"))
            .await
            .unwrap();
        assert!(response.success);
        assert!(!response.exists);

        let record = state
            .store
            .get("alice", Month::March, Utc::now().year())
            .unwrap();
        assert_eq!(record.baseline_cost, 1500.0);
        assert_eq!(record.consumption_kwh, 320.5);
        assert_eq!(record.attachments.len(), 1);
        assert_eq!(record.attachments[0].file_name, "bill.png");
    }

    #[tokio::test]
    async fn duplicate_month_answers_exists_without_mutation() {
        let (state, app, _dir) = test_app();
        let token = issue_token("alice");

        client::submit(app.clone(), &token, &submission("March", "1500"))
            .await
            .unwrap();
        let response = client::submit(app, &token, &submission("March", "9999"))
            .await
            .unwrap();

        assert!(response.exists);
        assert!(!response.success);
        let record = state
            .store
            .get("alice", Month::March, Utc::now().year())
            .unwrap();
        assert_eq!(record.baseline_cost, 1500.0);
    }

    #[tokio::test]
    async fn forced_resubmission_overwrites_the_record() {
        let (state, app, _dir) = test_app();
        let token = issue_token("alice");

        client::submit(app.clone(), &token, &submission("March", "1500"))
            .await
            .unwrap();
        let mut forced = submission("March", "1750");
        forced.force_update = true;
        let response = client::submit(app, &token, &forced).await.unwrap();

        assert!(response.success);
        let record = state
            .store
            .get("alice", Month::March, Utc::now().year())
            .unwrap();
        assert_eq!(record.baseline_cost, 1750.0);
    }

    #[tokio::test]
    async fn conflict_workflow_end_to_end() {
        // The full client-side loop: submit, hit the conflict, confirm,
        // resubmit with the force flag, land in Success.
        let (state, app, _dir) = test_app();
        let token = issue_token("alice");

        client::submit(app.clone(), &token, &submission("July", "1000"))
            .await
            .unwrap();

        let mut wf = UploadWorkflow::new();
        wf.set_month("July");
        wf.set_baseline("2000");
        wf.set_consumption("410");
        wf.staging()
            .add(vec![PendingAttachment::new("july.pdf", "application/pdf", vec![7])]);

        let first = wf.begin_submit().unwrap();
        match client::submit(app.clone(), &token, &first).await {
            Ok(resp) => wf.on_response(&resp),
            Err(_) => wf.on_transport_error(),
        }
        assert_eq!(wf.phase(), Phase::Conflict);

        let resubmission = wf.confirm_overwrite().unwrap();
        match client::submit(app, &token, &resubmission).await {
            Ok(resp) => wf.on_response(&resp),
            Err(_) => wf.on_transport_error(),
        }
        assert_eq!(wf.phase(), Phase::Success);
        assert_eq!(wf.message(), Some("Updated successfully!"));
        assert_eq!(wf.month(), "");

        let record = state
            .store
            .get("alice", Month::July, Utc::now().year())
            .unwrap();
        assert_eq!(record.baseline_cost, 2000.0);
        assert_eq!(record.attachments[0].file_name, "july.pdf");
    }

    #[tokio::test]
    async fn owners_do_not_collide_on_the_same_month() {
        let (_state, app, _dir) = test_app();
        let alice = issue_token("alice");
        let bob = issue_token("bob");

        let first = client::submit(app.clone(), &alice, &submission("March", "1"))
            .await
            .unwrap();
        let second = client::submit(app, &bob, &submission("March", "2"))
            .await
            .unwrap();
        assert!(first.success);
        assert!(second.success);
    }

    #[tokio::test]
    async fn disallowed_mime_is_rejected_server_side() {
        let (_state, app, _dir) = test_app();
        let token = issue_token("alice");

        let mut bad = submission("March", "1500");
        bad.attachments = vec![PendingAttachment::new("notes.txt", "text/plain", vec![1])];
        let response = client::submit(app, &token, &bad).await.unwrap();

        assert!(!response.success);
        assert_eq!(
            response.message.as_deref(),
            Some("Only images and PDFs are allowed.")
        );
    }

    #[tokio::test]
    async fn missing_fields_are_rejected_server_side() {
        let (_state, app, _dir) = test_app();
        let token = issue_token("alice");

        let mut bad = submission("March", "1500");
        bad.attachments.clear();
        let response = client::submit(app, &token, &bad).await.unwrap();
        assert!(!response.success);
        assert_eq!(
            response.message.as_deref(),
            Some("Please attach at least one file.")
        );
    }

    #[tokio::test]
    async fn login_issues_a_usable_token() {
        let (state, app, _dir) = test_app();
        state.auth.register("carol", "hunter2").unwrap();

        let request = Request::builder()
            .method("POST")
            .uri("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"username":"carol","password":"hunter2"}"#))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let auth: crate::auth::AuthResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(auth.success);
        let token = auth.token.unwrap();

        let response = client::submit(app, &token, &submission("May", "10"))
            .await
            .unwrap();
        assert!(response.success);
    }

    #[tokio::test]
    async fn listing_returns_the_callers_records() {
        let (_state, app, _dir) = test_app();
        let token = issue_token("alice");
        client::submit(app.clone(), &token, &submission("March", "1500"))
            .await
            .unwrap();

        let request = Request::builder()
            .method("GET")
            .uri("/api/electricity")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let records: Vec<ConsumptionRecord> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].owner, "alice");
        assert_eq!(records[0].month, Month::March);
    }
}
