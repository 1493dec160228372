use crate::app::AppState;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

const USERS_FILE: &str = "users.json";
const TOKEN_DURATION: u64 = 24 * 60 * 60; // 24 hours in seconds

/// A registered application user
///
/// Only authentication data; consumption records are keyed by the
/// username elsewhere.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    /// Username (unique identifier for the user)
    pub username: String,

    /// Argon2 hash of the user's password
    pub password_hash: String,
}

/// An issued bearer token
#[derive(Debug, Clone)]
pub struct Session {
    /// Username the token was issued to
    pub user_id: String,

    /// Time when the token expires
    pub expires_at: SystemTime,
}

lazy_static! {
    /// All live bearer tokens, keyed by token value.
    static ref SESSIONS: RwLock<HashMap<String, Session>> = RwLock::new(HashMap::new());
}

/// User database backed by a JSON file under the store root.
pub struct AuthStore {
    users_path: PathBuf,
}

impl AuthStore {
    /// Open (or initialize) the users file under `root`.
    pub fn open(root: &Path) -> std::io::Result<Self> {
        create_dir_all(root)?;
        let users_path = root.join(USERS_FILE);
        if !users_path.exists() {
            let mut file = File::create(&users_path)?;
            file.write_all(b"{}")?;
        }
        Ok(AuthStore { users_path })
    }

    fn get_users(&self) -> Result<HashMap<String, User>, String> {
        let contents = fs::read_to_string(&self.users_path)
            .map_err(|_| "Failed to read users file".to_string())?;
        serde_json::from_str(&contents).map_err(|_| "Failed to parse users data".to_string())
    }

    fn save_users(&self, users: &HashMap<String, User>) -> Result<(), String> {
        let json = serde_json::to_string_pretty(users)
            .map_err(|_| "Failed to serialize users data".to_string())?;
        fs::write(&self.users_path, json).map_err(|_| "Failed to write users data".to_string())
    }

    /// Register a new user with a hashed password.
    pub fn register(&self, username: &str, password: &str) -> Result<(), String> {
        if username.is_empty() || password.is_empty() {
            return Err("Username and password cannot be empty".to_string());
        }

        let mut users = self.get_users()?;
        if users.contains_key(username) {
            return Err("Username already exists".to_string());
        }

        let password_hash = hash_password(password)?;
        users.insert(
            username.to_string(),
            User {
                username: username.to_string(),
                password_hash,
            },
        );
        self.save_users(&users)
    }

    /// Check whether the credentials match a registered user.
    pub fn verify(&self, username: &str, password: &str) -> Result<bool, String> {
        let users = self.get_users()?;
        if let Some(user) = users.get(username) {
            verify_password(password, &user.password_hash)
        } else {
            Ok(false)
        }
    }
}

fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    match argon2.hash_password(password.as_bytes(), &salt) {
        Ok(hash) => Ok(hash.to_string()),
        Err(_) => Err("Password hashing failed".to_string()),
    }
}

fn verify_password(password: &str, hash: &str) -> Result<bool, String> {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(hash) => hash,
        Err(_) => return Err("Invalid password hash format".to_string()),
    };

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(_) => Ok(true),
        Err(_) => Ok(false), // Password didn't match
    }
}

/// Issue a bearer token for an authenticated user
///
/// Expired sessions are swept on each issue so the map does not grow
/// without bound.
pub fn issue_token(username: &str) -> String {
    let token = Uuid::new_v4().to_string();
    let now = SystemTime::now();
    let expires_at = now + Duration::from_secs(TOKEN_DURATION);

    let session = Session {
        user_id: username.to_string(),
        expires_at,
    };

    let mut sessions = SESSIONS.write().unwrap();
    sessions.retain(|_, session| session.expires_at > now);
    sessions.insert(token.clone(), session);

    token
}

/// Resolve a bearer token to its username, if valid and unexpired.
pub fn validate_token(token: &str) -> Option<String> {
    let sessions = SESSIONS.read().unwrap();

    if let Some(session) = sessions.get(token) {
        if session.expires_at > SystemTime::now() {
            return Some(session.user_id.clone());
        }
    }

    None
}

/// Credential data for login and registration.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserCredentials {
    pub username: String,
    pub password: String,
}

/// Response body of the auth endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Handle `POST /api/auth/login`
///
/// Verifies credentials and returns a bearer token on success.
pub async fn handle_login(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<UserCredentials>,
) -> Json<AuthResponse> {
    match state.auth.verify(&credentials.username, &credentials.password) {
        Ok(true) => Json(AuthResponse {
            success: true,
            token: Some(issue_token(&credentials.username)),
            message: None,
        }),
        Ok(false) => Json(AuthResponse {
            success: false,
            token: None,
            message: Some("Invalid username or password".to_string()),
        }),
        Err(e) => {
            log::error!("login failed for {}: {}", credentials.username, e);
            Json(AuthResponse {
                success: false,
                token: None,
                message: Some("Authentication error".to_string()),
            })
        }
    }
}

/// Handle `POST /api/auth/register`.
pub async fn handle_register(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<UserCredentials>,
) -> Json<AuthResponse> {
    match state.auth.register(&credentials.username, &credentials.password) {
        Ok(()) => Json(AuthResponse {
            success: true,
            token: None,
            message: None,
        }),
        Err(e) => Json(AuthResponse {
            success: false,
            token: None,
            message: Some(e),
        }),
    }
}

/// Authentication middleware for the record endpoints
///
/// Requests without a valid bearer token are rejected with 401 before
/// any business logic runs; on success the username is injected into
/// the request extensions for the handlers.
pub async fn require_auth(
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(TypedHeader(header)) = auth {
        if let Some(username) = validate_token(header.token()) {
            request.extensions_mut().insert(Owner(username));
            return next.run(request).await;
        }
    }

    (
        StatusCode::UNAUTHORIZED,
        Json(AuthResponse {
            success: false,
            token: None,
            message: Some("Unauthorized".to_string()),
        }),
    )
        .into_response()
}

/// The authenticated principal, as resolved by [`require_auth`].
#[derive(Debug, Clone)]
pub struct Owner(pub String);
