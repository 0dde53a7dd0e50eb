//! Capability surface of the backend under test
//!
//! The engines only ever talk to a [`RestBackend`]. The HTTP implementation
//! lives in [`crate::http`], an in-memory one in [`crate::fake`].

use async_trait::async_trait;
use serde_json::Value;

use restcheck_common::{ApiError, ApiResponse, AuthResponse};

use crate::call::ClientCall;

/// Which key/bearer pair a call is made with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Anonymous key only
    Anon,
    /// Anonymous key plus a user's access token
    User { access_token: String },
    /// Service-role key; bypasses RLS
    ServiceRole,
}

impl Credential {
    pub fn is_service_role(&self) -> bool {
        matches!(self, Credential::ServiceRole)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Credential::Anon => "anon",
            Credential::User { .. } => "authenticated",
            Credential::ServiceRole => "service_role",
        }
    }
}

/// REST, RPC, auth and raw-SQL capabilities the engines depend on.
///
/// Implementations hold no identity state: every call names its
/// credential, and the caller keeps the session.
#[async_trait]
pub trait RestBackend: Send + Sync {
    /// Execute a table or RPC call
    async fn query(&self, credential: &Credential, call: &ClientCall) -> ApiResponse;

    async fn sign_up(&self, email: &str, password: &str, data: &Value) -> AuthResponse;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResponse;

    async fn sign_out(&self, credential: &Credential) -> Option<ApiError>;

    /// Update the signed-in user's metadata
    async fn update_user(&self, credential: &Credential, data: &Value) -> AuthResponse;

    async fn get_user(&self, credential: &Credential) -> AuthResponse;

    /// Run one statement through the raw-SQL debug endpoint
    async fn execute_sql(
        &self,
        credential: &Credential,
        sql: &str,
    ) -> std::result::Result<Vec<Value>, String>;
}

/// "User already registered" and similar responses to a sign-up
pub fn is_already_registered(error: &ApiError) -> bool {
    let message = error.message.to_ascii_lowercase();
    message.contains("already registered")
        || message.contains("already exists")
        || error.code.as_deref() == Some("user_already_exists")
}

/// "Invalid login credentials" and similar responses to a sign-in
pub fn is_invalid_credentials(error: &ApiError) -> bool {
    let message = error.message.to_ascii_lowercase();
    message.contains("invalid login credentials")
        || message.contains("invalid credentials")
        || message.contains("user not found")
        || error.code.as_deref() == Some("invalid_credentials")
}
