//! Credential hashing, token issuance and the login/signup flow.
//!
//! [`AuthService`] is framework-agnostic: it returns an [`AuthOutcome`]
//! carrying an HTTP status and message that a web layer turns into a
//! response, and the issued token that goes into a cookie.

use crate::db::{Database, UserStore};
use crate::error::{DbError, DbResult};
use crate::models::{MAX_USERNAME_LEN, TokenOwner};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

/// Maximum password length accepted at signup.
pub const MAX_PASSWORD_LEN: usize = 64;

/// Default token lifetime: 60 days.
pub const DEFAULT_MAX_AGE_SECS: i64 = 60 * 60 * 24 * 60;

const USER_ID_DIGITS: usize = 32;

/// Salts and keys read from the secrets file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Secrets {
    pub auth_token_salt: String,
    pub password_salt: String,
    #[serde(default)]
    pub app_secret: String,
}

impl Secrets {
    /// Load a JSON secrets file.
    pub async fn load(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&content).map_err(|e| {
            DbError::invalid_config(format!(
                "Malformed secrets file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

fn sha256_hex(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

/// Hex SHA-256 of the user id, the token salt and the current time.
pub fn generate_auth_token(user_id: &str, secrets: &Secrets) -> String {
    let now = chrono::Utc::now();
    let payload = format!(
        "{}{}{}.{:09}",
        user_id,
        secrets.auth_token_salt,
        now.timestamp(),
        now.timestamp_subsec_nanos()
    );
    sha256_hex(&payload)
}

/// Hex SHA-256 of the password followed by the password salt.
pub fn hash_password(password: &str, secrets: &Secrets) -> String {
    sha256_hex(&format!("{}{}", password, secrets.password_salt))
}

/// A fresh user id of 32 random decimal digits.
pub fn generate_user_id() -> String {
    let mut rng = rand::thread_rng();
    (0..USER_ID_DIGITS)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// One form field checked by [`verify_input`].
#[derive(Debug, Clone, Copy)]
pub struct InputField<'a> {
    pub name: &'a str,
    pub value: Option<&'a str>,
    pub max_len: usize,
}

/// Check every field is present, non-empty and short enough.
///
/// Returns the message for the first failing field.
pub fn verify_input(fields: &[InputField<'_>]) -> Result<(), String> {
    for field in fields {
        let Some(value) = field.value else {
            return Err(format!("{} must be given.", field.name));
        };
        if value.is_empty() {
            return Err(format!("{} must not be empty.", field.name));
        }
        if value.chars().count() > field.max_len {
            return Err(format!(
                "{} must be a maximum of {} characters in length.",
                field.name, field.max_len
            ));
        }
    }
    Ok(())
}

/// Compare two secrets without leaking where they differ.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Mask a token for logging (only the first 3 chars are shown).
pub fn mask_token(token: &str) -> String {
    match token.get(..3) {
        Some(prefix) if token.len() > 3 => format!("{}***", prefix),
        _ => "***".to_string(),
    }
}

/// Submitted login or signup form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }
}

/// Result of a login or signup attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Credentials accepted and a token was issued.
    Authenticated {
        user_id: String,
        token: String,
        max_age: i64,
    },
    /// Request refused with an HTTP status and message.
    Rejected { status: u16, message: String },
}

impl AuthOutcome {
    fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Authenticated { token, .. } => Some(token),
            Self::Rejected { .. } => None,
        }
    }

    /// HTTP status the web layer should answer with.
    pub fn status(&self) -> u16 {
        match self {
            Self::Authenticated { .. } => 200,
            Self::Rejected { status, .. } => *status,
        }
    }
}

/// Login, signup and token resolution over a [`UserStore`].
#[derive(Debug)]
pub struct AuthService<S: UserStore = Database> {
    store: S,
    secrets: Secrets,
    max_age: i64,
}

impl<S: UserStore> AuthService<S> {
    pub fn new(store: S, secrets: Secrets) -> Self {
        Self {
            store,
            secrets,
            max_age: DEFAULT_MAX_AGE_SECS,
        }
    }

    /// Override the lifetime of issued tokens.
    pub fn with_max_age(mut self, max_age_secs: i64) -> Self {
        self.max_age = max_age_secs;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn secrets(&self) -> &Secrets {
        &self.secrets
    }

    pub fn max_age(&self) -> i64 {
        self.max_age
    }

    async fn issue_token(&self, user_id: String) -> DbResult<AuthOutcome> {
        let token = generate_auth_token(&user_id, &self.secrets);
        self.store
            .save_auth_token(&token, &user_id, self.max_age)
            .await?;
        debug!(token = %mask_token(&token), "Issued auth token");
        Ok(AuthOutcome::Authenticated {
            user_id,
            token,
            max_age: self.max_age,
        })
    }

    pub async fn login(&self, credentials: &Credentials) -> DbResult<AuthOutcome> {
        let (Some(username), Some(password)) = (&credentials.username, &credentials.password)
        else {
            return Ok(AuthOutcome::rejected(
                400,
                "Could not login: Username or Password was not given.",
            ));
        };

        let hashed = hash_password(password, &self.secrets);
        if !self.store.password_matches(username, &hashed).await? {
            warn!("Login rejected: credentials do not match");
            return Ok(AuthOutcome::rejected(
                401,
                "Could not login: Username or Password does not match.",
            ));
        }

        let Some(user_id) = self.store.get_user_id(username).await? else {
            return Ok(AuthOutcome::rejected(
                401,
                "Could not login: Username or Password does not match.",
            ));
        };
        self.issue_token(user_id).await
    }

    pub async fn signup(&self, credentials: &Credentials) -> DbResult<AuthOutcome> {
        let fields = [
            InputField {
                name: "Username",
                value: credentials.username.as_deref(),
                max_len: MAX_USERNAME_LEN,
            },
            InputField {
                name: "Password",
                value: credentials.password.as_deref(),
                max_len: MAX_PASSWORD_LEN,
            },
        ];
        if let Err(error) = verify_input(&fields) {
            return Ok(AuthOutcome::rejected(
                400,
                format!("Could not create account: {}", error),
            ));
        }
        let (Some(username), Some(password)) = (&credentials.username, &credentials.password)
        else {
            return Ok(AuthOutcome::rejected(400, "Could not create account."));
        };

        let user_id = generate_user_id();
        let hashed = hash_password(password, &self.secrets);
        if !self.store.create_user(&user_id, username, &hashed).await? {
            return Ok(AuthOutcome::rejected(400, "Username is already taken."));
        }
        self.issue_token(user_id).await
    }

    /// Resolve the token from a request cookie to its owner.
    pub async fn user_from_token(&self, token: Option<&str>) -> DbResult<Option<TokenOwner>> {
        match token {
            Some(token) => self.store.get_user_id_from_token(token).await,
            None => Ok(None),
        }
    }

    /// Whether a user with this name exists.
    pub async fn user_exists(&self, username: &str) -> DbResult<bool> {
        Ok(self.store.get_user_id(username).await?.is_some())
    }
}
