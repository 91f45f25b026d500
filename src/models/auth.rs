//! Built-in user-management records.

use crate::db::entity::{ColumnDef, Entity};
use crate::models::QueryParam;
use serde::{Deserialize, Serialize};

/// Maximum length of a user name.
pub const MAX_USERNAME_LEN: usize = 32;
/// Maximum length of a stored password hash.
pub const MAX_PASSWORD_HASH_LEN: usize = 128;

/// A registered user. Never mutated after signup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    /// 32-digit numeric string
    pub id: String,
    pub name: String,
    /// Salted password hash
    pub password: String,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            password: password.into(),
        }
    }
}

const USER_COLUMNS: &[ColumnDef] = &[
    ColumnDef::text("id", 64).primary_key(),
    ColumnDef::text("name", MAX_USERNAME_LEN).unique(),
    ColumnDef::text("password", MAX_PASSWORD_HASH_LEN),
];

impl Entity for User {
    const TABLE: &'static str = "users";

    fn columns() -> &'static [ColumnDef] {
        USER_COLUMNS
    }

    fn values(&self) -> Vec<QueryParam> {
        vec![
            QueryParam::from(&self.id),
            QueryParam::from(&self.name),
            QueryParam::from(&self.password),
        ]
    }
}

/// An issued login token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuthToken {
    pub holder_id: String,
    /// 64 hex characters
    pub token: String,
    /// Unix timestamp in seconds
    pub expires: i64,
}

const AUTH_TOKEN_COLUMNS: &[ColumnDef] = &[
    ColumnDef::text("holder_id", 64).references("users", "id"),
    ColumnDef::text("token", 64).primary_key(),
    ColumnDef::integer("expires"),
];

impl Entity for AuthToken {
    const TABLE: &'static str = "auth_tokens";

    fn columns() -> &'static [ColumnDef] {
        AUTH_TOKEN_COLUMNS
    }

    fn values(&self) -> Vec<QueryParam> {
        vec![
            QueryParam::from(&self.holder_id),
            QueryParam::from(&self.token),
            QueryParam::Int(self.expires),
        ]
    }
}

/// The user a valid token belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenOwner {
    pub user_id: String,
    pub name: String,
}
