//! Registry of the named queries behind the user store.
//!
//! The raw facade builds its operations from these definitions and the CLI
//! looks queries up here by name.

use crate::db::context::ContextManager;
use crate::db::provider::ConnectionProvider;
use crate::db::query::Query;
use crate::models::ParamInput;
use std::sync::Arc;

/// A query registered under a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedQuery {
    pub name: &'static str,
    pub sql: &'static str,
    /// Result format selector
    pub format: &'static str,
    /// Positional parameters, for help output
    pub params: &'static [&'static str],
}

impl NamedQuery {
    pub fn build<P: ConnectionProvider>(
        &self,
        context: Arc<ContextManager<P>>,
        params: Vec<ParamInput>,
    ) -> Query<P> {
        Query::new(context, self.sql, params).format(self.format)
    }
}

pub const CREATE_USER: NamedQuery = NamedQuery {
    name: "create_user",
    sql: "INSERT INTO users(id, name, password) VALUES (?, ?, ?)",
    format: "raw",
    params: &["user_id", "name", "password_hash"],
};

pub const GET_PASSWORD: NamedQuery = NamedQuery {
    name: "get_password",
    sql: "SELECT password FROM users WHERE name = ?",
    format: "unpack_one",
    params: &["name"],
};

pub const GET_USER_ID: NamedQuery = NamedQuery {
    name: "get_user_id",
    sql: "SELECT id FROM users WHERE name = ?",
    format: "unpack_one",
    params: &["name"],
};

pub const LIST_USERS: NamedQuery = NamedQuery {
    name: "list_users",
    sql: "SELECT id, name FROM users ORDER BY name",
    format: "all",
    params: &[],
};

pub const SAVE_AUTH_TOKEN: NamedQuery = NamedQuery {
    name: "save_auth_token",
    sql: "INSERT INTO auth_tokens(holder_id, token, expires) VALUES (?, ?, ?)",
    format: "raw",
    params: &["user_id", "token", "expires"],
};

pub const GET_TOKEN_OWNER: NamedQuery = NamedQuery {
    name: "get_user_id_from_token",
    sql: "SELECT at.holder_id, u.name, at.expires \
          FROM auth_tokens AS at \
          INNER JOIN users AS u ON u.id = at.holder_id \
          WHERE at.token = ?",
    format: "one",
    params: &["token"],
};

pub const GET_AUTH_TOKEN: NamedQuery = NamedQuery {
    name: "get_auth_token",
    sql: "SELECT token FROM auth_tokens \
          WHERE holder_id = ? AND expires >= ? \
          ORDER BY expires DESC LIMIT 1",
    format: "unpack_one",
    params: &["user_id", "now"],
};

pub const DELETE_AUTH_TOKEN: NamedQuery = NamedQuery {
    name: "delete_auth_token",
    sql: "DELETE FROM auth_tokens WHERE token = ?",
    format: "raw",
    params: &["token"],
};

pub const NAMED_QUERIES: &[NamedQuery] = &[
    CREATE_USER,
    GET_PASSWORD,
    GET_USER_ID,
    LIST_USERS,
    SAVE_AUTH_TOKEN,
    GET_TOKEN_OWNER,
    GET_AUTH_TOKEN,
    DELETE_AUTH_TOKEN,
];

pub fn lookup(name: &str) -> Option<&'static NamedQuery> {
    NAMED_QUERIES.iter().find(|q| q.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(lookup("get_user_id"), Some(&GET_USER_ID));
        assert!(lookup("drop_everything").is_none());
    }

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = NAMED_QUERIES.iter().map(|q| q.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), NAMED_QUERIES.len());
    }

    #[test]
    fn test_placeholder_counts_match() {
        for query in NAMED_QUERIES {
            assert_eq!(
                query.sql.matches('?').count(),
                query.params.len(),
                "{}",
                query.name
            );
        }
    }
}
