//! Backend dispatch macro.
//!
//! `Database` wraps one of two facade variants with the same operation set.
//! This macro expands the match over both variants so each delegating
//! method stays a single line.

/// Dispatch an expression over both [`Database`](crate::db::Database) variants.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(self, db => db.get_user_id(name).await)
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($database:expr, $inner:ident => $body:expr) => {
        match $database {
            $crate::db::Database::Raw($inner) => $body,
            $crate::db::Database::Mapped($inner) => $body,
        }
    };
}

pub use impl_db_dispatch;
