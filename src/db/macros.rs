//! Backend dispatch and parameter macros.
//!
//! These declarative macros keep the per-backend match arms linear and readable. They expand at
//! compile time with zero runtime overhead.

/// Macro for generating backend dispatch match arms.
///
/// Generates a `match` over one of the per-backend enums in [`crate::db::pool`]
/// (`DbPool`, `PooledConnection`), so each arm can use the concrete sqlx type.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(DbPool, &self.pool, {
///     MySql(p) => p.size(),
///     SQLite(p) => p.size(),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($kind:ident, $value:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $crate::db::pool::$kind::$variant($p) => $body,
            )+
        }
    };
}

/// Build a `Vec<QueryParam>` from Rust values.
///
/// ```
/// use db_pool_cluster::{params, models::QueryParam};
///
/// let p = params![5, "abc", None::<i64>];
/// assert_eq!(p[0], QueryParam::Int(5));
/// assert_eq!(p[2], QueryParam::Null);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::models::QueryParam>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::models::QueryParam::from($value)),+]
    };
}

pub use impl_db_dispatch;
