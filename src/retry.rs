// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of DistrLock.
//
// DistrLock is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// DistrLock is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with DistrLock. If not, see <https://www.gnu.org/licenses/>.

//! Classification of transient database errors.
//!
//! ## Purpose
//! Callers wrap lock operations in retry loops; this module decides which
//! errors are worth retrying. A process-wide registry maps a [`Dialect`] to
//! predicates. Several registrations for the same dialect compose in FIFO
//! order: an error is transient iff *any* predicate accepts it or any error
//! in its `source()` chain, so transient causes buried inside
//! [`LockError::TxBegin`]-style wrappers are still recognized.
//!
//! Registration is expected once at process startup
//! ([`register_builtin_retryables`] covers the compiled-in dialects).
//! Domain outcomes such as [`crate::LockError::LockAlreadyAcquired`] are
//! never transient: no built-in predicate matches them.

use crate::dialect::Dialect;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::{Arc, OnceLock, RwLock};

/// Predicate deciding whether one error in a cause chain is transient.
pub type RetryPredicate = Arc<dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync>;

fn registry() -> &'static RwLock<HashMap<Dialect, Vec<RetryPredicate>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<Dialect, Vec<RetryPredicate>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Registers a predicate that can tell whether a database error of the
/// given dialect is transient. Appends to any previously registered
/// predicates.
pub fn register_is_retryable<F>(dialect: Dialect, predicate: F)
where
    F: Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static,
{
    let mut reg = registry()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    reg.entry(dialect).or_default().push(Arc::new(predicate));
}

/// Tells whether `err` (or anything in its cause chain) is a transient
/// error for the given dialect. Unknown dialects are never transient.
pub fn is_retryable(dialect: Dialect, err: &(dyn StdError + 'static)) -> bool {
    let reg = registry()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let Some(predicates) = reg.get(&dialect) else {
        return false;
    };
    let mut link: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(current) = link {
        if predicates.iter().any(|predicate| predicate(current)) {
            return true;
        }
        link = current.source();
    }
    false
}

/// Returns a closure capturing the dialect, for callers that plug the
/// classifier into a generic retry policy.
pub fn get_is_retryable(
    dialect: Dialect,
) -> impl Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static {
    move |err| is_retryable(dialect, err)
}

/// Registers the built-in predicates for every dialect compiled into this
/// build. Call once at startup.
pub fn register_builtin_retryables() {
    #[cfg(feature = "postgres-backend")]
    register_postgres_retryable();
    #[cfg(feature = "mysql-backend")]
    register_mysql_retryable();
    #[cfg(feature = "sqlite-backend")]
    register_sqlite_retryable();
    register_mssql_retryable();
}

/// PostgreSQL: deadlocks and serialization failures, plus the invalidated
/// prepared-statement cache condition (the statement cache is rebuilt on
/// retry, so retrying clears it).
#[cfg(feature = "postgres-backend")]
pub fn register_postgres_retryable() {
    register_is_retryable(Dialect::Postgres, |err| {
        match err.downcast_ref::<sqlx::Error>() {
            Some(sqlx::Error::Database(db_err)) => {
                postgres_code_is_retryable(db_err.code().as_deref(), db_err.message())
            }
            _ => false,
        }
    });
}

/// MySQL: deadlocks, lock wait timeouts, and broken connections.
#[cfg(feature = "mysql-backend")]
pub fn register_mysql_retryable() {
    register_is_retryable(Dialect::MySql, |err| {
        match err.downcast_ref::<sqlx::Error>() {
            Some(sqlx::Error::Database(db_err)) => db_err
                .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                .map(|mysql_err| mysql_error_is_retryable(mysql_err.number()))
                .unwrap_or(false),
            Some(sqlx::Error::Io(_)) => true,
            _ => false,
        }
    });
}

/// MSSQL: deadlocks. Matched through the generic error-code surface so any
/// driver that reports MSSQL codes is covered.
pub fn register_mssql_retryable() {
    register_is_retryable(Dialect::Mssql, |err| {
        match err.downcast_ref::<sqlx::Error>() {
            Some(sqlx::Error::Database(db_err)) => db_err
                .code()
                .as_deref()
                .map(mssql_code_is_retryable)
                .unwrap_or(false),
            _ => false,
        }
    });
}

/// SQLite: busy and locked result codes, extended variants included.
#[cfg(feature = "sqlite-backend")]
pub fn register_sqlite_retryable() {
    register_is_retryable(Dialect::Sqlite, |err| {
        match err.downcast_ref::<sqlx::Error>() {
            Some(sqlx::Error::Database(db_err)) => db_err
                .code()
                .as_deref()
                .map(sqlite_code_is_retryable)
                .unwrap_or(false),
            _ => false,
        }
    });
}

pub(crate) fn postgres_code_is_retryable(code: Option<&str>, message: &str) -> bool {
    match code {
        // deadlock_detected, serialization_failure
        Some("40P01") | Some("40001") => true,
        Some("0A000") => message.contains("cached plan must not change result type"),
        _ => false,
    }
}

pub(crate) fn mysql_error_is_retryable(number: u16) -> bool {
    // 1213 deadlock, 1205 lock wait timeout
    matches!(number, 1213 | 1205)
}

pub(crate) fn mssql_code_is_retryable(code: &str) -> bool {
    // 1205 deadlock victim
    code == "1205"
}

pub(crate) fn sqlite_code_is_retryable(code: &str) -> bool {
    // The primary result code is the low byte of the extended code;
    // SQLITE_BUSY = 5, SQLITE_LOCKED = 6.
    code.parse::<i64>()
        .map(|n| matches!(n & 0xff, 5 | 6))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LockError;
    use thiserror::Error;

    #[derive(Error, Debug)]
    #[error("worker pool saturated")]
    struct SaturatedError;

    #[derive(Error, Debug)]
    #[error("query layer: {source}")]
    struct WrapError {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    }

    fn wrap(err: impl StdError + Send + Sync + 'static) -> WrapError {
        WrapError {
            source: Box::new(err),
        }
    }

    #[test]
    fn postgres_code_table() {
        assert!(postgres_code_is_retryable(Some("40P01"), ""));
        assert!(postgres_code_is_retryable(Some("40001"), ""));
        assert!(postgres_code_is_retryable(
            Some("0A000"),
            "cached plan must not change result type"
        ));
        assert!(!postgres_code_is_retryable(Some("0A000"), "feature not supported"));
        assert!(!postgres_code_is_retryable(Some("23505"), ""));
        assert!(!postgres_code_is_retryable(None, "whatever"));
    }

    #[test]
    fn mysql_code_table() {
        assert!(mysql_error_is_retryable(1213));
        assert!(mysql_error_is_retryable(1205));
        assert!(!mysql_error_is_retryable(1062));
    }

    #[test]
    fn mssql_code_table() {
        assert!(mssql_code_is_retryable("1205"));
        assert!(!mssql_code_is_retryable("2627"));
    }

    #[test]
    fn sqlite_code_table() {
        assert!(sqlite_code_is_retryable("5"));
        assert!(sqlite_code_is_retryable("6"));
        // SQLITE_BUSY_SNAPSHOT (517) and SQLITE_LOCKED_SHAREDCACHE (262)
        assert!(sqlite_code_is_retryable("517"));
        assert!(sqlite_code_is_retryable("262"));
        assert!(!sqlite_code_is_retryable("1"));
        assert!(!sqlite_code_is_retryable("not-a-code"));
    }

    #[test]
    fn unknown_dialect_is_never_retryable() {
        // Nothing registers Mssql predicates in unit tests.
        assert!(!is_retryable(Dialect::Mssql, &SaturatedError));
    }

    #[test]
    fn classifier_sees_through_wrapping_layers() {
        register_is_retryable(Dialect::Postgres, |err| {
            err.downcast_ref::<SaturatedError>().is_some()
        });
        let wrapped_twice = wrap(wrap(SaturatedError));
        assert!(is_retryable(Dialect::Postgres, &wrapped_twice));
        assert!(!is_retryable(Dialect::Postgres, &wrap(std::fmt::Error)));
    }

    #[test]
    fn classifier_unwraps_tx_wrapper_errors() {
        register_is_retryable(Dialect::MySql, |err| {
            matches!(err.downcast_ref::<sqlx::Error>(), Some(sqlx::Error::PoolTimedOut))
        });
        let begin_err = LockError::TxBegin {
            source: sqlx::Error::PoolTimedOut,
        };
        let commit_err = LockError::TxCommit {
            source: sqlx::Error::PoolTimedOut,
        };
        let rollback_err = LockError::TxRollback {
            source: sqlx::Error::PoolTimedOut,
        };
        assert!(is_retryable(Dialect::MySql, &begin_err));
        assert!(is_retryable(Dialect::MySql, &commit_err));
        assert!(is_retryable(Dialect::MySql, &rollback_err));
        assert!(!is_retryable(Dialect::MySql, &LockError::LockAlreadyAcquired));
    }

    #[test]
    fn registrations_compose_in_fifo_order() {
        #[derive(Error, Debug)]
        #[error("first")]
        struct FirstError;
        #[derive(Error, Debug)]
        #[error("second")]
        struct SecondError;

        register_is_retryable(Dialect::Sqlite, |err| {
            err.downcast_ref::<FirstError>().is_some()
        });
        register_is_retryable(Dialect::Sqlite, |err| {
            err.downcast_ref::<SecondError>().is_some()
        });
        assert!(is_retryable(Dialect::Sqlite, &FirstError));
        assert!(is_retryable(Dialect::Sqlite, &SecondError));
        assert!(!is_retryable(Dialect::Sqlite, &SaturatedError));
        let composed = get_is_retryable(Dialect::Sqlite);
        assert!(composed(&wrap(SecondError)));
    }
}
