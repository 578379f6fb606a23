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

//! Per-engine SQL templates for the lock state machine.
//!
//! ## Purpose
//! The lock protocol is a single SQL state machine; only the statement texts
//! differ between engines. Each supported dialect provides six statements
//! plus an interval formatter, and every statement evaluates "now" on the
//! database server so that client clock skew never matters.
//!
//! ## Schema
//! ```sql
//! CREATE TABLE distributed_locks (
//!   lock_key  varchar(40) PRIMARY KEY,
//!   token     varchar(36),   -- fencing token of the current acquisition
//!   expire_at timestamp      -- PostgreSQL; BIGINT of 100-µs ticks on MySQL/SQLite
//! );
//! ```
//!
//! A key is held iff its row exists, `expire_at` is non-NULL, and
//! `expire_at >= now()` evaluated server-side. Release clears `expire_at`;
//! rows are never deleted by normal operation.

use crate::error::{LockError, LockResult};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Supported SQL dialects.
///
/// `Postgres`, `MySql`, and `Sqlite` have full lock query support. `Mssql`
/// participates in retry classification only; asking it for lock queries
/// reports [`LockError::UnsupportedDialect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
    Mssql,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
            Dialect::Mssql => "mssql",
        })
    }
}

/// SQLite expression for the current time as 100-µs ticks since the Unix
/// epoch (86,400 s/day × 10,000 ticks/s).
const SQLITE_NOW_TICKS: &str =
    "CAST((julianday('now') - 2440587.5) * 864000000.0 AS INTEGER)";

/// The six lock statements plus interval formatting for one dialect.
///
/// Statement parameters are always passed as text; each engine's template
/// does whatever server-side arithmetic its `expire_at` representation
/// needs. The acquire statement's `OR token = ?` arm is what makes
/// reacquiring with the same token idempotent.
#[derive(Debug)]
pub(crate) struct LockQueries {
    pub(crate) dialect: Dialect,
    pub(crate) create_table: String,
    pub(crate) drop_table: String,
    pub(crate) init_lock: String,
    pub(crate) acquire_lock: String,
    pub(crate) release_lock: String,
    pub(crate) extend_lock: String,
}

impl LockQueries {
    pub(crate) fn new(dialect: Dialect, table_name: &str) -> LockResult<Self> {
        match dialect {
            Dialect::Postgres => Ok(Self::postgres(table_name)),
            Dialect::MySql => Ok(Self::mysql(table_name)),
            Dialect::Sqlite => Ok(Self::sqlite(table_name)),
            Dialect::Mssql => Err(LockError::UnsupportedDialect(dialect)),
        }
    }

    /// Formats a TTL the way the dialect's acquire/extend statements expect
    /// their interval parameter.
    pub(crate) fn make_interval(&self, interval: Duration) -> String {
        match self.dialect {
            // Cast to an interval by the statement itself ($1::interval).
            Dialect::Postgres => format!("{} microseconds", interval.as_micros()),
            // Bound into INTERVAL ? MICROSECOND.
            Dialect::MySql => interval.as_micros().to_string(),
            // 100-µs ticks added to the server-side tick counter.
            Dialect::Sqlite => (interval.as_micros() / 100).to_string(),
            Dialect::Mssql => String::new(),
        }
    }

    fn postgres(t: &str) -> Self {
        Self {
            dialect: Dialect::Postgres,
            create_table: format!(
                r#"CREATE TABLE "{t}" (lock_key varchar(40) PRIMARY KEY, token varchar(36), expire_at timestamp);"#
            ),
            drop_table: format!(r#"DROP TABLE IF EXISTS "{t}";"#),
            init_lock: format!(
                r#"INSERT INTO "{t}" (lock_key) VALUES ($1) ON CONFLICT (lock_key) DO NOTHING;"#
            ),
            acquire_lock: format!(
                r#"UPDATE "{t}" SET expire_at = NOW() + $1::interval, token = $2 WHERE lock_key = $3 AND ((expire_at IS NULL OR expire_at < NOW()) OR token = $4);"#
            ),
            release_lock: format!(
                r#"UPDATE "{t}" SET expire_at = NULL WHERE lock_key = $1 AND token = $2 AND expire_at >= NOW();"#
            ),
            extend_lock: format!(
                r#"UPDATE "{t}" SET expire_at = NOW() + $1::interval WHERE lock_key = $2 AND token = $3 AND expire_at >= NOW();"#
            ),
        }
    }

    fn mysql(t: &str) -> Self {
        Self {
            dialect: Dialect::MySql,
            create_table: format!(
                "CREATE TABLE `{t}` (lock_key VARCHAR(40) PRIMARY KEY, token VARCHAR(36), expire_at BIGINT);"
            ),
            drop_table: format!("DROP TABLE IF EXISTS `{t}`;"),
            init_lock: format!("INSERT IGNORE `{t}` (lock_key) VALUES (?);"),
            acquire_lock: format!(
                "UPDATE `{t}` SET expire_at = UNIX_TIMESTAMP(DATE_ADD(CURTIME(4), INTERVAL ? MICROSECOND))*10000, token = ? \
                 WHERE lock_key = ? AND ((expire_at IS NULL OR expire_at < UNIX_TIMESTAMP(CURTIME(4))*10000) OR token = ?);"
            ),
            release_lock: format!(
                "UPDATE `{t}` SET expire_at = NULL WHERE lock_key = ? AND token = ? AND expire_at >= UNIX_TIMESTAMP(CURTIME(4))*10000;"
            ),
            extend_lock: format!(
                "UPDATE `{t}` SET expire_at = UNIX_TIMESTAMP(DATE_ADD(CURTIME(4), INTERVAL ? MICROSECOND))*10000 \
                 WHERE lock_key = ? AND token = ? AND expire_at >= UNIX_TIMESTAMP(CURTIME(4))*10000;"
            ),
        }
    }

    fn sqlite(t: &str) -> Self {
        let now = SQLITE_NOW_TICKS;
        Self {
            dialect: Dialect::Sqlite,
            create_table: format!(
                r#"CREATE TABLE "{t}" (lock_key varchar(40) PRIMARY KEY, token varchar(36), expire_at bigint);"#
            ),
            drop_table: format!(r#"DROP TABLE IF EXISTS "{t}";"#),
            init_lock: format!(
                r#"INSERT INTO "{t}" (lock_key) VALUES (?) ON CONFLICT (lock_key) DO NOTHING;"#
            ),
            acquire_lock: format!(
                r#"UPDATE "{t}" SET expire_at = {now} + ?, token = ? WHERE lock_key = ? AND ((expire_at IS NULL OR expire_at < {now}) OR token = ?);"#
            ),
            release_lock: format!(
                r#"UPDATE "{t}" SET expire_at = NULL WHERE lock_key = ? AND token = ? AND expire_at >= {now};"#
            ),
            extend_lock: format!(
                r#"UPDATE "{t}" SET expire_at = {now} + ? WHERE lock_key = ? AND token = ? AND expire_at >= {now};"#
            ),
        }
    }
}
