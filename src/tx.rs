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

//! Scoped transactional execution.
//!
//! ## Purpose
//! [`do_in_tx`] begins a transaction, runs the passed closure against it,
//! commits on success and rolls back on failure. Every acquire/release/
//! extend call site runs through it (directly or via the lease supervisor),
//! because the acquire statement relies on the transaction's row lock for
//! mutual exclusion between concurrent contenders.
//!
//! ## Guarantees
//! - begin failure → [`LockError::TxBegin`] wrapping the cause
//! - closure error → rollback attempted (its own failure is logged at debug
//!   and otherwise ignored), closure error returned unchanged
//! - closure panic → the transaction guard rolls back on drop, the panic
//!   propagates
//! - commit failure → [`LockError::TxCommit`] wrapping the cause

use crate::error::{LockError, LockResult};
use futures::future::BoxFuture;
use serde::Deserialize;
use sqlx::{Database, Executor, IntoArguments, Pool, Transaction};
use tracing::debug;

/// Transaction isolation levels understood by [`TxOptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options for [`do_in_tx_with_opts`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TxOptions {
    /// When set, `SET TRANSACTION ISOLATION LEVEL …` is issued right after
    /// begin (PostgreSQL and MySQL; SQLite callers leave this unset).
    pub isolation_level: Option<IsolationLevel>,
}

/// Begins a transaction, calls `f` with it, and commits or rolls back
/// depending on whether `f` succeeded.
pub async fn do_in_tx<DB, T, F>(pool: &Pool<DB>, f: F) -> LockResult<T>
where
    DB: Database,
    for<'q> <DB as Database>::Arguments<'q>: IntoArguments<'q, DB>,
    for<'c> &'c mut <DB as Database>::Connection: Executor<'c, Database = DB>,
    F: for<'t> FnOnce(&'t mut Transaction<'static, DB>) -> BoxFuture<'t, LockResult<T>>,
{
    do_in_tx_with_opts(pool, TxOptions::default(), f).await
}

/// A more configurable version of [`do_in_tx`] that allows passing
/// transaction options.
pub async fn do_in_tx_with_opts<DB, T, F>(pool: &Pool<DB>, opts: TxOptions, f: F) -> LockResult<T>
where
    DB: Database,
    for<'q> <DB as Database>::Arguments<'q>: IntoArguments<'q, DB>,
    for<'c> &'c mut <DB as Database>::Connection: Executor<'c, Database = DB>,
    F: for<'t> FnOnce(&'t mut Transaction<'static, DB>) -> BoxFuture<'t, LockResult<T>>,
{
    let mut tx = pool
        .begin()
        .await
        .map_err(|source| LockError::TxBegin { source })?;

    if let Some(level) = opts.isolation_level {
        let stmt = format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql());
        if let Err(err) = sqlx::query(&stmt).execute(&mut *tx).await {
            rollback_quietly(tx).await;
            return Err(err.into());
        }
    }

    match f(&mut tx).await {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|source| LockError::TxCommit { source })?;
            Ok(value)
        }
        Err(err) => {
            rollback_quietly(tx).await;
            Err(err)
        }
    }
}

async fn rollback_quietly<DB: Database>(tx: Transaction<'static, DB>) {
    if let Err(rollback_err) = tx.rollback().await {
        debug!(error = %rollback_err, "rollback of failed tx block failed");
    }
}
