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

//! Distributed lock manager bound to a SQL dialect.
//!
//! ## Purpose
//! The manager owns the dialect's query templates, emits the schema
//! migration for the lock table, and constructs [`DbLock`] handles. One
//! manager per database is enough; handles are cheap and per-key.

use crate::dialect::{Dialect, LockQueries};
use crate::error::{LockError, LockResult};
use crate::executor::LockExecutor;
use crate::lock::DbLock;
use crate::migrate::Migration;
use std::sync::Arc;
use tracing::instrument;

/// Default name of the table backing the locks.
pub const DEFAULT_TABLE_NAME: &str = "distributed_locks";

/// Maximum allowed lock key length, in characters.
pub const MAX_KEY_LEN: usize = 40;

pub(crate) const CREATE_TABLE_MIGRATION_ID: &str = "distrlock_00001_create_table";

/// Management functionality for distributed locks based on a SQL database.
#[derive(Debug)]
pub struct DbLockManager {
    queries: Arc<LockQueries>,
}

/// Options for [`DbLockManager`].
#[derive(Debug, Clone)]
pub struct DbLockManagerOpts {
    /// Name of the table backing the locks.
    pub table_name: String,
}

impl Default for DbLockManagerOpts {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_owned(),
        }
    }
}

impl DbLockManager {
    /// Creates a new distributed lock manager that uses a SQL database as
    /// its backend.
    pub fn new(dialect: Dialect) -> LockResult<Self> {
        Self::with_opts(dialect, DbLockManagerOpts::default())
    }

    /// A more configurable version of [`DbLockManager::new`].
    pub fn with_opts(dialect: Dialect, opts: DbLockManagerOpts) -> LockResult<Self> {
        Ok(Self {
            queries: Arc::new(LockQueries::new(dialect, &opts.table_name)?),
        })
    }

    /// Migrations that must be applied before creating new locks.
    pub fn migrations(&self) -> Vec<Migration> {
        vec![Migration::new(
            CREATE_TABLE_MIGRATION_ID,
            vec![self.queries.create_table.clone()],
            vec![self.queries.drop_table.clone()],
        )]
    }

    /// Creates a new initialized (but not acquired) distributed lock.
    ///
    /// Inserts the key's row if it does not exist yet (a no-op otherwise),
    /// so that subsequent acquires have an UPDATE target. The key must be
    /// non-empty and at most [`MAX_KEY_LEN`] characters; validation happens
    /// before any SQL runs.
    #[instrument(skip(self, executor), fields(lock_key = %key))]
    pub async fn new_lock<E>(&self, executor: &mut E, key: &str) -> LockResult<DbLock>
    where
        E: LockExecutor + ?Sized,
    {
        if key.is_empty() {
            return Err(LockError::InvalidKey("lock key cannot be empty".to_owned()));
        }
        if key.chars().count() > MAX_KEY_LEN {
            return Err(LockError::InvalidKey(format!(
                "lock key cannot be longer than {MAX_KEY_LEN} symbols"
            )));
        }
        executor
            .execute_lock_query(&self.queries.init_lock, &[key])
            .await?;
        Ok(DbLock::new(key.to_owned(), Arc::clone(&self.queries)))
    }
}
