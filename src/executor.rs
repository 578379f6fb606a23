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

//! The statement-execution seam between lock operations and `sqlx`.
//!
//! Lock methods only ever need one capability: run a parameterized statement
//! and report how many rows it affected. [`LockExecutor`] captures exactly
//! that, and is implemented for the pool, the plain connection, and the open
//! transaction of every enabled backend. Handle methods therefore run
//! equally well standalone or inside a caller-managed transaction. That
//! matters, because acquire must execute inside *some* transaction for the
//! row lock to provide mutual exclusion.

use async_trait::async_trait;

/// Minimal statement-execution surface required by lock operations.
///
/// All lock statement parameters are text; each dialect's SQL performs any
/// server-side conversion it needs.
#[async_trait]
pub trait LockExecutor: Send {
    /// Execute a parameterized statement and return the affected-row count.
    async fn execute_lock_query(&mut self, query: &str, args: &[&str])
        -> Result<u64, sqlx::Error>;
}

macro_rules! impl_lock_executor {
    ($db:ty, $conn:ty) => {
        #[async_trait]
        impl LockExecutor for sqlx::Pool<$db> {
            async fn execute_lock_query(
                &mut self,
                query: &str,
                args: &[&str],
            ) -> Result<u64, sqlx::Error> {
                let mut q = sqlx::query(query);
                for arg in args {
                    q = q.bind(*arg);
                }
                Ok(q.execute(&*self).await?.rows_affected())
            }
        }

        #[async_trait]
        impl LockExecutor for sqlx::Transaction<'_, $db> {
            async fn execute_lock_query(
                &mut self,
                query: &str,
                args: &[&str],
            ) -> Result<u64, sqlx::Error> {
                let mut q = sqlx::query(query);
                for arg in args {
                    q = q.bind(*arg);
                }
                Ok(q.execute(&mut **self).await?.rows_affected())
            }
        }

        #[async_trait]
        impl LockExecutor for $conn {
            async fn execute_lock_query(
                &mut self,
                query: &str,
                args: &[&str],
            ) -> Result<u64, sqlx::Error> {
                let mut q = sqlx::query(query);
                for arg in args {
                    q = q.bind(*arg);
                }
                Ok(q.execute(&mut *self).await?.rows_affected())
            }
        }
    };
}

#[cfg(feature = "postgres-backend")]
impl_lock_executor!(sqlx::Postgres, sqlx::PgConnection);

#[cfg(feature = "mysql-backend")]
impl_lock_executor!(sqlx::MySql, sqlx::MySqlConnection);

#[cfg(feature = "sqlite-backend")]
impl_lock_executor!(sqlx::Sqlite, sqlx::SqliteConnection);
