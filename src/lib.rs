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

//! # DistrLock
//!
//! ## Purpose
//! Distributed locks for processes that share nothing but a relational
//! database. A named lock is one row; acquiring it is one UPDATE whose
//! WHERE clause only matches a free row, so the database's row-level
//! atomicity is the single source of truth about ownership. Leases expire
//! server-side, fencing tokens keep stale clients out, and a supervisor
//! keeps a lease alive while a job runs.
//!
//! ## Design Decisions
//! - **Server-side clocks only**: expiry is computed and compared by the
//!   database engine; client clock skew is irrelevant.
//! - **Affected-rows as the protocol**: exactly one affected row means the
//!   transition happened; zero rows is the domain outcome
//!   ([`LockError::LockAlreadyAcquired`] / [`LockError::LockAlreadyReleased`]).
//! - **Fencing tokens**: release and extend must present the token of the
//!   current acquisition; a stale holder cannot disturb a fresh one.
//! - **Executor seam**: every operation takes anything that can execute a
//!   statement, either a pool or an open transaction ([`LockExecutor`]).
//!
//! ## Backend Support
//! - **PostgreSQL** (feature: `postgres-backend`)
//! - **MySQL** (feature: `mysql-backend`)
//! - **SQLite** (feature: `sqlite-backend`, default; also the test target)
//!
//! ## Examples
//!
//! ### Acquire, work, release
//! ```rust,no_run
//! use distrlock::{do_in_tx, DbLockManager, Dialect, MigrationsDirection, MigrationsManager};
//! use std::time::Duration;
//!
//! # async fn example() -> distrlock::LockResult<()> {
//! let pool = sqlx::SqlitePool::connect("sqlite:locks.db").await?;
//! let manager = DbLockManager::new(Dialect::Sqlite)?;
//!
//! // One-time schema setup through the bundled migration.
//! let migrations = MigrationsManager::new(Dialect::Sqlite)?;
//! migrations
//!     .run(&mut pool.clone(), &manager.migrations(), MigrationsDirection::Up)
//!     .await?;
//!
//! let lock = do_in_tx(&pool, |tx| {
//!     Box::pin(async move {
//!         let mut lock = manager.new_lock(tx, "jobs:nightly-compaction").await?;
//!         lock.acquire(tx, Duration::from_secs(30)).await?;
//!         Ok(lock)
//!     })
//! })
//! .await?;
//!
//! // ... critical section ...
//!
//! do_in_tx(&pool, |tx| Box::pin(async move { lock.release(tx).await })).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Run a job under a supervised lease
//! ```rust,no_run
//! use distrlock::{DbLockManager, Dialect, DoExclusivelyOptions};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> distrlock::LockResult<()> {
//! # let pool = sqlx::SqlitePool::connect("sqlite:locks.db").await?;
//! # let manager = DbLockManager::new(Dialect::Sqlite)?;
//! let mut lock = manager.new_lock(&mut pool.clone(), "jobs:nightly-compaction").await?;
//! let opts = DoExclusivelyOptions {
//!     lock_ttl: Duration::from_secs(30),
//!     extend_interval: Duration::from_secs(10),
//!     release_timeout: Duration::from_secs(5),
//! };
//! lock.do_exclusively(&pool, &CancellationToken::new(), opts, |cancel| async move {
//!     while !cancel.is_cancelled() {
//!         // one unit of exclusive work
//!     }
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod lock;
pub mod manager;
pub mod migrate;
pub mod retry;
pub mod supervisor;
pub mod tx;

pub use dialect::Dialect;
pub use error::{LockError, LockResult};
pub use executor::LockExecutor;
pub use lock::DbLock;
pub use manager::{DbLockManager, DbLockManagerOpts, DEFAULT_TABLE_NAME, MAX_KEY_LEN};
pub use migrate::{
    Migration, MigrationsDirection, MigrationsManager, MIGRATIONS_NO_LIMIT, MIGRATIONS_TABLE_NAME,
};
pub use retry::{
    get_is_retryable, is_retryable, register_builtin_retryables, register_is_retryable,
};
pub use supervisor::DoExclusivelyOptions;
pub use tx::{do_in_tx, do_in_tx_with_opts, IsolationLevel, TxOptions};
