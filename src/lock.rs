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

//! Per-key lock handle.
//!
//! ## State machine
//! ```text
//! NEW --(acquire ok)--> HELD --(extend ok)--> HELD
//!  ^                     |
//!  |                     +--(release ok)--> RELEASED
//!  |                     +--(extend/release: 0 rows)--> LOST
//!  +--(acquire fail)---- NEW
//! ```
//!
//! The handle is a client-side view; the database row is the authoritative
//! state. Multiple handles for the same key across processes are normal.
//! From LOST, either discard the handle or call `acquire` again (which
//! resets the token); the handle does not prevent reuse, the database does.

use crate::dialect::LockQueries;
use crate::error::{LockError, LockResult};
use crate::executor::LockExecutor;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use ulid::Ulid;

/// A distributed lock object backed by one row in the lock table.
#[derive(Debug, Clone)]
pub struct DbLock {
    pub(crate) key: String,
    pub(crate) ttl: Duration,
    pub(crate) token: String,
    pub(crate) queries: Arc<LockQueries>,
}

impl DbLock {
    pub(crate) fn new(key: String, queries: Arc<LockQueries>) -> Self {
        Self {
            key,
            ttl: Duration::ZERO,
            token: String::new(),
            queries,
        }
    }

    /// The lock key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The TTL passed to the last successful acquire. Extend reuses it.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Token of the last acquired lock, or empty if this handle never
    /// acquired successfully. Useful in logs to correlate holders.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Acquires the lock with a freshly generated token.
    ///
    /// Succeeds iff the row is free (missing expiry or expired). On success
    /// the handle carries the new fencing token; on
    /// [`LockError::LockAlreadyAcquired`] the handle is left untouched.
    #[instrument(skip(self, executor), fields(lock_key = %self.key))]
    pub async fn acquire<E>(&mut self, executor: &mut E, lock_ttl: Duration) -> LockResult<()>
    where
        E: LockExecutor + ?Sized,
    {
        let token = Ulid::new().to_string();
        self.acquire_with_static_token(executor, &token, lock_ttl)
            .await
    }

    /// Acquires the lock with a caller-supplied token.
    ///
    /// The acquire statement succeeds not only when the row is free but
    /// also when the current unexpired holder carries the *same* token.
    /// That disjunct is deliberate; it is what makes this method useful:
    ///
    /// 1. Repeatedly reacquiring the same lock while keeping other tokens
    ///    out, e.g. blocking an old generation of workers across a rolling
    ///    upgrade.
    /// 2. Letting several cooperating processes share one lock via a
    ///    well-known token.
    ///
    /// It also makes retrying an acquire after a transient network failure
    /// idempotent. Prefer [`DbLock::acquire`] unless you need one of these.
    #[instrument(skip(self, executor, token), fields(lock_key = %self.key))]
    pub async fn acquire_with_static_token<E>(
        &mut self,
        executor: &mut E,
        token: &str,
        lock_ttl: Duration,
    ) -> LockResult<()>
    where
        E: LockExecutor + ?Sized,
    {
        let interval = self.queries.make_interval(lock_ttl);
        exec_and_check(
            executor,
            &self.queries.acquire_lock,
            &[&interval, token, &self.key, token],
            LockError::LockAlreadyAcquired,
        )
        .await?;
        self.ttl = lock_ttl;
        self.token = token.to_owned();
        Ok(())
    }

    /// Releases the lock by clearing its expiry.
    ///
    /// Returns [`LockError::LockAlreadyReleased`] if the lease had already
    /// expired, was released, or is held under a different token. The row
    /// itself stays in place as the target for future acquires.
    #[instrument(skip(self, executor), fields(lock_key = %self.key, lock_token = %self.token))]
    pub async fn release<E>(&self, executor: &mut E) -> LockResult<()>
    where
        E: LockExecutor + ?Sized,
    {
        exec_and_check(
            executor,
            &self.queries.release_lock,
            &[&self.key, &self.token],
            LockError::LockAlreadyReleased,
        )
        .await
    }

    /// Resets the expiration timeout of an already acquired lock, using the
    /// TTL from the last acquire.
    ///
    /// [`LockError::LockAlreadyReleased`] means the lease is gone and the
    /// lock must be acquired again. A handle that never acquired has no TTL
    /// to extend with and gets the same answer without touching the
    /// database.
    #[instrument(skip(self, executor), fields(lock_key = %self.key, lock_token = %self.token))]
    pub async fn extend<E>(&self, executor: &mut E) -> LockResult<()>
    where
        E: LockExecutor + ?Sized,
    {
        if self.token.is_empty() {
            return Err(LockError::LockAlreadyReleased);
        }
        let interval = self.queries.make_interval(self.ttl);
        exec_and_check(
            executor,
            &self.queries.extend_lock,
            &[&interval, &self.key, &self.token],
            LockError::LockAlreadyReleased,
        )
        .await
    }
}

/// Runs a mutating lock statement and enforces the affected-rows contract:
/// exactly one affected row means the transition happened; zero means the
/// row state did not permit it, reported as `on_zero_rows`.
async fn exec_and_check<E>(
    executor: &mut E,
    query: &str,
    args: &[&str],
    on_zero_rows: LockError,
) -> LockResult<()>
where
    E: LockExecutor + ?Sized,
{
    let affected = executor.execute_lock_query(query, args).await?;
    if affected != 1 {
        return Err(on_zero_rows);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::executor::testing::ScriptedExecutor;

    fn lock(key: &str) -> DbLock {
        DbLock::new(
            key.to_owned(),
            Arc::new(LockQueries::new(Dialect::Postgres, "distributed_locks").unwrap()),
        )
    }

    #[tokio::test]
    async fn acquire_stores_token_and_ttl() {
        let mut executor = ScriptedExecutor::new([1]);
        let mut lock = lock("job-A");
        lock.acquire(&mut executor, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!lock.token().is_empty());
        assert_eq!(lock.ttl(), Duration::from_secs(5));

        let (_, args) = &executor.calls[0];
        // (interval, token, key, token); the token appears twice for the
        // idempotent-reacquire disjunct.
        assert_eq!(args[0], "5000000 microseconds");
        assert_eq!(args[1], lock.token());
        assert_eq!(args[2], "job-A");
        assert_eq!(args[3], lock.token());
    }

    #[tokio::test]
    async fn failed_acquire_leaves_handle_untouched() {
        let mut executor = ScriptedExecutor::new([0]);
        let mut lock = lock("job-A");
        let err = lock
            .acquire(&mut executor, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::LockAlreadyAcquired));
        assert!(lock.token().is_empty());
        assert_eq!(lock.ttl(), Duration::ZERO);
    }

    #[tokio::test]
    async fn static_token_is_used_verbatim() {
        let mut executor = ScriptedExecutor::new([1]);
        let mut lock = lock("job-A");
        lock.acquire_with_static_token(&mut executor, "upgrade-gate", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(lock.token(), "upgrade-gate");
    }

    #[tokio::test]
    async fn release_zero_rows_is_already_released() {
        let mut executor = ScriptedExecutor::new([1, 0]);
        let mut lock = lock("job-A");
        lock.acquire(&mut executor, Duration::from_secs(1))
            .await
            .unwrap();
        let err = lock.release(&mut executor).await.unwrap_err();
        assert!(matches!(err, LockError::LockAlreadyReleased));
    }

    #[tokio::test]
    async fn extend_without_acquire_short_circuits() {
        let mut executor = ScriptedExecutor::new([]);
        let lock = lock("job-A");
        let err = lock.extend(&mut executor).await.unwrap_err();
        assert!(matches!(err, LockError::LockAlreadyReleased));
        assert!(executor.calls.is_empty());
    }

    #[tokio::test]
    async fn extend_reuses_acquire_ttl() {
        let mut executor = ScriptedExecutor::new([1, 1]);
        let mut lock = lock("job-A");
        lock.acquire(&mut executor, Duration::from_millis(1500))
            .await
            .unwrap();
        lock.extend(&mut executor).await.unwrap();
        let (_, args) = &executor.calls[1];
        assert_eq!(args[0], "1500000 microseconds");
        assert_eq!(args[1], "job-A");
        assert_eq!(args[2], lock.token());
    }
}
