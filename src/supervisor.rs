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

//! Lease supervisor: run a job under a lock that is kept alive for it.
//!
//! ## Purpose
//! [`DbLock::do_exclusively`] acquires the lock, spawns a background task
//! that periodically extends the lease while the job runs, and cancels the
//! job cooperatively if the lease is lost. When the job finishes the lock
//! is released, even when the caller has already been cancelled.
//!
//! ## Ordering
//! - Extension never runs after release begins: the extension task is
//!   signalled and awaited before release starts.
//! - The job's token observes cancellation only when the caller's token was
//!   cancelled or the lease was seen lost.
//!
//! ## Failure modes
//! If `extend_interval >= lock_ttl` the lease can expire between
//! extensions; another process may take the key and this job gets
//! cancelled. That is the designed recovery path for stuck workers. If the
//! final release fails, the row keeps its advanced expiry and frees itself
//! when the lease runs out.

use crate::error::{LockError, LockResult};
use crate::executor::LockExecutor;
use crate::lock::DbLock;
use crate::tx::do_in_tx;
use sqlx::{Database, Executor, IntoArguments, Pool, Transaction};
use std::future::Future;
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Timing knobs for [`DbLock::do_exclusively`].
#[derive(Debug, Clone, Copy)]
pub struct DoExclusivelyOptions {
    /// TTL of the initial acquire; also the TTL every extension renews.
    pub lock_ttl: Duration,
    /// How often the background task extends the lease. Must be below
    /// `lock_ttl` for the lease to survive a healthy job.
    pub extend_interval: Duration,
    /// Deadline for the final release, counted on a fresh clock so release
    /// still runs when the caller's token is already cancelled.
    pub release_timeout: Duration,
}

impl DbLock {
    /// Acquires the lock, runs `job` while a background task keeps the
    /// lease extended, then releases the lock.
    ///
    /// If the acquire fails the error is returned immediately; the common
    /// case is [`LockError::LockAlreadyAcquired`] when another process
    /// holds the key. Otherwise `job` receives a child token derived from
    /// `cancel`, which is cancelled if the lease is observed lost, and its
    /// return value becomes the `Ok` result of the call. Extension and
    /// release failures are logged with the lock's key and token, never
    /// returned.
    pub async fn do_exclusively<DB, F, Fut, T>(
        &mut self,
        pool: &Pool<DB>,
        cancel: &CancellationToken,
        opts: DoExclusivelyOptions,
        job: F,
    ) -> LockResult<T>
    where
        DB: Database,
        for<'q> <DB as Database>::Arguments<'q>: IntoArguments<'q, DB>,
        for<'c> &'c mut <DB as Database>::Connection: Executor<'c, Database = DB>,
        Transaction<'static, DB>: LockExecutor,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T>,
    {
        let lock_ttl = opts.lock_ttl;
        {
            let this = &mut *self;
            do_in_tx(pool, move |tx| {
                Box::pin(async move { this.acquire(tx, lock_ttl).await })
            })
            .await?;
        }

        let child = cancel.child_token();
        let extender_exit = CancellationToken::new();
        let extender = tokio::spawn(extend_periodically(
            pool.clone(),
            self.clone(),
            opts.extend_interval,
            extender_exit.clone(),
            child.clone(),
        ));
        // Cancels `extender_exit` even if the job panics and unwinds out of
        // this call; the extension loop stops and the lease frees at expiry.
        let extender_guard = extender_exit.drop_guard();

        let result = job(child).await;

        // Stop the extension loop and wait it out, so that no extension can
        // run once release begins.
        drop(extender_guard);
        if let Err(join_err) = extender.await {
            debug!(lock_key = %self.key, error = %join_err, "lock extension task ended abnormally");
        }

        // The caller's token may already be cancelled at this point; the
        // release gets its own deadline so the lock is still freed.
        let this = &*self;
        let release = do_in_tx(pool, move |tx| {
            Box::pin(async move { this.release(tx).await })
        });
        match time::timeout(opts.release_timeout, release).await {
            Ok(Ok(())) => {}
            Ok(Err(release_err)) => {
                error!(
                    lock_key = %self.key,
                    lock_token = %self.token,
                    error = %release_err,
                    "failed to release db lock"
                );
            }
            Err(_) => {
                error!(
                    lock_key = %self.key,
                    lock_token = %self.token,
                    timeout = ?opts.release_timeout,
                    "failed to release db lock: timed out"
                );
            }
        }

        {
            let this = &*self;
            let _probe = do_in_tx(pool, move |tx| {
                Box::pin(async move { this.extend(tx).await })
            })
            .await;
        }

        Ok(result)
    }
}

/// Runs a single lease extension inside its own transaction.
async fn extend_once<DB>(pool: &Pool<DB>, lock: &DbLock) -> LockResult<()>
where
    DB: Database,
    for<'q> <DB as Database>::Arguments<'q>: IntoArguments<'q, DB>,
    for<'c> &'c mut <DB as Database>::Connection: Executor<'c, Database = DB>,
    Transaction<'static, DB>: LockExecutor,
{
    let this = lock;
    do_in_tx(pool, move |tx| Box::pin(async move { this.extend(tx).await })).await
}

/// Extends the lease every `extend_interval` until signalled to exit.
///
/// Extension errors are logged and tolerated, except the lease being gone,
/// which cancels the job's token so the exclusive work stops as soon as
/// possible.
async fn extend_periodically<DB>(
    pool: Pool<DB>,
    lock: DbLock,
    extend_interval: Duration,
    exit: CancellationToken,
    child: CancellationToken,
) where
    DB: Database,
    for<'q> <DB as Database>::Arguments<'q>: IntoArguments<'q, DB>,
    for<'c> &'c mut <DB as Database>::Connection: Executor<'c, Database = DB>,
    Transaction<'static, DB>: LockExecutor,
{
    let mut ticker = time::interval_at(Instant::now() + extend_interval, extend_interval);
    loop {
        tokio::select! {
            _ = exit.cancelled() => return,
            _ = ticker.tick() => {
                let extended = extend_once(&pool, &lock).await;
                if let Err(extend_err) = extended {
                    error!(
                        lock_key = %lock.key,
                        lock_token = %lock.token,
                        error = %extend_err,
                        "failed to extend db lock"
                    );
                    if matches!(extend_err, LockError::LockAlreadyReleased) {
                        // Lease is gone; stop the exclusive job asap.
                        child.cancel();
                        return;
                    }
                }
            }
        }
    }
}
