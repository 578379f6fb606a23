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

//! Error types for distributed lock operations.

use crate::dialect::Dialect;
use thiserror::Error;

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Errors that can occur during lock operations.
///
/// The first two variants are the domain outcomes of the lock state machine
/// and are returned verbatim, never wrapped. The `Tx*` variants wrap the
/// mechanics of transaction handling and keep their cause as `source()`, so
/// the retry classifier in [`crate::retry`] can see through them.
#[derive(Error, Debug)]
pub enum LockError {
    /// Acquire affected zero rows: another holder owns the key (or this
    /// handle holds it under a different token).
    #[error("distributed lock already acquired")]
    LockAlreadyAcquired,

    /// Release or extend affected zero rows: the lease already expired or
    /// was released.
    #[error("distributed lock already released")]
    LockAlreadyReleased,

    /// Lock key is empty or exceeds the maximum length.
    #[error("{0}")]
    InvalidKey(String),

    /// The dialect has no lock query support.
    #[error("unsupported sql dialect {0:?}")]
    UnsupportedDialect(Dialect),

    /// Beginning a transaction failed.
    #[error("begin tx: {source}")]
    TxBegin {
        #[source]
        source: sqlx::Error,
    },

    /// Committing a transaction failed.
    #[error("commit tx: {source}")]
    TxCommit {
        #[source]
        source: sqlx::Error,
    },

    /// Rolling back a transaction failed. Not produced by the crate's own
    /// helpers (they log and swallow rollback failures); available to
    /// callers that manage transactions by hand.
    #[error("rollback tx: {source}")]
    TxRollback {
        #[source]
        source: sqlx::Error,
    },

    /// Configuration error (bad dialect name, unparsable parameter).
    #[error("configuration error: {0}")]
    Config(String),

    /// Raw driver/engine error, passed through unchanged so callers can
    /// classify it for retrying.
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}
