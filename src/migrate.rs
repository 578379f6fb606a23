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

//! Applying database migrations.
//!
//! A thin runner that applies each migration at most once per database,
//! recording applied ids in a metadata table (default `migrations`).
//! Idempotency rides on the same insert-if-absent statement shape the lock
//! table uses: a migration runs only when inserting its id actually
//! inserted a row. Callers that want the whole run to be atomic pass an
//! open transaction as the executor; [`Migration::tx_disabled`] marks
//! migrations that must not run inside one.

use crate::dialect::Dialect;
use crate::error::{LockError, LockResult};
use crate::executor::LockExecutor;
use tracing::debug;

/// Name of the table that records applied migrations.
pub const MIGRATIONS_TABLE_NAME: &str = "migrations";

/// Special limit value that does not bound the number of migrations to run.
pub const MIGRATIONS_NO_LIMIT: usize = 0;

/// Direction of a migrations run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationsDirection {
    Up,
    Down,
}

/// One database migration: an id plus ordered up/down statement lists.
#[derive(Debug, Clone)]
pub struct Migration {
    id: String,
    up_sql: Vec<String>,
    down_sql: Vec<String>,
    disable_tx: bool,
}

impl Migration {
    pub fn new(id: impl Into<String>, up_sql: Vec<String>, down_sql: Vec<String>) -> Self {
        Self {
            id: id.into(),
            up_sql,
            down_sql,
            disable_tx: false,
        }
    }

    /// Marks the migration as unsuitable for a surrounding transaction
    /// (e.g. engines that cannot run certain DDL transactionally).
    pub fn with_disabled_tx(mut self) -> Self {
        self.disable_tx = true;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn up_sql(&self) -> &[String] {
        &self.up_sql
    }

    pub fn down_sql(&self) -> &[String] {
        &self.down_sql
    }

    pub fn tx_disabled(&self) -> bool {
        self.disable_tx
    }
}

/// Applies ordered migration lists in either direction.
#[derive(Debug)]
pub struct MigrationsManager {
    create_table: String,
    insert_record: String,
    delete_record: String,
}

impl MigrationsManager {
    /// Creates a runner recording applied migrations in
    /// [`MIGRATIONS_TABLE_NAME`].
    pub fn new(dialect: Dialect) -> LockResult<Self> {
        Self::with_table_name(dialect, MIGRATIONS_TABLE_NAME)
    }

    /// Creates a runner with a custom metadata table name.
    pub fn with_table_name(dialect: Dialect, table_name: &str) -> LockResult<Self> {
        let t = table_name;
        match dialect {
            Dialect::Postgres => Ok(Self {
                create_table: format!(
                    r#"CREATE TABLE IF NOT EXISTS "{t}" (id varchar(255) PRIMARY KEY, applied_at timestamp NOT NULL DEFAULT NOW());"#
                ),
                insert_record: format!(
                    r#"INSERT INTO "{t}" (id) VALUES ($1) ON CONFLICT (id) DO NOTHING;"#
                ),
                delete_record: format!(r#"DELETE FROM "{t}" WHERE id = $1;"#),
            }),
            Dialect::MySql => Ok(Self {
                create_table: format!(
                    "CREATE TABLE IF NOT EXISTS `{t}` (id VARCHAR(255) PRIMARY KEY, applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP);"
                ),
                insert_record: format!("INSERT IGNORE `{t}` (id) VALUES (?);"),
                delete_record: format!("DELETE FROM `{t}` WHERE id = ?;"),
            }),
            Dialect::Sqlite => Ok(Self {
                create_table: format!(
                    r#"CREATE TABLE IF NOT EXISTS "{t}" (id varchar(255) PRIMARY KEY, applied_at timestamp NOT NULL DEFAULT CURRENT_TIMESTAMP);"#
                ),
                insert_record: format!(
                    r#"INSERT INTO "{t}" (id) VALUES (?) ON CONFLICT (id) DO NOTHING;"#
                ),
                delete_record: format!(r#"DELETE FROM "{t}" WHERE id = ?;"#),
            }),
            Dialect::Mssql => Err(LockError::UnsupportedDialect(dialect)),
        }
    }

    /// Runs all pending migrations in the given direction.
    pub async fn run<E>(
        &self,
        executor: &mut E,
        migrations: &[Migration],
        direction: MigrationsDirection,
    ) -> LockResult<()>
    where
        E: LockExecutor + ?Sized,
    {
        self.run_with_limit(executor, migrations, direction, MIGRATIONS_NO_LIMIT)
            .await
    }

    /// Runs at most `limit` pending migrations ([`MIGRATIONS_NO_LIMIT`] for
    /// all of them). Up applies in list order; Down rolls back newest
    /// first.
    pub async fn run_with_limit<E>(
        &self,
        executor: &mut E,
        migrations: &[Migration],
        direction: MigrationsDirection,
        limit: usize,
    ) -> LockResult<()>
    where
        E: LockExecutor + ?Sized,
    {
        executor.execute_lock_query(&self.create_table, &[]).await?;
        let mut applied = 0usize;
        match direction {
            MigrationsDirection::Up => {
                for migration in migrations {
                    if limit != MIGRATIONS_NO_LIMIT && applied >= limit {
                        break;
                    }
                    let inserted = executor
                        .execute_lock_query(&self.insert_record, &[migration.id()])
                        .await?;
                    if inserted != 1 {
                        continue; // already applied
                    }
                    for stmt in migration.up_sql() {
                        if let Err(err) = executor.execute_lock_query(stmt, &[]).await {
                            // Drop the record again so a fixed-up retry
                            // reapplies this migration.
                            let _ = executor
                                .execute_lock_query(&self.delete_record, &[migration.id()])
                                .await;
                            return Err(err.into());
                        }
                    }
                    applied += 1;
                    debug!(migration_id = %migration.id(), "applied migration");
                }
            }
            MigrationsDirection::Down => {
                for migration in migrations.iter().rev() {
                    if limit != MIGRATIONS_NO_LIMIT && applied >= limit {
                        break;
                    }
                    let deleted = executor
                        .execute_lock_query(&self.delete_record, &[migration.id()])
                        .await?;
                    if deleted != 1 {
                        continue; // never applied
                    }
                    for stmt in migration.down_sql() {
                        executor.execute_lock_query(stmt, &[]).await?;
                    }
                    applied += 1;
                    debug!(migration_id = %migration.id(), "rolled back migration");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::ScriptedExecutor;

    fn sample_migrations() -> Vec<Migration> {
        vec![
            Migration::new(
                "m_00001",
                vec!["CREATE TABLE a (x int);".to_owned()],
                vec!["DROP TABLE a;".to_owned()],
            ),
            Migration::new(
                "m_00002",
                vec!["CREATE TABLE b (x int);".to_owned()],
                vec!["DROP TABLE b;".to_owned()],
            ),
        ]
    }

    #[tokio::test]
    async fn up_applies_in_order() {
        let manager = MigrationsManager::new(Dialect::Sqlite).unwrap();
        // create_table, insert m1, stmt, insert m2, stmt
        let mut executor = ScriptedExecutor::new([0, 1, 0, 1, 0]);
        manager
            .run(&mut executor, &sample_migrations(), MigrationsDirection::Up)
            .await
            .unwrap();
        let statements: Vec<&str> = executor.calls.iter().map(|(q, _)| q.as_str()).collect();
        assert!(statements[0].contains("CREATE TABLE IF NOT EXISTS"));
        assert!(statements[2].contains("CREATE TABLE a"));
        assert!(statements[4].contains("CREATE TABLE b"));
        assert_eq!(executor.calls[1].1, vec!["m_00001".to_owned()]);
        assert_eq!(executor.calls[3].1, vec!["m_00002".to_owned()]);
    }

    #[tokio::test]
    async fn up_skips_already_applied() {
        let manager = MigrationsManager::new(Dialect::Sqlite).unwrap();
        // create_table, insert m1 (already recorded), insert m2, stmt
        let mut executor = ScriptedExecutor::new([0, 0, 1, 0]);
        manager
            .run(&mut executor, &sample_migrations(), MigrationsDirection::Up)
            .await
            .unwrap();
        let statements: Vec<&str> = executor.calls.iter().map(|(q, _)| q.as_str()).collect();
        assert!(!statements.iter().any(|q| q.contains("CREATE TABLE a")));
        assert!(statements.iter().any(|q| q.contains("CREATE TABLE b")));
    }

    #[tokio::test]
    async fn down_rolls_back_newest_first() {
        let manager = MigrationsManager::new(Dialect::Sqlite).unwrap();
        // create_table, delete m2, stmt, delete m1, stmt
        let mut executor = ScriptedExecutor::new([0, 1, 0, 1, 0]);
        manager
            .run(&mut executor, &sample_migrations(), MigrationsDirection::Down)
            .await
            .unwrap();
        assert_eq!(executor.calls[1].1, vec!["m_00002".to_owned()]);
        assert!(executor.calls[2].0.contains("DROP TABLE b"));
        assert_eq!(executor.calls[3].1, vec!["m_00001".to_owned()]);
        assert!(executor.calls[4].0.contains("DROP TABLE a"));
    }

    #[tokio::test]
    async fn limit_bounds_applied_count() {
        let manager = MigrationsManager::new(Dialect::Sqlite).unwrap();
        let mut executor = ScriptedExecutor::new([0, 1, 0]);
        manager
            .run_with_limit(&mut executor, &sample_migrations(), MigrationsDirection::Up, 1)
            .await
            .unwrap();
        let statements: Vec<&str> = executor.calls.iter().map(|(q, _)| q.as_str()).collect();
        assert!(statements.iter().any(|q| q.contains("CREATE TABLE a")));
        assert!(!statements.iter().any(|q| q.contains("CREATE TABLE b")));
    }
}
