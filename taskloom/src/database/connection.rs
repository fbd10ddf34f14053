/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Pooled database connection management.
//!
//! Exactly one of the `postgres` / `sqlite` Cargo features must be enabled
//! (enforced below); the selected backend determines the concrete
//! connection type used by [`Database`] and by every DAL module. Pooling is
//! provided by `deadpool-diesel`, which hands out connections asynchronously
//! and runs blocking Diesel calls via `interact` on a blocking thread pool.

#[cfg(all(feature = "postgres", feature = "sqlite"))]
compile_error!("taskloom: enable exactly one of the `postgres` or `sqlite` features, not both");

#[cfg(not(any(feature = "postgres", feature = "sqlite")))]
compile_error!("taskloom: enable exactly one of the `postgres` or `sqlite` features");

#[cfg(feature = "postgres")]
pub type Connection = diesel::pg::PgConnection;
#[cfg(feature = "sqlite")]
pub type Connection = diesel::sqlite::SqliteConnection;

#[cfg(feature = "postgres")]
type Pool = deadpool_diesel::postgres::Pool;
#[cfg(feature = "sqlite")]
type Pool = deadpool_diesel::sqlite::Pool;

#[cfg(feature = "postgres")]
type Manager = deadpool_diesel::postgres::Manager;
#[cfg(feature = "sqlite")]
type Manager = deadpool_diesel::sqlite::Manager;

use crate::error::StoreError;
use tracing::info;

/// A pooled connection to the configured backend.
///
/// Cheap to clone: every clone shares the same underlying pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("pool", &"<pool>").finish()
    }
}

impl Database {
    /// Builds a connection pool for `database_url` with `max_size` pooled
    /// connections.
    ///
    /// `database_url` must match the compiled-in backend: a `postgres://`
    /// URL when the `postgres` feature is enabled, or a plain filesystem
    /// path (optionally prefixed `sqlite://`) when `sqlite` is enabled.
    pub fn new(database_url: &str, max_size: usize) -> Result<Self, StoreError> {
        let path = normalize_url(database_url);
        let manager = Manager::new(path, deadpool_diesel::Runtime::Tokio1);
        let pool = Pool::builder(manager)
            .max_size(max_size)
            .build()
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        info!(max_size, "database pool initialized");
        Ok(Self { pool })
    }

    /// Runs `f` against a pooled connection on a blocking thread, returning
    /// its result or a [`StoreError`] describing why a connection could not
    /// be obtained.
    pub async fn interact<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<R, diesel::result::Error> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        conn.interact(f)
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?
            .map_err(StoreError::from)
    }
}

#[cfg(feature = "sqlite")]
fn normalize_url(database_url: &str) -> String {
    database_url
        .strip_prefix("sqlite://")
        .unwrap_or(database_url)
        .to_string()
}

#[cfg(feature = "postgres")]
fn normalize_url(database_url: &str) -> String {
    database_url.to_string()
}
