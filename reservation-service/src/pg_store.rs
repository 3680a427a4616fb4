//! PostgreSQL-backed counter store.
//!
//! Unlike the key-value backends this one can decrement conditionally in a
//! single statement, so it also implements [`AtomicDecrement`].

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_async::pooled_connection::{bb8::Pool, AsyncDieselConnectionManager};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use shared::ResourceKey;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::models::{Counter, NewCounter};
use crate::schema::counters;
use crate::store::{AtomicDecrement, CounterStore, Decrement};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

type DbPool = Pool<AsyncPgConnection>;
type DbConnection<'a> = bb8::PooledConnection<'a, AsyncDieselConnectionManager<AsyncPgConnection>>;

pub fn run_migrations(database_url: &str) -> anyhow::Result<()> {
    info!("Running database migrations...");
    let mut conn = PgConnection::establish(database_url)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    info!("Migrations completed successfully");
    Ok(())
}

fn db_error(err: diesel::result::Error) -> StoreError {
    StoreError::Unavailable(format!("Database error: {}", err))
}

fn to_count(key: &ResourceKey, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::InvalidValue {
        key: key.clone(),
        value: value.to_string(),
    })
}

fn to_column(key: &ResourceKey, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::InvalidValue {
        key: key.clone(),
        value: value.to_string(),
    })
}

#[derive(Clone)]
pub struct PgCounterStore {
    pool: DbPool,
}

impl PgCounterStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder()
            .build(config)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to build connection pool: {}", e)))?;
        Ok(Self::new(pool))
    }

    async fn conn(&self) -> Result<DbConnection<'_>, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to get connection: {}", e)))
    }
}

#[async_trait]
impl CounterStore for PgCounterStore {
    async fn get_count(&self, key: &ResourceKey) -> Result<Option<u64>, StoreError> {
        let mut conn = self.conn().await?;

        let counter = counters::table
            .filter(counters::key.eq(key.as_str()))
            .first::<Counter>(&mut conn)
            .await
            .optional()
            .map_err(db_error)?;

        counter.map(|counter| to_count(key, counter.value)).transpose()
    }

    async fn set_count(&self, key: &ResourceKey, count: u64) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let value = to_column(key, count)?;
        let now = Some(Utc::now());

        let new_counter = NewCounter {
            key: key.to_string(),
            value,
            updated_at: now,
        };

        diesel::insert_into(counters::table)
            .values(&new_counter)
            .on_conflict(counters::key)
            .do_update()
            .set((counters::value.eq(value), counters::updated_at.eq(now)))
            .execute(&mut conn)
            .await
            .map_err(db_error)?;

        Ok(())
    }

    fn atomic_decrement(&self) -> Option<&dyn AtomicDecrement> {
        Some(self)
    }
}

#[async_trait]
impl AtomicDecrement for PgCounterStore {
    async fn decrement_if_available(
        &self,
        key: &ResourceKey,
        quantity: u64,
        initial: Option<u64>,
    ) -> Result<Decrement, StoreError> {
        let mut conn = self.conn().await?;
        let requested = quantity;
        let quantity = to_column(key, quantity)?;

        loop {
            let now = Some(Utc::now());

            // The WHERE clause is the availability check; the row lock taken by
            // UPDATE makes check and write a single step.
            let remaining = diesel::update(
                counters::table
                    .filter(counters::key.eq(key.as_str()))
                    .filter(counters::value.ge(quantity)),
            )
            .set((
                counters::value.eq(counters::value - quantity),
                counters::updated_at.eq(now),
            ))
            .returning(counters::value)
            .get_result::<i64>(&mut conn)
            .await
            .optional()
            .map_err(db_error)?;

            if let Some(remaining) = remaining {
                let remaining = to_count(key, remaining)?;
                debug!(key = %key, remaining, "Atomic decrement applied");
                return Ok(Decrement::Applied {
                    previous: remaining + requested,
                    remaining,
                });
            }

            let current = counters::table
                .filter(counters::key.eq(key.as_str()))
                .first::<Counter>(&mut conn)
                .await
                .optional()
                .map_err(db_error)?;

            if let Some(counter) = current {
                return Ok(Decrement::Insufficient {
                    available: to_count(key, counter.value)?,
                });
            }

            let initial = match initial {
                Some(initial) => initial,
                None => return Ok(Decrement::Missing),
            };
            if initial == 0 || initial < requested {
                return Ok(Decrement::Insufficient { available: initial });
            }

            // A missing row is created already decremented, so a rejected
            // request never seeds it.
            let remaining = initial - requested;
            let seeded = NewCounter {
                key: key.to_string(),
                value: to_column(key, remaining)?,
                updated_at: now,
            };
            let inserted = diesel::insert_into(counters::table)
                .values(&seeded)
                .on_conflict_do_nothing()
                .execute(&mut conn)
                .await
                .map_err(db_error)?;

            if inserted == 1 {
                debug!(key = %key, remaining, "Seeded counter with first decrement");
                return Ok(Decrement::Applied {
                    previous: initial,
                    remaining,
                });
            }
            // Another writer created the row first; retry against it.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_beyond_the_column_range_are_rejected() {
        let key = ResourceKey::seats();
        assert_eq!(to_column(&key, 42), Ok(42));
        assert_eq!(to_column(&key, i64::MAX as u64), Ok(i64::MAX));
        assert!(matches!(
            to_column(&key, i64::MAX as u64 + 1),
            Err(StoreError::InvalidValue { .. })
        ));
    }
}
