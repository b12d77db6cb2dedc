//! Write access to the schema store
//!
//! A `UnitOfWork` is one transaction. Dropping it without `commit` rolls
//! back, so a phase that returns early never leaves a transaction open.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{Connection, PgPool, Postgres, Transaction};

use crate::indexes::IndexSpec;
use crate::records::{CommunityRow, PopulationRow, SectorRow};
use crate::resolver::SurrogateId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Sectors,
    Communities,
    Population,
}

impl Table {
    /// Unqualified name, as listed in `information_schema.tables`.
    pub fn name(&self) -> &'static str {
        match self {
            Table::Sectors => "sectors",
            Table::Communities => "communities",
            Table::Population => "population_data",
        }
    }

    pub fn qualified(&self) -> &'static str {
        match self {
            Table::Sectors => db::schema::SECTORS,
            Table::Communities => db::schema::COMMUNITIES,
            Table::Population => db::schema::POPULATION,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;

    /// Idempotent; creating an index that already exists is not an error.
    async fn create_index(&self, index: &IndexSpec) -> Result<()>;

    async fn count_rows(&self, table: Table) -> Result<i64>;

    /// Population rows per year, from one aggregate query.
    async fn year_distribution(&self) -> Result<BTreeMap<i32, i64>>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    async fn table_exists(&mut self, table: Table) -> Result<bool>;

    /// Delete every row of `table`, returning how many went.
    async fn clear(&mut self, table: Table) -> Result<u64>;

    async fn insert_sector(&mut self, row: &SectorRow) -> Result<SurrogateId>;

    async fn insert_community(&mut self, row: &CommunityRow, sector_id: SurrogateId) -> Result<SurrogateId>;

    /// Record-scoped: a rejected row is undone on its own and the unit of
    /// work stays usable for the next one.
    async fn insert_population(&mut self, row: &PopulationRow, community_id: SurrogateId) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

// =============================================================================
// POSTGRES
// =============================================================================

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await.context("Failed to begin transaction")?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn create_index(&self, index: &IndexSpec) -> Result<()> {
        sqlx::query(&index.ddl())
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create index {}", index.name))?;
        Ok(())
    }

    async fn count_rows(&self, table: Table) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table.qualified()))
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to count {}", table.qualified()))?;
        Ok(count)
    }

    async fn year_distribution(&self) -> Result<BTreeMap<i32, i64>> {
        let rows: Vec<(i32, i64)> = sqlx::query_as(&format!(
            "SELECT year, COUNT(*) FROM {} GROUP BY year ORDER BY year",
            Table::Population.qualified()
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to read year distribution")?;
        Ok(rows.into_iter().collect())
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn table_exists(&mut self, table: Table) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            )
            "#,
        )
        .bind(db::schema::BASE_SCHEMA)
        .bind(table.name())
        .fetch_one(&mut *self.tx)
        .await
        .with_context(|| format!("Failed to check for {}", table.qualified()))?;
        Ok(exists)
    }

    async fn clear(&mut self, table: Table) -> Result<u64> {
        let result = sqlx::query(&format!("DELETE FROM {}", table.qualified()))
            .execute(&mut *self.tx)
            .await
            .with_context(|| format!("Failed to clear {}", table.qualified()))?;
        Ok(result.rows_affected())
    }

    async fn insert_sector(&mut self, row: &SectorRow) -> Result<SurrogateId> {
        let (id,): (SurrogateId,) = sqlx::query_as(
            r#"
            INSERT INTO dubai.sectors (name_ar, name_en, total_population, total_area, total_density)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(&row.name_ar)
        .bind(&row.name_en)
        .bind(row.total_population)
        .bind(row.total_area)
        .bind(row.total_density)
        .fetch_one(&mut *self.tx)
        .await
        .with_context(|| format!("Failed to insert sector '{}' (line {})", row.name_en, row.line))?;
        Ok(id)
    }

    async fn insert_community(&mut self, row: &CommunityRow, sector_id: SurrogateId) -> Result<SurrogateId> {
        let (id,): (SurrogateId,) = sqlx::query_as(
            r#"
            INSERT INTO dubai.communities (code, name_ar, name_en, sector_id, area_km2)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(&row.code)
        .bind(&row.name_ar)
        .bind(&row.name_en)
        .bind(sector_id)
        .bind(row.area_km2)
        .fetch_one(&mut *self.tx)
        .await
        .with_context(|| format!("Failed to insert community '{}' (line {})", row.code, row.line))?;
        Ok(id)
    }

    async fn insert_population(&mut self, row: &PopulationRow, community_id: SurrogateId) -> Result<()> {
        // A failed statement aborts the whole Postgres transaction, so each
        // row gets its own savepoint.
        let mut savepoint = Connection::begin(&mut *self.tx)
            .await
            .context("Failed to open savepoint")?;

        sqlx::query(
            r#"
            INSERT INTO dubai.population_data (community_id, year, population, density, is_estimated, is_anomaly)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(community_id)
        .bind(row.year)
        .bind(row.population)
        .bind(row.density)
        .bind(row.is_estimated)
        .bind(row.is_anomaly)
        .execute(&mut *savepoint)
        .await?;

        savepoint.commit().await.context("Failed to release savepoint")?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.context("Failed to commit transaction")?;
        Ok(())
    }
}
