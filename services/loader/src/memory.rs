//! In-process `Store` used for dry runs and tests
//!
//! Mirrors the constraints of `db/schema.sql`: unique sector names and
//! community codes, foreign keys with cascading deletes, one population row
//! per community and year, non-negative population and density.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::indexes::IndexSpec;
use crate::records::{CommunityRow, PopulationRow, SectorRow};
use crate::resolver::SurrogateId;
use crate::store::{Store, Table, UnitOfWork};

#[derive(Debug, Clone)]
struct StoredCommunity {
    code: String,
    sector_id: SurrogateId,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    missing: BTreeSet<Table>,
    sectors: BTreeMap<SurrogateId, String>,
    communities: BTreeMap<SurrogateId, StoredCommunity>,
    /// (community_id, year); the set doubles as the unique key
    population: BTreeSet<(SurrogateId, i32)>,
    sequences: BTreeMap<Table, SurrogateId>,
    indexes: BTreeSet<&'static str>,
}

impl Tables {
    fn ensure(&self, table: Table) -> Result<()> {
        if self.missing.contains(&table) {
            bail!("relation \"{}\" does not exist", table.qualified());
        }
        Ok(())
    }

    fn next_id(&mut self, table: Table) -> SurrogateId {
        let id = self.sequences.entry(table).or_insert(0);
        *id += 1;
        *id
    }

    fn clear(&mut self, table: Table) -> u64 {
        let deleted = self.count(table) as u64;
        match table {
            Table::Sectors => self.sectors.clear(),
            Table::Communities => self.communities.clear(),
            Table::Population => self.population.clear(),
        }
        // ON DELETE CASCADE
        let sectors = &self.sectors;
        self.communities.retain(|_, c| sectors.contains_key(&c.sector_id));
        let communities = &self.communities;
        self.population
            .retain(|(community_id, _)| communities.contains_key(community_id));
        deleted
    }

    fn count(&self, table: Table) -> usize {
        match table {
            Table::Sectors => self.sectors.len(),
            Table::Communities => self.communities.len(),
            Table::Population => self.population.len(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose schema lacks `table`, as before migrations have run.
    pub fn without_table(table: Table) -> Self {
        let mut tables = Tables::default();
        tables.missing.insert(table);
        Self {
            state: Arc::new(Mutex::new(tables)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        lock(&self.state)
    }
}

fn lock(state: &Mutex<Tables>) -> Result<MutexGuard<'_, Tables>> {
    state.lock().map_err(|_| anyhow!("memory store lock poisoned"))
}

/// Works on a private copy; `commit` publishes it, drop discards it.
struct MemoryUnitOfWork {
    shared: Arc<Mutex<Tables>>,
    working: Tables,
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let working = self.lock()?.clone();
        Ok(Box::new(MemoryUnitOfWork {
            shared: Arc::clone(&self.state),
            working,
        }))
    }

    async fn create_index(&self, index: &IndexSpec) -> Result<()> {
        let mut tables = self.lock()?;
        tables.ensure(index.table)?;
        tables.indexes.insert(index.name);
        Ok(())
    }

    async fn count_rows(&self, table: Table) -> Result<i64> {
        let tables = self.lock()?;
        tables.ensure(table)?;
        Ok(tables.count(table) as i64)
    }

    async fn year_distribution(&self) -> Result<BTreeMap<i32, i64>> {
        let tables = self.lock()?;
        tables.ensure(Table::Population)?;
        let mut years = BTreeMap::new();
        for (_, year) in &tables.population {
            *years.entry(*year).or_insert(0) += 1;
        }
        Ok(years)
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn table_exists(&mut self, table: Table) -> Result<bool> {
        Ok(!self.working.missing.contains(&table))
    }

    async fn clear(&mut self, table: Table) -> Result<u64> {
        self.working.ensure(table)?;
        Ok(self.working.clear(table))
    }

    async fn insert_sector(&mut self, row: &SectorRow) -> Result<SurrogateId> {
        let tables = &mut self.working;
        tables.ensure(Table::Sectors)?;
        if tables.sectors.values().any(|name| *name == row.name_en) {
            bail!("duplicate key value violates unique constraint \"sectors_name_en_key\"");
        }
        let id = tables.next_id(Table::Sectors);
        tables.sectors.insert(id, row.name_en.clone());
        Ok(id)
    }

    async fn insert_community(&mut self, row: &CommunityRow, sector_id: SurrogateId) -> Result<SurrogateId> {
        let tables = &mut self.working;
        tables.ensure(Table::Communities)?;
        if !tables.sectors.contains_key(&sector_id) {
            bail!("insert violates foreign key constraint \"communities_sector_id_fkey\"");
        }
        if tables.communities.values().any(|c| c.code == row.code) {
            bail!("duplicate key value violates unique constraint \"communities_code_key\"");
        }
        let id = tables.next_id(Table::Communities);
        tables.communities.insert(
            id,
            StoredCommunity {
                code: row.code.clone(),
                sector_id,
            },
        );
        Ok(id)
    }

    async fn insert_population(&mut self, row: &PopulationRow, community_id: SurrogateId) -> Result<()> {
        let tables = &mut self.working;
        tables.ensure(Table::Population)?;
        if !tables.communities.contains_key(&community_id) {
            bail!("insert violates foreign key constraint \"population_data_community_id_fkey\"");
        }
        if row.population < 0.0 {
            bail!("new row violates check constraint \"population_data_population_check\"");
        }
        if row.density < 0.0 {
            bail!("new row violates check constraint \"population_data_density_check\"");
        }
        if !tables.population.insert((community_id, row.year)) {
            bail!("duplicate key value violates unique constraint \"population_data_community_id_year_key\"");
        }
        tables.next_id(Table::Population);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryUnitOfWork { shared, working } = *self;
        *lock(&shared)? = working;
        Ok(())
    }
}

#[cfg(test)]
impl MemoryStore {
    pub fn index_names(&self) -> Vec<&'static str> {
        self.lock().unwrap().indexes.iter().copied().collect()
    }

    pub fn sector_names(&self) -> Vec<String> {
        self.lock().unwrap().sectors.values().cloned().collect()
    }

    pub fn community_codes(&self) -> Vec<String> {
        self.lock().unwrap().communities.values().map(|c| c.code.clone()).collect()
    }

    /// Sector id owning each stored community, by code.
    pub fn community_sectors(&self) -> BTreeMap<String, SurrogateId> {
        self.lock()
            .unwrap()
            .communities
            .values()
            .map(|c| (c.code.clone(), c.sector_id))
            .collect()
    }
}
