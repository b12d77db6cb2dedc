//! Post-load verification: what the store actually holds

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;

use crate::store::{Store, Table};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VerificationReport {
    pub sectors: i64,
    pub communities: i64,
    pub population_records: i64,
    pub year_distribution: BTreeMap<i32, i64>,
}

impl VerificationReport {
    pub fn years(&self) -> Vec<i32> {
        self.year_distribution.keys().copied().collect()
    }
}

/// Re-query the store. Judging the numbers is left to the caller.
pub async fn verify(store: &dyn Store) -> Result<VerificationReport> {
    tracing::info!("verifying data load");

    let report = VerificationReport {
        sectors: store.count_rows(Table::Sectors).await?,
        communities: store.count_rows(Table::Communities).await?,
        population_records: store.count_rows(Table::Population).await?,
        year_distribution: store.year_distribution().await?,
    };

    tracing::info!(
        sectors = report.sectors,
        communities = report.communities,
        population_records = report.population_records,
        years = ?report.years(),
        "verification results"
    );
    Ok(report)
}
