//! Secondary indexes created after the load

use serde::Serialize;

use crate::store::{Store, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: &'static str,
    pub table: Table,
    pub column: &'static str,
}

impl IndexSpec {
    pub fn ddl(&self) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {}({})",
            self.name,
            self.table.qualified(),
            self.column
        )
    }
}

pub const INDEXES: &[IndexSpec] = &[
    IndexSpec {
        name: "idx_population_community",
        table: Table::Population,
        column: "community_id",
    },
    IndexSpec {
        name: "idx_population_year",
        table: Table::Population,
        column: "year",
    },
    IndexSpec {
        name: "idx_communities_sector",
        table: Table::Communities,
        column: "sector_id",
    },
    IndexSpec {
        name: "idx_communities_code",
        table: Table::Communities,
        column: "code",
    },
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexReport {
    pub created: Vec<&'static str>,
    pub failed: Vec<IndexFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexFailure {
    pub index: &'static str,
    pub error: String,
}

/// Ensure every index in `specs` exists. Failures are logged and reported,
/// never returned: indexes only speed up reads.
pub async fn build_indexes(store: &dyn Store, specs: &[IndexSpec]) -> IndexReport {
    tracing::info!(count = specs.len(), "creating indexes");

    let mut report = IndexReport::default();
    for spec in specs {
        match store.create_index(spec).await {
            Ok(()) => {
                tracing::debug!(index = spec.name, "index ready");
                report.created.push(spec.name);
            }
            Err(e) => {
                tracing::warn!(index = spec.name, error = %format!("{:#}", e), "failed to create index");
                report.failed.push(IndexFailure {
                    index: spec.name,
                    error: format!("{:#}", e),
                });
            }
        }
    }

    tracing::info!(
        created = report.created.len(),
        failed = report.failed.len(),
        "indexes done"
    );
    report
}
