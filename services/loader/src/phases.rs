//! Full-refresh load phases
//!
//! Each phase is one unit of work: clear the target table, insert the
//! sanitised rows, commit. Sector and community failures are fatal because
//! the next phase needs their ids; population rows fail one at a time.

use anyhow::{Context, Result};

use crate::outcome::{BatchSummary, LoadOutcome, SkipReason};
use crate::records::CsvRecord;
use crate::resolver::ReferenceResolver;
use crate::sanitize::Sanitizer;
use crate::store::{Store, Table, UnitOfWork};

pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Empty `table` if it exists. A missing table is left for the first
/// insert to report.
async fn replace_table(uow: &mut dyn UnitOfWork, table: Table) -> Result<()> {
    if uow.table_exists(table).await? {
        let deleted = uow.clear(table).await?;
        tracing::info!(table = table.qualified(), deleted, "cleared existing rows");
    } else {
        tracing::warn!(table = table.qualified(), "table not found, nothing to clear");
    }
    Ok(())
}

fn log_skip(reason: &SkipReason) {
    match reason {
        SkipReason::UnresolvedSector {
            line,
            community_code,
            sector_name,
        } => tracing::warn!(
            line,
            community_code = %community_code,
            sector = %sector_name,
            "sector not found for community, skipping"
        ),
        SkipReason::UnresolvedCommunity {
            line,
            community_code,
            year,
        } => tracing::warn!(
            line,
            community_code = %community_code,
            year,
            "community not found for population record, skipping"
        ),
        SkipReason::InsertFailed { line, key, error } => {
            tracing::warn!(line, key = %key, error = %error, "insert failed, skipping")
        }
        other => tracing::debug!(line = other.line(), reason = other.kind(), "dropping row"),
    }
}

pub async fn load_sectors(
    store: &dyn Store,
    records: &[CsvRecord],
    sanitizer: &Sanitizer,
    resolver: &mut ReferenceResolver,
) -> Result<LoadOutcome> {
    tracing::info!(rows = records.len(), "loading sectors");

    let mut uow = store.begin().await?;
    replace_table(uow.as_mut(), Table::Sectors).await?;
    // sector ids from earlier runs died with the cascade
    resolver.clear();

    let mut outcome = LoadOutcome::default();
    for record in records {
        let row = match sanitizer.sector(record) {
            Ok(row) => row,
            Err(reason) => {
                log_skip(&reason);
                outcome.record_skip(reason);
                continue;
            }
        };

        if resolver.lookup_sector_id(&row.name_en).is_some() {
            let reason = SkipReason::DuplicateKey {
                line: row.line,
                key: row.name_en.clone(),
            };
            tracing::warn!(line = row.line, sector = %row.name_en, "duplicate sector name, keeping first");
            outcome.record_skip(reason);
            continue;
        }

        let id = uow.insert_sector(&row).await?;
        tracing::debug!(sector = %row.name_en, id, "loaded sector");
        resolver.record_sector_id(row.name_en, id);
        outcome.record_success();
    }

    uow.commit().await.context("Failed to commit sectors")?;

    tracing::info!(
        loaded = outcome.succeeded,
        skipped = outcome.skipped.len(),
        "sectors loaded"
    );
    Ok(outcome)
}

pub async fn load_communities(
    store: &dyn Store,
    records: &[CsvRecord],
    sanitizer: &Sanitizer,
    resolver: &mut ReferenceResolver,
) -> Result<LoadOutcome> {
    tracing::info!(rows = records.len(), "loading communities");

    let mut uow = store.begin().await?;
    replace_table(uow.as_mut(), Table::Communities).await?;
    resolver.clear_communities();

    let mut outcome = LoadOutcome::default();
    for record in records {
        let row = match sanitizer.community(record) {
            Ok(row) => row,
            Err(reason) => {
                log_skip(&reason);
                outcome.record_skip(reason);
                continue;
            }
        };

        let Some(sector_id) = resolver.lookup_sector_id(&row.sector_name_en) else {
            let reason = SkipReason::UnresolvedSector {
                line: row.line,
                community_code: row.code,
                sector_name: row.sector_name_en,
            };
            log_skip(&reason);
            outcome.record_skip(reason);
            continue;
        };

        if resolver.lookup_community_id(&row.code).is_some() {
            tracing::warn!(line = row.line, community_code = %row.code, "duplicate community code, keeping first");
            outcome.record_skip(SkipReason::DuplicateKey {
                line: row.line,
                key: row.code,
            });
            continue;
        }

        let id = uow.insert_community(&row, sector_id).await?;
        tracing::debug!(community_code = %row.code, id, "loaded community");
        resolver.record_community_id(row.code, id);
        outcome.record_success();
    }

    uow.commit().await.context("Failed to commit communities")?;

    tracing::info!(
        loaded = outcome.succeeded,
        skipped = outcome.skipped.len(),
        "communities loaded"
    );
    Ok(outcome)
}

/// Rows are processed in batches of `batch_size` (cut over the rows as read,
/// before sanitising). A row that fails to insert is logged and counted;
/// it never stops its batch or the ones after it.
pub async fn load_population(
    store: &dyn Store,
    records: &[CsvRecord],
    sanitizer: &Sanitizer,
    resolver: &ReferenceResolver,
    batch_size: usize,
) -> Result<LoadOutcome> {
    let batch_size = batch_size.max(1);
    let total = records.len();
    tracing::info!(rows = total, batch_size, "loading population data");

    let mut uow = store.begin().await?;
    replace_table(uow.as_mut(), Table::Population).await?;

    let mut outcome = LoadOutcome::default();
    for (batch_idx, batch) in records.chunks(batch_size).enumerate() {
        let mut batch_success = 0;

        for record in batch {
            let row = match sanitizer.population(record) {
                Ok(row) => row,
                Err(reason) => {
                    log_skip(&reason);
                    outcome.record_skip(reason);
                    continue;
                }
            };

            let Some(community_id) = resolver.lookup_community_id(&row.community_code) else {
                let reason = SkipReason::UnresolvedCommunity {
                    line: row.line,
                    community_code: row.community_code,
                    year: row.year,
                };
                log_skip(&reason);
                outcome.record_skip(reason);
                continue;
            };

            match uow.insert_population(&row, community_id).await {
                Ok(()) => {
                    outcome.record_success();
                    batch_success += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        line = row.line,
                        community_code = %row.community_code,
                        year = row.year,
                        error = %format!("{:#}", e),
                        "failed to insert population data"
                    );
                    outcome.record_skip(SkipReason::InsertFailed {
                        line: row.line,
                        key: format!("{}/{}", row.community_code, row.year),
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        outcome.batches.push(BatchSummary {
            rows: batch.len(),
            succeeded: batch_success,
        });
        tracing::info!(
            batch = batch_idx + 1,
            processed = (batch_idx * batch_size + batch.len()).min(total),
            total,
            batch_success,
            "processed batch"
        );
    }

    uow.commit().await.context("Failed to commit population data")?;

    let unresolved = outcome.count_of("unresolved_community");
    if unresolved > 0 {
        tracing::warn!(unresolved, "population rows referenced unknown communities");
    }
    tracing::info!(
        loaded = outcome.succeeded,
        attempted = outcome.attempted,
        "population data loaded"
    );
    Ok(outcome)
}
