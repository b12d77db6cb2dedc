//! Integration tests against a real Postgres
//!
//! Run with `DATABASE_URL` pointing at a disposable database:
//! `cargo test -p loader -- --ignored`. The tests apply `db/schema.sql` and
//! replace whatever the `dubai` tables hold.

#[cfg(test)]
mod tests {
    use sqlx::postgres::PgPoolOptions;
    use sqlx::PgPool;
    use tempfile::TempDir;

    use crate::error::Stage;
    use crate::pipeline::{Pipeline, PipelineConfig};
    use crate::records::{
        CommunityRow, PopulationRow, SectorRow, COMMUNITIES_FILE, POPULATION_FILE, SECTORS_FILE,
    };
    use crate::store::{PgStore, Store, Table};

    const SCHEMA: &str = include_str!("../../../db/schema.sql");

    /// Connected pool with the schema applied, or `None` when no database
    /// is configured.
    async fn test_pool() -> Option<PgPool> {
        let url = match std::env::var("DATABASE_URL") {
            Ok(v) => v,
            Err(_) => {
                eprintln!("skipping postgres integration test: DATABASE_URL not set");
                return None;
            }
        };
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .unwrap();
        sqlx::raw_sql(SCHEMA).execute(&pool).await.unwrap();
        Some(pool)
    }

    fn population(year: i32, people: f64) -> PopulationRow {
        PopulationRow {
            line: 2,
            community_code: "311".to_string(),
            year,
            population: people,
            density: 10.0,
            is_estimated: false,
            is_anomaly: false,
        }
    }

    async fn rejected_rows_leave_transaction_usable(store: &PgStore) {
        let mut uow = store.begin().await.unwrap();
        uow.clear(Table::Sectors).await.unwrap();

        let sector_id = uow
            .insert_sector(&SectorRow {
                line: 2,
                name_en: "Sector A".to_string(),
                name_ar: "قطاع أ".to_string(),
                total_population: 1000.0,
                total_area: Some(5.0),
                total_density: Some(200.0),
            })
            .await
            .unwrap();
        let community_id = uow
            .insert_community(
                &CommunityRow {
                    line: 2,
                    code: "311".to_string(),
                    name_en: "Al Barsha".to_string(),
                    name_ar: None,
                    sector_name_en: "Sector A".to_string(),
                    area_km2: Some(12.5),
                },
                sector_id,
            )
            .await
            .unwrap();

        uow.insert_population(&population(2019, 100.0), community_id).await.unwrap();

        let err = uow
            .insert_population(&population(2020, -1.0), community_id)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("population_data_population_check"));

        // the statement after a rejected one must still run
        uow.insert_population(&population(2020, 120.0), community_id).await.unwrap();
        assert!(uow
            .insert_population(&population(2020, 130.0), community_id)
            .await
            .is_err());
        uow.insert_population(&population(2021, 140.0), community_id).await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(store.count_rows(Table::Population).await.unwrap(), 3);
        let years = store.year_distribution().await.unwrap();
        assert_eq!(years.keys().copied().collect::<Vec<_>>(), vec![2019, 2020, 2021]);
    }

    async fn pipeline_loads_into_postgres(store: &PgStore) {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(SECTORS_FILE),
            "sector_name_en,sector_name_ar,total_population,total_area,total_density\n\
             Sector A,قطاع أ,1000,5.0,200\n\
             Sector & Community,,,,\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join(COMMUNITIES_FILE),
            "community_code,name_en,name_ar,sector_name_en,area_km2\n\
             311,Al Barsha,البرشاء,Sector A,12.5\n\
             312,Jumeirah,جميرا,Unknown Sector,3.1\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join(POPULATION_FILE),
            "community_code,year,population,density,is_estimated,is_anomaly\n\
             311,2019,1400,112,false,false\n\
             311,2020,-3,120,false,false\n\
             311,2021,2600,208,true,true\n\
             312,2021,800,258,false,false\n",
        )
        .unwrap();

        // run twice: the second full refresh must land on the same state
        for _ in 0..2 {
            let mut pipeline = Pipeline::new(store, PipelineConfig::new(dir.path()));
            let summary = pipeline.run().await.unwrap();

            assert_eq!(summary.stage, Stage::Done);
            let population = summary.population.as_ref().unwrap();
            assert_eq!(population.attempted, 4);
            assert_eq!(population.succeeded, 2);
            assert_eq!(population.count_of("insert_failed"), 1);
            assert_eq!(population.count_of("unresolved_community"), 1);

            let report = summary.verification.as_ref().unwrap();
            assert_eq!(report.sectors, 1);
            assert_eq!(report.communities, 1);
            assert_eq!(report.population_records, 2);
            assert!(summary.indexes.as_ref().unwrap().failed.is_empty());
        }
    }

    // Both scenarios replace the same tables, so they run in one test.
    #[tokio::test]
    #[ignore = "requires DATABASE_URL and a disposable Postgres"]
    async fn test_postgres_store() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let store = PgStore::new(pool);

        rejected_rows_leave_transaction_usable(&store).await;
        pipeline_loads_into_postgres(&store).await;
    }
}
