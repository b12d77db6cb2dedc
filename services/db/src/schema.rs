//! Schema and relation names shared by the loader and the API
//!
//! Base tables live in `dubai` and are written only by the loader.
//! Views in `analytics` are maintained outside this workspace (see
//! `db/schema.sql`) and are read by the API.

pub const BASE_SCHEMA: &str = "dubai";

pub const SECTORS: &str = "dubai.sectors";
pub const COMMUNITIES: &str = "dubai.communities";
pub const POPULATION: &str = "dubai.population_data";

pub const EMIRATE_POPULATION_VIEW: &str = "analytics.emirate_population";
pub const SECTOR_POPULATION_VIEW: &str = "analytics.sector_population";
pub const COMMUNITY_POPULATION_VIEW: &str = "analytics.community_population";
pub const ANOMALY_REPORT_VIEW: &str = "analytics.anomaly_report";
