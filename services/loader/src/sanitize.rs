//! Turns raw CSV records into typed rows, or says why a record is dropped
//!
//! Natural keys (sector name, community code) are kept exactly as written;
//! only numeric and boolean cells are trimmed before parsing.

use crate::outcome::SkipReason;
use crate::records::{CommunityRow, CsvRecord, PopulationRow, SectorRow};

/// Label that heads the sector/community breakdown in the source exports.
pub const SECTOR_BANNER: &str = "Sector & Community";

/// Substrings marking sector rows that are titles or footers, not data.
pub const DEFAULT_BANNER_MARKERS: &[&str] = &[SECTOR_BANNER, "Distribution"];

#[derive(Debug, Clone)]
pub struct Sanitizer {
    banner_markers: Vec<String>,
    community_banner: String,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self {
            banner_markers: DEFAULT_BANNER_MARKERS.iter().map(|s| s.to_string()).collect(),
            community_banner: SECTOR_BANNER.to_string(),
        }
    }
}

impl Sanitizer {
    pub fn with_banner_markers<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            banner_markers: markers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn is_banner(&self, label: &str) -> bool {
        self.banner_markers
            .iter()
            .any(|marker| !marker.is_empty() && label.contains(marker.as_str()))
    }

    pub fn sector(&self, record: &CsvRecord) -> Result<SectorRow, SkipReason> {
        let line = record.line;
        readable(record)?;

        if let Some(label) = record.get("sector_name_en") {
            if self.is_banner(label) {
                return Err(SkipReason::Banner {
                    line,
                    label: label.to_string(),
                });
            }
        }

        let name_en = required(record, "sector_name_en")?;
        let name_ar = required(record, "sector_name_ar")?;
        let total_population = required_number(record, "total_population")?;

        Ok(SectorRow {
            line,
            name_en: name_en.to_string(),
            name_ar: name_ar.to_string(),
            total_population,
            total_area: optional_number(record, "total_area")?,
            total_density: optional_number(record, "total_density")?,
        })
    }

    pub fn community(&self, record: &CsvRecord) -> Result<CommunityRow, SkipReason> {
        let line = record.line;
        readable(record)?;

        let code = required(record, "community_code")?;
        let name_en = required(record, "name_en")?;
        let sector_name_en = required(record, "sector_name_en")?;

        if sector_name_en == self.community_banner {
            return Err(SkipReason::Banner {
                line,
                label: sector_name_en.to_string(),
            });
        }

        Ok(CommunityRow {
            line,
            code: code.to_string(),
            name_en: name_en.to_string(),
            name_ar: record.get("name_ar").map(str::to_string),
            sector_name_en: sector_name_en.to_string(),
            area_km2: optional_number(record, "area_km2")?,
        })
    }

    pub fn population(&self, record: &CsvRecord) -> Result<PopulationRow, SkipReason> {
        let line = record.line;
        readable(record)?;

        let community_code = required(record, "community_code")?;
        let year_raw = required(record, "year")?;
        let year = parse_year(year_raw).ok_or_else(|| SkipReason::Malformed {
            line,
            field: "year",
            value: year_raw.to_string(),
        })?;
        let population = required_number(record, "population")?;
        let density = required_number(record, "density")?;

        Ok(PopulationRow {
            line,
            community_code: community_code.to_string(),
            year,
            population,
            density,
            is_estimated: optional_bool(record, "is_estimated")?,
            is_anomaly: optional_bool(record, "is_anomaly")?,
        })
    }
}

fn readable(record: &CsvRecord) -> Result<(), SkipReason> {
    match record.read_error() {
        Some(error) => Err(SkipReason::Unreadable {
            line: record.line,
            error: error.to_string(),
        }),
        None => Ok(()),
    }
}

fn required<'a>(record: &'a CsvRecord, field: &'static str) -> Result<&'a str, SkipReason> {
    record.get(field).ok_or(SkipReason::MissingField {
        line: record.line,
        field,
    })
}

fn required_number(record: &CsvRecord, field: &'static str) -> Result<f64, SkipReason> {
    let raw = required(record, field)?;
    parse_number(raw).ok_or_else(|| SkipReason::Malformed {
        line: record.line,
        field,
        value: raw.to_string(),
    })
}

fn optional_number(record: &CsvRecord, field: &'static str) -> Result<Option<f64>, SkipReason> {
    match record.get(field) {
        None => Ok(None),
        Some(raw) => parse_number(raw).map(Some).ok_or_else(|| SkipReason::Malformed {
            line: record.line,
            field,
            value: raw.to_string(),
        }),
    }
}

fn optional_bool(record: &CsvRecord, field: &'static str) -> Result<bool, SkipReason> {
    match record.get(field) {
        None => Ok(false),
        Some(raw) => parse_bool(raw).ok_or_else(|| SkipReason::Malformed {
            line: record.line,
            field,
            value: raw.to_string(),
        }),
    }
}

/// Accepts `1234`, `1,234`, `1234.5`; rejects NaN and infinities.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Accepts `2020` and spreadsheet-style `2020.0`.
pub fn parse_year(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    if let Ok(year) = raw.parse::<i32>() {
        return Some(year);
    }
    let value = raw.parse::<f64>().ok()?;
    if value.fract() == 0.0 && value >= i32::MIN as f64 && value <= i32::MAX as f64 {
        Some(value as i32)
    } else {
        None
    }
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" | "1.0" => Some(true),
        "false" | "f" | "0" | "no" | "n" | "0.0" => Some(false),
        _ => None,
    }
}
