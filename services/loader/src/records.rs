//! CSV input: file names, decoding, and header-keyed records
//!
//! Files are decoded as UTF-8 with the byte-order mark removed. Columns are
//! looked up by header name so column order in the exports does not matter.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use tokio::fs;

use crate::error::PipelineError;

pub const SECTORS_FILE: &str = "sectors.csv";
pub const COMMUNITIES_FILE: &str = "communities.csv";
pub const POPULATION_FILE: &str = "population.csv";

pub const REQUIRED_FILES: [&str; 3] = [SECTORS_FILE, COMMUNITIES_FILE, POPULATION_FILE];

/// One data row of a CSV file, keyed by header.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRecord {
    /// 1-based line in the source file (header is line 1)
    pub line: usize,
    fields: HashMap<String, String>,
    read_error: Option<String>,
}

impl CsvRecord {
    pub fn new(line: usize, fields: HashMap<String, String>) -> Self {
        Self {
            line,
            fields,
            read_error: None,
        }
    }

    /// A row the CSV reader could not split into fields. It stays in the
    /// record list so it is counted and batched like any other row.
    pub fn unreadable(line: usize, error: impl Into<String>) -> Self {
        Self {
            line,
            fields: HashMap::new(),
            read_error: Some(error.into()),
        }
    }

    pub fn read_error(&self) -> Option<&str> {
        self.read_error.as_deref()
    }

    /// Field value exactly as written, or `None` when the column is absent
    /// or the cell is blank.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .get(column)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// Sector export row, fields exactly as written.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorRow {
    pub line: usize,
    pub name_en: String,
    pub name_ar: String,
    pub total_population: f64,
    pub total_area: Option<f64>,
    pub total_density: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommunityRow {
    pub line: usize,
    pub code: String,
    pub name_en: String,
    pub name_ar: Option<String>,
    pub sector_name_en: String,
    pub area_km2: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PopulationRow {
    pub line: usize,
    pub community_code: String,
    pub year: i32,
    pub population: f64,
    pub density: f64,
    pub is_estimated: bool,
    pub is_anomaly: bool,
}

/// Fails once, naming every required file missing from `data_dir`.
pub async fn check_input_files(data_dir: &Path) -> Result<(), PipelineError> {
    let mut missing = Vec::new();
    for name in REQUIRED_FILES {
        let path = data_dir.join(name);
        if fs::try_exists(&path).await.unwrap_or(false) {
            tracing::info!(file = name, "found input file");
        } else {
            tracing::error!(file = name, path = %path.display(), "missing input file");
            missing.push(name.to_string());
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::MissingFiles { files: missing })
    }
}

/// Decode raw file bytes as UTF-8, dropping a leading BOM. Invalid byte
/// sequences become U+FFFD rather than failing the load.
pub fn decode(bytes: &[u8]) -> String {
    let (text, had_errors) = encoding_rs::UTF_8.decode_with_bom_removal(bytes);
    if had_errors {
        tracing::warn!("input contains invalid UTF-8, replaced with U+FFFD");
    }
    text.into_owned()
}

/// Parse CSV text with a header row into ordered records, one per data row.
pub fn parse_records(content: &str) -> Result<Vec<CsvRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut records = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                let line = e
                    .position()
                    .map(|p| p.line() as usize)
                    .unwrap_or(idx + 2);
                tracing::warn!(line, error = %e, "unreadable CSV row");
                records.push(CsvRecord::unreadable(line, e.to_string()));
                continue;
            }
        };

        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(idx + 2);

        let fields = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();

        records.push(CsvRecord::new(line, fields));
    }

    Ok(records)
}

pub async fn read_records(path: &Path) -> Result<Vec<CsvRecord>> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let records = parse_records(&decode(&bytes))
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    tracing::debug!(file = %path.display(), rows = records.len(), "read CSV");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_records_by_header() {
        let csv = "community_code,year,population\n111,2020,1500\n112,2021,900\n";
        let records = parse_records(csv).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("community_code"), Some("111"));
        assert_eq!(records[1].get("population"), Some("900"));
    }

    #[test]
    fn test_line_numbers_start_after_header() {
        let csv = "a,b\n1,2\n3,4\n5,6\n";
        let records = parse_records(csv).unwrap();
        let lines: Vec<usize> = records.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![2, 3, 4]);
    }

    #[test]
    fn test_blank_cells_are_absent() {
        let csv = "sector_name_en,sector_name_ar,total_population\nSector & Community,,\n";
        let records = parse_records(csv).unwrap();
        assert_eq!(records[0].get("sector_name_en"), Some("Sector & Community"));
        assert_eq!(records[0].get("sector_name_ar"), None);
        assert_eq!(records[0].get("total_population"), None);
        assert_eq!(records[0].get("no_such_column"), None);
    }

    #[test]
    fn test_values_are_not_trimmed() {
        let csv = "name_en\n\" Al Barsha \"\n";
        let records = parse_records(csv).unwrap();
        assert_eq!(records[0].get("name_en"), Some(" Al Barsha "));
    }

    #[test]
    fn test_headers_are_trimmed() {
        let csv = " code , year \nA,2020\n";
        let records = parse_records(csv).unwrap();
        assert_eq!(records[0].get("code"), Some("A"));
        assert_eq!(records[0].get("year"), Some("2020"));
    }

    #[test]
    fn test_short_rows_tolerated() {
        let csv = "a,b,c\n1,2\n";
        let records = parse_records(csv).unwrap();
        assert_eq!(records[0].get("a"), Some("1"));
        assert_eq!(records[0].get("c"), None);
    }

    #[test]
    fn test_unreadable_record_has_no_fields() {
        let record = CsvRecord::unreadable(7, "found record with 2 fields");
        assert_eq!(record.line, 7);
        assert_eq!(record.read_error(), Some("found record with 2 fields"));
        assert_eq!(record.get("community_code"), None);

        let parsed = parse_records("a\n1\n").unwrap();
        assert_eq!(parsed[0].read_error(), None);
    }

    #[test]
    fn test_decode_strips_bom() {
        let bytes = "\u{feff}sector_name_en\nSector A\n".as_bytes();
        let text = decode(bytes);
        assert!(text.starts_with("sector_name_en"));
        let records = parse_records(&text).unwrap();
        assert_eq!(records[0].get("sector_name_en"), Some("Sector A"));
    }

    #[test]
    fn test_decode_arabic_text() {
        let text = decode("sector_name_ar\nقطاع أ\n".as_bytes());
        let records = parse_records(&text).unwrap();
        assert_eq!(records[0].get("sector_name_ar"), Some("قطاع أ"));
    }

    #[test]
    fn test_decode_replaces_invalid_bytes() {
        let text = decode(b"name\nab\xffcd\n");
        assert!(text.contains('\u{fffd}'));
    }

    #[test]
    fn test_empty_file_yields_no_records() {
        assert!(parse_records("").unwrap().is_empty());
        assert!(parse_records("a,b\n").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_check_input_files_names_every_missing_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(COMMUNITIES_FILE), "code\n").unwrap();

        let err = check_input_files(dir.path()).await.unwrap_err();
        match &err {
            PipelineError::MissingFiles { files } => {
                assert_eq!(files, &vec![SECTORS_FILE.to_string(), POPULATION_FILE.to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        let message = err.to_string();
        assert!(message.contains("sectors.csv"));
        assert!(message.contains("population.csv"));
    }

    #[tokio::test]
    async fn test_check_input_files_all_present() {
        let dir = TempDir::new().unwrap();
        for name in REQUIRED_FILES {
            std::fs::write(dir.path().join(name), "x\n").unwrap();
        }
        assert!(check_input_files(dir.path()).await.is_ok());
    }

    #[tokio::test]
    async fn test_read_records_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SECTORS_FILE);
        std::fs::write(&path, "\u{feff}sector_name_en,total_population\nSector A,1000\n").unwrap();
        let records = read_records(&path).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("sector_name_en"), Some("Sector A"));
    }
}
