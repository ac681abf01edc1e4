//! Header-plus-rows parsing for `wmic /format:csv` and PowerShell
//! `ConvertTo-Csv` output.

use std::collections::HashMap;

/// One row, keyed by header name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record(HashMap<String, String>);

impl Record {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn has(&self, field: &str) -> bool {
        self.get(field).is_some_and(|v| !v.is_empty())
    }

    /// Field parsed as a number; blanks and garbage read as `None`.
    pub fn number(&self, field: &str) -> Option<f64> {
        self.get(field)?.trim().parse::<f64>().ok()
    }

    pub fn integer(&self, field: &str) -> Option<u64> {
        self.get(field)?.trim().parse::<u64>().ok()
    }
}

/// First non-empty line names the fields; every further record must have the
/// same arity or it is skipped. Quoted fields may span lines.
pub fn parse_table(text: &str) -> Vec<Record> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.trim_start().as_bytes());

    let headers = match reader.headers() {
        Ok(h) if !h.iter().all(str::is_empty) => h.clone(),
        _ => return Vec::new(),
    };

    reader
        .records()
        .filter_map(Result::ok)
        .filter(|rec| rec.len() == headers.len())
        .map(|rec| {
            Record(
                headers
                    .iter()
                    .map(String::from)
                    .zip(rec.iter().map(String::from))
                    .collect(),
            )
        })
        .collect()
}
