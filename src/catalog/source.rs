//! Spreadsheet catalog source.
//!
//! Each catalog table lives on its own sheet. The first row is the header;
//! header names are matched case-insensitively.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogTable {
    Products,
    SeasonalRules,
    DeliveryTiers,
    Extras,
    Branches,
}

impl CatalogTable {
    /// Default sheet name
    pub fn sheet_name(self) -> &'static str {
        match self {
            CatalogTable::Products => "Products",
            CatalogTable::SeasonalRules => "Seasons",
            CatalogTable::DeliveryTiers => "Delivery",
            CatalogTable::Extras => "Extras",
            CatalogTable::Branches => "Branches",
        }
    }
}

impl fmt::Display for CatalogTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sheet_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP error reading {table}: {message}")]
    Http { table: CatalogTable, message: String },

    #[error("{table} sheet returned status {status}")]
    Status { table: CatalogTable, status: u16 },

    #[error("{table} sheet is malformed: {message}")]
    Malformed { table: CatalogTable, message: String },
}

/// Raw sheet contents: header row plus data rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetTable {
    /// Split a values grid into header and rows. An empty grid has no header.
    pub fn from_values(values: Vec<Vec<String>>) -> Self {
        let mut rows = values.into_iter();
        let headers = rows
            .next()
            .map(|h| h.into_iter().map(|c| c.trim().to_lowercase()).collect())
            .unwrap_or_default();
        Self {
            headers,
            rows: rows.collect(),
        }
    }

    /// Rows keyed by lowercase header. Short rows yield empty cells.
    pub fn records(&self) -> Vec<HashMap<&str, &str>> {
        self.rows
            .iter()
            .map(|row| {
                self.headers
                    .iter()
                    .enumerate()
                    .map(|(i, h)| (h.as_str(), row.get(i).map_or("", |c| c.trim())))
                    .collect()
            })
            .collect()
    }
}

/// Read API over the pricing spreadsheet
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_table(&self, table: CatalogTable) -> Result<SheetTable, SourceError>;
}

#[derive(Debug, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Google Sheets values API client
#[derive(Debug, Clone)]
pub struct SheetsCatalogSource {
    client: reqwest::Client,
    spreadsheet_id: String,
    api_key: String,
    base_url: String,
}

impl SheetsCatalogSource {
    pub fn new(spreadsheet_id: String, api_key: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            spreadsheet_id,
            api_key,
            base_url: SHEETS_API_BASE.to_string(),
        }
    }

    /// Point the client at a different API host (proxies, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl CatalogSource for SheetsCatalogSource {
    async fn fetch_table(&self, table: CatalogTable) -> Result<SheetTable, SourceError> {
        let url = format!(
            "{}/{}/values/{}",
            self.base_url,
            self.spreadsheet_id,
            table.sheet_name()
        );
        debug!("Fetching catalog sheet {}", table);

        let resp = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str()), ("valueRenderOption", "UNFORMATTED_VALUE")])
            .send()
            .await
            .map_err(|e| SourceError::Http {
                table,
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(SourceError::Status {
                table,
                status: resp.status().as_u16(),
            });
        }

        let body: ValuesResponse = resp.json().await.map_err(|e| SourceError::Malformed {
            table,
            message: e.to_string(),
        })?;

        let values = body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect();
        Ok(SheetTable::from_values(values))
    }
}

fn cell_text(cell: serde_json::Value) -> String {
    match cell {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_records_are_keyed_by_lowercase_header() {
        let table = SheetTable::from_values(grid(&[
            &["Product_ID", " Display_Name "],
            &["2-stall", "2 Stall Restroom Trailer"],
            &["ada"],
        ]));
        let records = table.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["product_id"], "2-stall");
        assert_eq!(records[0]["display_name"], "2 Stall Restroom Trailer");
        assert_eq!(records[1]["display_name"], "");
    }

    #[test]
    fn test_empty_grid() {
        let table = SheetTable::from_values(vec![]);
        assert!(table.headers.is_empty());
        assert!(table.records().is_empty());
    }

    #[test]
    fn test_cell_text_handles_numbers() {
        assert_eq!(cell_text(serde_json::json!(150)), "150");
        assert_eq!(cell_text(serde_json::json!(2.5)), "2.5");
        assert_eq!(cell_text(serde_json::json!(true)), "true");
        assert_eq!(cell_text(serde_json::Value::Null), "");
    }
}
