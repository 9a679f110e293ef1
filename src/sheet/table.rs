//! In-memory model of the shared spreadsheet.
//!
//! Headers are matched after normalization (trim, lowercase, strip trailing
//! colons and whitespace) to tolerate authoring variance in the shared file.

use std::sync::LazyLock;

use regex::Regex;

/// Trailing colons/whitespace stripped from authored headers.
static HEADER_TAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[:\s]+$").expect("static regex"));

/// Normalize an authored header for matching.
pub fn normalize_header(raw: &str) -> String {
    HEADER_TAIL.replace(raw.trim(), "").to_lowercase()
}

/// One sheet: ordered headers plus string-valued rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    headers: Vec<String>,
    normalized: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let normalized = headers.iter().map(|h| normalize_header(h)).collect();
        Self {
            headers,
            normalized,
            rows,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Index of the column whose normalized header equals `name` exactly.
    pub fn column(&self, name: &str) -> Option<usize> {
        let wanted = normalize_header(name);
        self.normalized.iter().position(|h| *h == wanted)
    }

    /// Index of the first column whose normalized header contains any of the
    /// synonym substrings, in synonym order.
    pub fn column_containing(&self, synonyms: &[String]) -> Option<usize> {
        for synonym in synonyms {
            let needle = synonym.trim().to_lowercase();
            if needle.is_empty() {
                continue;
            }
            if let Some(idx) = self.normalized.iter().position(|h| h.contains(&needle)) {
                return Some(idx);
            }
        }
        None
    }

    /// Indices of rows whose cell in `column` matches `key` after trimming.
    pub fn rows_matching(&self, column: usize, key: &str) -> Vec<usize> {
        let key = key.trim();
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.get(column).map(|c| c.trim()) == Some(key))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column).map(String::as_str)
    }

    /// Write a cell, padding short rows so ragged input cannot drop writes.
    pub fn set_cell(&mut self, row: usize, column: usize, value: &str) {
        if let Some(cells) = self.rows.get_mut(row) {
            if cells.len() <= column {
                cells.resize(column + 1, String::new());
            }
            cells[column] = value.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::new(
            vec![
                "NumSar:  ".to_string(),
                " Status ".to_string(),
                "Responsável:".to_string(),
            ],
            vec![
                vec!["ES-001".to_string(), "Pendente".to_string(), String::new()],
                vec![" ES-002 ".to_string(), "Em Andamento".to_string(), "alice".to_string()],
            ],
        )
    }

    #[test]
    fn test_normalize_header_variants() {
        assert_eq!(normalize_header("NumSar:  "), "numsar");
        assert_eq!(normalize_header(" Status "), "status");
        assert_eq!(normalize_header("Responsável:"), "responsável");
        assert_eq!(normalize_header("plain"), "plain");
    }

    #[test]
    fn test_column_exact_match() {
        let table = sample();
        assert_eq!(table.column("status"), Some(1));
        assert_eq!(table.column("Status:"), Some(1));
        assert_eq!(table.column("missing"), None);
    }

    #[test]
    fn test_column_by_synonym() {
        let table = sample();
        let synonyms = vec!["numero".to_string(), "sar".to_string()];
        assert_eq!(table.column_containing(&synonyms), Some(0));
        assert_eq!(table.column_containing(&["nope".to_string()]), None);
    }

    #[test]
    fn test_rows_matching_trims_cells() {
        let table = sample();
        assert_eq!(table.rows_matching(0, "ES-002"), vec![1]);
        assert_eq!(table.rows_matching(0, "ES-404"), Vec::<usize>::new());
    }

    #[test]
    fn test_set_cell_pads_short_rows() {
        let mut table = Table::new(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            vec![vec!["1".to_string()]],
        );
        table.set_cell(0, 2, "x");
        assert_eq!(table.cell(0, 2), Some("x"));
        assert_eq!(table.cell(0, 1), Some(""));
    }
}
