//! Formatting and parsing of the append-only notes log.
//!
//! Entries are stored concatenated with one blank line between them, each
//! headed by a fixed display timestamp:
//!
//! ```text
//! [07/08/2026 14:30 - alice]: checked cabling
//! ```

use std::sync::LazyLock;

use jiff::Zoned;
use jiff::civil::DateTime;
use regex::Regex;

use crate::types::NoteEntry;

/// Fixed display format of the entry header.
pub const NOTE_DATE_FORMAT: &str = "%d/%m/%Y %H:%M";

static NOTE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\[(\d{2}/\d{2}/\d{4} \d{2}:\d{2}) - ([^\]]+)\]: (.+)$")
        .expect("static regex")
});

/// Format one entry for storage.
pub fn format_entry(user: &str, text: &str, now: &Zoned) -> String {
    format!(
        "[{} - {}]: {}",
        now.strftime(NOTE_DATE_FORMAT),
        user,
        text
    )
}

/// Build the [`NoteEntry`] returned to the caller of an annotate.
pub fn entry_for(user: &str, text: &str, now: &Zoned) -> NoteEntry {
    NoteEntry {
        date: now.strftime(NOTE_DATE_FORMAT).to_string(),
        user: user.to_string(),
        text: text.to_string(),
        timestamp: Some(now.datetime().to_string()),
    }
}

/// Parse the raw notes log into structured entries.
///
/// Chunks that do not match the entry header degrade to a system-attributed
/// entry instead of failing the read; the log is shared with older writers.
pub fn parse_notes(raw: &str) -> Vec<NoteEntry> {
    let mut entries = Vec::new();
    for chunk in raw.split("\n\n") {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            continue;
        }
        match NOTE_HEADER.captures(chunk) {
            Some(captures) => {
                let date = captures[1].to_string();
                let timestamp = DateTime::strptime(NOTE_DATE_FORMAT, &date)
                    .ok()
                    .map(|dt| dt.to_string());
                entries.push(NoteEntry {
                    date,
                    user: captures[2].to_string(),
                    text: captures[3].trim().to_string(),
                    timestamp,
                });
            }
            None => entries.push(NoteEntry {
                date: String::new(),
                user: "system".to_string(),
                text: chunk.to_string(),
                timestamp: None,
            }),
        }
    }
    entries
}
