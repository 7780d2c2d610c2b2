//! `tribed ingest`: load scraped records from a JSON Lines file.
//!
//! Each non-blank line is one record:
//!
//! ```json
//! {"source_type":"reddit","source_id":"t3_abc","url":"https://reddit.com/r/rust/comments/abc",
//!  "title":"...","raw_text":"...","published_at":"2024-05-01T12:00:00Z","tags":["tech"]}
//! ```
//!
//! Lines that are not valid JSON, or records the normalizer rejects, are
//! reported and skipped; the rest of the file is still ingested.

use std::path::Path;

use anyhow::{Context, Result};

use tribed_core::normalize::{RawRecord, SourcePayload, SourceRecord};

use crate::app;
use crate::config::Config;

/// A line that could not be turned into a record.
#[derive(Debug, Clone, PartialEq)]
pub struct BadLine {
    pub line: usize,
    pub reason: String,
}

/// Parsed records with their 1-based line numbers.
#[derive(Debug, Default)]
pub struct ParsedFile {
    pub records: Vec<RawRecord>,
    pub lines: Vec<usize>,
    pub bad: Vec<BadLine>,
}

pub fn parse_jsonl(content: &str) -> ParsedFile {
    let mut parsed = ParsedFile::default();
    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RawRecord>(line) {
            Ok(record) => {
                parsed.records.push(record);
                parsed.lines.push(line_no);
            }
            Err(e) => parsed.bad.push(BadLine {
                line: line_no,
                reason: format!("invalid JSON: {}", e),
            }),
        }
    }
    parsed
}

pub async fn run_ingest(config: &Config, file: &Path, dry_run: bool) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read records file: {}", file.display()))?;
    let mut parsed = parse_jsonl(&content);
    for bad in &parsed.bad {
        tracing::warn!(line = bad.line, reason = %bad.reason, "skipping line");
    }

    if dry_run {
        let mut valid = 0;
        let mut removals = 0;
        for (record, line) in parsed.records.iter().zip(&parsed.lines) {
            match SourceRecord::validate(record) {
                Ok(SourceRecord {
                    payload: SourcePayload::Removed { .. },
                    ..
                }) => removals += 1,
                Ok(_) => valid += 1,
                Err(e) => parsed.bad.push(BadLine {
                    line: *line,
                    reason: e.to_string(),
                }),
            }
        }
        parsed.bad.sort_by_key(|b| b.line);
        println!("ingest {} (dry-run)", file.display());
        println!("  records: {}", parsed.records.len());
        println!("  valid: {}", valid);
        println!("  removals: {}", removals);
        print_bad(&parsed.bad);
        return Ok(());
    }

    let engine = app::open_engine(config).await?;
    let report = engine.ingest_batch(&parsed.records).await?;
    app::close(engine).await;

    let mut bad = parsed.bad;
    bad.extend(report.skipped.iter().map(|s| BadLine {
        line: parsed.lines.get(s.position).copied().unwrap_or(0),
        reason: s.reason.clone(),
    }));
    bad.sort_by_key(|b| b.line);

    println!("ingest {}", file.display());
    println!("  records: {}", report.received);
    println!("  indexed: {}", report.indexed);
    if report.embedded > 0 {
        println!("  embedded (awaiting index): {}", report.embedded);
    }
    println!("  unchanged: {}", report.unchanged);
    println!("  embedding failed: {}", report.embedding_failed);
    println!("  retired: {}", report.retired);
    print_bad(&bad);
    println!("ok");
    Ok(())
}

fn print_bad(bad: &[BadLine]) {
    println!("  skipped: {}", bad.len());
    for b in bad {
        println!("    line {}: {}", b.line, b.reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_jsonl_skips_blank_and_bad_lines() {
        let content = r#"{"source_type":"reddit","source_id":"a","url":"https://reddit.com/a"}

not json
{"source_type":"web","source_id":"b","url":"https://example.com/b","tags":["tech"]}
"#;
        let parsed = parse_jsonl(content);
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.lines, vec![1, 4]);
        assert_eq!(parsed.bad.len(), 1);
        assert_eq!(parsed.bad[0].line, 3);
        assert_eq!(parsed.records[1].tags, vec!["tech".to_string()]);
    }

    #[test]
    fn test_parse_jsonl_missing_source_type_is_bad_json() {
        let parsed = parse_jsonl(r#"{"source_id":"a"}"#);
        assert!(parsed.records.is_empty());
        assert_eq!(parsed.bad.len(), 1);
    }
}
