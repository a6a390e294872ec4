//! Text and JSON output for the command handlers.

use std::collections::HashMap;
use std::io::{self, Write};

use chrono::DateTime;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::context::{Category, CategoryView, CompositeView, RowBody};
use crate::error::Result;
use crate::model::{field_array, field_map, field_str, label_for_collection, Record, RecordEntry};
use crate::parser::{extract_rkey, RecordUri};

/// Cut `s` to at most `max` characters, marking the cut with "...".
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    if max <= 3 {
        return s.chars().take(max).collect();
    }
    let mut out: String = s.chars().take(max - 3).collect();
    out.push_str("...");
    out
}

/// RFC 3339 timestamp as `YYYY-MM-DD`; "-" when empty, the input when unparseable.
pub fn format_date(s: &str) -> String {
    if s.is_empty() {
        return "-".to_string();
    }
    match DateTime::parse_from_rfc3339(s) {
        Ok(t) => t.format("%Y-%m-%d").to_string(),
        Err(_) => s.to_string(),
    }
}

pub fn pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn or_dash(s: String) -> String {
    if s.is_empty() {
        "-".to_string()
    } else {
        s
    }
}

/// Best human-readable name a record offers.
pub fn display_name(record: &Record) -> &str {
    ["title", "name", "displayName", "metric", "summary", "label", "identifier"]
        .into_iter()
        .map(|key| field_str(record, key))
        .find(|s| !s.is_empty())
        .unwrap_or("")
}

// ==================== Listings ====================

/// `activity ls` table. `measurements` maps activity URI to the number of
/// measurements pointing at it.
pub fn write_activity_table(
    out: &mut dyn Write,
    entries: &[RecordEntry],
    measurements: &HashMap<String, usize>,
) -> io::Result<()> {
    writeln!(out, "{:<15} {:<30} {:<6} {:<15} CREATED", "ID", "TITLE", "MEAS", "SCOPE")?;
    writeln!(out, "{:<15} {:<30} {:<6} {:<15} {}", "-".repeat(13), "-".repeat(28), "-".repeat(4), "-".repeat(13), "-".repeat(10))?;

    for entry in entries {
        let Ok(uri) = RecordUri::parse(&entry.uri) else {
            continue;
        };
        let scope = field_map(&entry.value, "workScope")
            .map(|ws| field_str(ws, "scope"))
            .unwrap_or("");
        writeln!(
            out,
            "{:<15} {:<30} {:<6} {:<15} {}",
            uri.rkey,
            truncate(field_str(&entry.value, "title"), 28),
            measurements.get(&entry.uri).copied().unwrap_or(0),
            or_dash(truncate(scope, 13)),
            format_date(field_str(&entry.value, "createdAt")),
        )?;
    }

    if entries.is_empty() {
        writeln!(out, "(no activities found)")?;
    }
    Ok(())
}

pub fn activity_list_json(entries: &[RecordEntry], measurements: &HashMap<String, usize>) -> Value {
    let items: Vec<Value> = entries
        .iter()
        .map(|e| {
            let mut item = json!({ "uri": e.uri, "activity": e.value });
            if let Some(&count) = measurements.get(&e.uri).filter(|c| **c > 0) {
                item["measurementCount"] = json!(count);
            }
            item
        })
        .collect();
    Value::Array(items)
}

/// Generic `record ls` table for any kind.
pub fn write_record_table(out: &mut dyn Write, entries: &[RecordEntry], label: &str) -> io::Result<()> {
    writeln!(out, "{:<15} {:<40} CREATED", "ID", "NAME")?;
    writeln!(out, "{:<15} {:<40} {}", "-".repeat(13), "-".repeat(38), "-".repeat(10))?;
    for entry in entries {
        writeln!(
            out,
            "{:<15} {:<40} {}",
            extract_rkey(&entry.uri),
            or_dash(truncate(display_name(&entry.value), 38)),
            format_date(field_str(&entry.value, "createdAt")),
        )?;
    }
    if entries.is_empty() {
        writeln!(out, "(no {label} records found)")?;
    }
    Ok(())
}

// ==================== Context ====================

/// Root plus counts, the default `get` output.
pub fn context_summary_json(view: &CompositeView) -> Value {
    let mut obj = Map::new();
    obj.insert("uri".into(), json!(view.uri));
    obj.insert(root_key(view).into(), Value::Object(view.root.clone()));
    if let Some(counts) = view.backlink_counts.as_ref().filter(|c| !c.is_empty()) {
        obj.insert("backlinks".into(), json!(counts));
    }
    Value::Object(obj)
}

/// Full JSON form: loaded linked records tagged with `_uri` and `_did`.
/// Rows that failed to load are left out of their category and reported
/// under `warnings`.
pub fn context_json(view: &CompositeView) -> Value {
    let mut obj = Map::new();
    obj.insert("uri".into(), json!(view.uri));
    obj.insert(root_key(view).into(), Value::Object(view.root.clone()));

    let mut warnings = Vec::new();
    for cat in &view.categories {
        warnings.extend(cat.warning.iter().cloned());
        let mut rows = Vec::with_capacity(cat.rows.len());
        for row in &cat.rows {
            match &row.body {
                RowBody::Loaded(record) => {
                    let mut record = record.clone();
                    record.insert("_uri".into(), json!(row.uri));
                    record.insert("_did".into(), json!(row.did));
                    rows.push(Value::Object(record));
                }
                RowBody::FetchFailed(reason) => warnings.push(format!("failed to fetch {}: {reason}", row.uri)),
                RowBody::NotRequested => {}
            }
        }
        obj.insert(cat.category.title().to_lowercase(), Value::Array(rows));
    }
    if !warnings.is_empty() {
        obj.insert("warnings".into(), json!(warnings));
    }
    Value::Object(obj)
}

fn root_key(view: &CompositeView) -> &'static str {
    RecordUri::parse(&view.uri)
        .map(|u| label_for_collection(&u.collection))
        .unwrap_or("record")
}

/// Header and one table per category.
pub fn write_context(out: &mut dyn Write, view: &CompositeView) -> io::Result<()> {
    writeln!(out, "{}", display_name(&view.root))?;
    let desc = field_str(&view.root, "shortDescription");
    if !desc.is_empty() {
        writeln!(out, "{desc}")?;
    }
    writeln!(out, "URI: {}", view.uri)?;
    writeln!(out)?;

    for cat in &view.categories {
        write_category(out, cat)?;
    }
    Ok(())
}

fn write_category(out: &mut dyn Write, cat: &CategoryView) -> io::Result<()> {
    if let Some(warning) = &cat.warning {
        return writeln!(out, "Warning: {warning}");
    }

    writeln!(out, "{} ({})", cat.category.title(), cat.rows.len())?;
    if cat.rows.is_empty() {
        writeln!(out, "  (none)")?;
        return writeln!(out);
    }

    let columns = Columns::for_category(cat.category);
    writeln!(out, "  {}", columns.header())?;
    writeln!(out, "  {}", columns.rule())?;
    for row in &cat.rows {
        let lead = format!("{:<15} {:<12}", row.rkey, truncate(&row.did, 10));
        match &row.body {
            RowBody::Loaded(record) => writeln!(out, "  {lead} {}", columns.cells(cat.category, record))?,
            RowBody::FetchFailed(_) => writeln!(out, "  {lead} (failed to fetch)")?,
            RowBody::NotRequested => writeln!(out, "  {}", lead.trim_end())?,
        }
    }
    writeln!(out)
}

/// Column names and widths after the shared ID/DID pair. The last column
/// is unpadded.
struct Columns {
    names: &'static [&'static str],
    widths: &'static [usize],
}

impl Columns {
    fn for_category(category: Category) -> Self {
        match category {
            Category::Measurements => Columns {
                names: &["METRIC", "VALUE", "UNIT", "CREATED"],
                widths: &[20, 10, 10],
            },
            Category::Attachments => Columns {
                names: &["TITLE", "TYPE", "CREATED"],
                widths: &[25, 12],
            },
            Category::Evaluations => Columns {
                names: &["SUMMARY", "SCORE", "CREATED"],
                widths: &[35, 10],
            },
            Category::Collections => Columns {
                names: &["TITLE", "ITEMS", "CREATED"],
                widths: &[30, 8],
            },
        }
    }

    fn header(&self) -> String {
        let mut line = format!("{:<15} {:<12}", "ID", "DID");
        for (i, name) in self.names.iter().enumerate() {
            match self.widths.get(i) {
                Some(&w) => line.push_str(&format!(" {name:<w$}")),
                None => line.push_str(&format!(" {name}")),
            }
        }
        line
    }

    fn rule(&self) -> String {
        let mut line = format!("{:<15} {:<12}", "-".repeat(13), "-".repeat(10));
        for i in 0..self.names.len() {
            match self.widths.get(i) {
                Some(&w) => line.push_str(&format!(" {:<w$}", "-".repeat(w - 2))),
                None => line.push_str(&format!(" {}", "-".repeat(10))),
            }
        }
        line
    }

    fn cells(&self, category: Category, record: &Record) -> String {
        let values = category_cells(category, record);
        let mut line = String::new();
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                line.push(' ');
            }
            match self.widths.get(i) {
                Some(&w) => line.push_str(&format!("{:<w$}", truncate(value, w - 2))),
                None => line.push_str(value),
            }
        }
        line
    }
}

fn category_cells(category: Category, record: &Record) -> Vec<String> {
    let created = format_date(field_str(record, "createdAt"));
    match category {
        Category::Measurements => vec![
            field_str(record, "metric").to_string(),
            field_str(record, "value").to_string(),
            field_str(record, "unit").to_string(),
            created,
        ],
        Category::Attachments => vec![
            field_str(record, "title").to_string(),
            or_dash(field_str(record, "contentType").to_string()),
            created,
        ],
        Category::Evaluations => vec![field_str(record, "summary").to_string(), score(record), created],
        Category::Collections => vec![
            display_name(record).to_string(),
            field_array(record, "items").map_or(0, Vec::len).to_string(),
            created,
        ],
    }
}

/// `value/max` from an evaluation score, or "-".
fn score(record: &Record) -> String {
    let Some(score) = field_map(record, "score") else {
        return "-".to_string();
    };
    match (
        score.get("value").and_then(Value::as_f64),
        score.get("max").and_then(Value::as_f64),
    ) {
        (Some(v), Some(m)) => format!("{}/{}", v as i64, m as i64),
        _ => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::LinkedRow;
    use pretty_assertions::assert_eq;

    fn record(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn truncate_marks_the_cut() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exactly10!", 10), "exactly10!");
        assert_eq!(truncate("a longer title here", 10), "a longe...");
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("", 5), "");
    }

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate("héllo wörld", 8), "héllo...");
    }

    #[test]
    fn format_date_keeps_the_calendar_day() {
        assert_eq!(format_date("2024-03-05T10:00:00Z"), "2024-03-05");
        assert_eq!(format_date("2024-03-05T23:30:00-05:00"), "2024-03-05");
        assert_eq!(format_date(""), "-");
        assert_eq!(format_date("last week"), "last week");
    }

    #[test]
    fn evaluation_score_needs_value_and_max() {
        assert_eq!(score(&record(json!({ "score": { "value": 4, "max": 5 } }))), "4/5");
        assert_eq!(score(&record(json!({ "score": { "value": 4 } }))), "-");
        assert_eq!(score(&record(json!({}))), "-");
    }

    #[test]
    fn activity_table_lists_rows_and_counts() {
        let uri = "at://did:plc:abc/org.hypercerts.claim.activity/3kact";
        let entries = vec![RecordEntry {
            uri: uri.into(),
            cid: "c".into(),
            value: record(json!({
                "title": "Beach cleanup",
                "workScope": { "scope": "environment" },
                "createdAt": "2024-06-01T00:00:00Z",
            })),
        }];
        let counts = HashMap::from([(uri.to_string(), 2)]);

        let mut out = Vec::new();
        write_activity_table(&mut out, &entries, &counts).unwrap();
        let text = String::from_utf8(out).unwrap();
        let row = text.lines().nth(2).unwrap();
        assert!(row.starts_with("3kact "));
        assert!(row.contains("Beach cleanup"));
        assert!(row.contains(" 2 "));
        assert!(row.contains("environment"));
        assert!(row.ends_with("2024-06-01"));
    }

    #[test]
    fn empty_activity_table_says_so() {
        let mut out = Vec::new();
        write_activity_table(&mut out, &[], &HashMap::new()).unwrap();
        assert!(String::from_utf8(out).unwrap().ends_with("(no activities found)\n"));
    }

    #[test]
    fn list_json_only_counts_measured_activities() {
        let entries = vec![
            RecordEntry {
                uri: "at://a/org.hypercerts.claim.activity/1".into(),
                cid: "c".into(),
                value: record(json!({ "title": "one" })),
            },
            RecordEntry {
                uri: "at://a/org.hypercerts.claim.activity/2".into(),
                cid: "c".into(),
                value: record(json!({ "title": "two" })),
            },
        ];
        let counts = HashMap::from([("at://a/org.hypercerts.claim.activity/1".to_string(), 3)]);
        let v = activity_list_json(&entries, &counts);
        assert_eq!(v[0]["measurementCount"], 3);
        assert!(v[1].get("measurementCount").is_none());
    }

    #[test]
    fn category_warning_replaces_table() {
        let view = CategoryView {
            category: Category::Evaluations,
            rows: Vec::new(),
            warning: Some("failed to fetch evaluation backlinks: down".into()),
        };
        let mut out = Vec::new();
        write_category(&mut out, &view).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Warning: failed to fetch evaluation backlinks: down\n"
        );
    }

    #[test]
    fn failed_rows_render_as_placeholders() {
        let view = CategoryView {
            category: Category::Measurements,
            rows: vec![
                LinkedRow {
                    uri: "at://did:plc:abc/org.hypercerts.claim.measurement/m1".into(),
                    did: "did:plc:abc".into(),
                    rkey: "m1".into(),
                    body: RowBody::Loaded(record(json!({ "metric": "kg", "value": "12", "unit": "kg" }))),
                },
                LinkedRow {
                    uri: "at://did:plc:abc/org.hypercerts.claim.measurement/m2".into(),
                    did: "did:plc:abc".into(),
                    rkey: "m2".into(),
                    body: RowBody::FetchFailed("boom".into()),
                },
            ],
            warning: None,
        };
        let mut out = Vec::new();
        write_category(&mut out, &view).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Measurements (2)");
        assert!(lines[1].contains("METRIC"));
        assert!(lines[3].contains("kg"));
        assert!(lines[4].ends_with("(failed to fetch)"));
    }

    #[test]
    fn context_json_reports_failed_rows_as_warnings() {
        let view = CompositeView {
            uri: "at://did:plc:abc/org.hypercerts.claim.activity/3k".into(),
            root: record(json!({ "title": "Root" })),
            backlink_counts: None,
            categories: vec![CategoryView {
                category: Category::Attachments,
                rows: vec![
                    LinkedRow {
                        uri: "at://did:plc:x/org.hypercerts.claim.attachment/a1".into(),
                        did: "did:plc:x".into(),
                        rkey: "a1".into(),
                        body: RowBody::Loaded(record(json!({ "title": "Photo" }))),
                    },
                    LinkedRow {
                        uri: "at://did:plc:x/org.hypercerts.claim.attachment/a2".into(),
                        did: "did:plc:x".into(),
                        rkey: "a2".into(),
                        body: RowBody::FetchFailed("gone".into()),
                    },
                ],
                warning: None,
            }],
        };
        let v = context_json(&view);
        assert_eq!(v["activity"]["title"], "Root");
        assert_eq!(v["attachments"].as_array().unwrap().len(), 1);
        assert_eq!(v["attachments"][0]["_did"], "did:plc:x");
        assert_eq!(v["attachments"][0]["_uri"], "at://did:plc:x/org.hypercerts.claim.attachment/a1");
        assert_eq!(
            v["warnings"],
            json!(["failed to fetch at://did:plc:x/org.hypercerts.claim.attachment/a2: gone"])
        );
    }
}
