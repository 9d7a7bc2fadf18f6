//! Before/after tables for debugging normalization and reconstruction.
//!
//! Nothing here affects the transformed messages; every entry point returns
//! early unless `debug` is enabled for [`DIFF_TARGET`].

use std::{collections::BTreeMap, fmt::Write as _};

use hyper::HeaderMap;

pub const DIFF_TARGET: &str = "tapegate::diff";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffChange {
    Added,
    Removed,
    Changed,
}

impl DiffChange {
    fn symbol(&self) -> &'static str {
        match self {
            Self::Added => "+",
            Self::Removed => "-",
            Self::Changed => "~",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRow {
    pub name: String,
    pub change: DiffChange,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// Rows for every header whose joined value differs, sorted by name.
pub fn header_diff(before: &HeaderMap, after: &HeaderMap) -> Vec<DiffRow> {
    let before = joined_values(before);
    let after = joined_values(after);

    let mut names: Vec<&String> = before.keys().chain(after.keys()).collect();
    names.sort();
    names.dedup();

    names
        .into_iter()
        .filter_map(|name| {
            let old = before.get(name);
            let new = after.get(name);
            let change = match (old, new) {
                (None, Some(_)) => DiffChange::Added,
                (Some(_), None) => DiffChange::Removed,
                (Some(old), Some(new)) if old != new => DiffChange::Changed,
                _ => return None,
            };
            Some(DiffRow {
                name: name.clone(),
                change,
                before: old.cloned(),
                after: new.cloned(),
            })
        })
        .collect()
}

fn joined_values(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut joined: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        joined
            .entry(name.as_str().to_owned())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    joined
}

/// Renders rows as a fixed-width text table.
pub fn render_diff_table(rows: &[DiffRow]) -> String {
    if rows.is_empty() {
        return "(no changes)".to_owned();
    }

    let name_width = rows
        .iter()
        .map(|row| row.name.len())
        .max()
        .unwrap_or(0)
        .max("header".len());
    let before_width = rows
        .iter()
        .map(|row| row.before.as_deref().map_or(1, str::len))
        .max()
        .unwrap_or(0)
        .max("before".len());

    let mut table = String::new();
    let _ = writeln!(
        table,
        "  {:<name_width$} | {:<before_width$} | after",
        "header", "before"
    );
    for row in rows {
        let _ = writeln!(
            table,
            "{} {:<name_width$} | {:<before_width$} | {}",
            row.change.symbol(),
            row.name,
            row.before.as_deref().unwrap_or("-"),
            row.after.as_deref().unwrap_or("-"),
        );
    }
    table
}

pub(crate) fn log_header_diff(stage: &str, subject: &str, before: &HeaderMap, after: &HeaderMap) {
    if !tracing::enabled!(target: DIFF_TARGET, tracing::Level::DEBUG) {
        return;
    }
    let table = render_diff_table(&header_diff(before, after));
    tracing::debug!(target: DIFF_TARGET, stage, subject, "header diff\n{table}");
}

pub(crate) fn log_text_change(stage: &str, subject: &str, before: &str, after: &str) {
    if before == after || !tracing::enabled!(target: DIFF_TARGET, tracing::Level::DEBUG) {
        return;
    }
    tracing::debug!(target: DIFF_TARGET, stage, subject, before, after, "value rewritten");
}

#[cfg(test)]
mod tests {
    use super::{DiffChange, header_diff, render_diff_table};
    use hyper::{HeaderMap, header::HeaderValue};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn header_diff_reports_added_removed_and_changed() {
        let before = headers(&[("accept", "text/html"), ("referer", "x"), ("host", "a")]);
        let after = headers(&[("accept", "*/*"), ("pragma", "no-cache"), ("host", "a")]);

        let rows = header_diff(&before, &after);
        let summary: Vec<(&str, DiffChange)> = rows
            .iter()
            .map(|row| (row.name.as_str(), row.change.clone()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("accept", DiffChange::Changed),
                ("pragma", DiffChange::Added),
                ("referer", DiffChange::Removed),
            ]
        );
    }

    #[test]
    fn multi_valued_headers_compare_joined() {
        let before = headers(&[("x-a", "1"), ("x-a", "2")]);
        let after = headers(&[("x-a", "1"), ("x-a", "2")]);
        assert!(header_diff(&before, &after).is_empty());
    }

    #[test]
    fn render_diff_table_lists_each_row() {
        let before = headers(&[("accept", "text/html")]);
        let after = headers(&[("accept", "*/*")]);
        let table = render_diff_table(&header_diff(&before, &after));
        assert!(table.contains("~ accept"), "table: {table}");
        assert!(table.contains("*/*"), "table: {table}");
        assert_eq!(render_diff_table(&[]), "(no changes)");
    }
}
