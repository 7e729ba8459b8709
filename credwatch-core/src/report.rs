//! Plain-text and HTML rendering of selected credential records.
//!
//! Rendering is pure: the generation timestamp and display zone are
//! inputs, so identical inputs always produce byte-identical output.

use std::fmt::{Display, Write};

use chrono::{DateTime, Local, TimeZone, Utc};
use comfy_table::{Table, presets::ASCII_FULL};

use crate::classify::{UrgencyClass, sort_by_urgency, urgency_class};
use crate::expiry::format_in;
use crate::model::{CredentialRecord, DaysToExpire, UNKNOWN};

/// Heading used in both representations and as the default mail subject.
pub const REPORT_TITLE: &str = "Application Registration Secret Expiry Report";

const HEADERS: [&str; 6] = [
    "Display Name",
    "Application ID",
    "Creation Time",
    "Client Secret",
    "Expiration Date",
    "Days to Expire",
];

/// Both renderings of one set of records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Monospace table for terminals and the text/plain mail part.
    pub plain: String,

    /// Styled document for the text/html mail part.
    pub html: String,
}

/// Render in the machine's local timezone.
pub fn render(records: &[CredentialRecord], generated_at: DateTime<Utc>) -> Report {
    render_in(records, generated_at, &Local)
}

/// Render with timestamps shown in `tz`.
pub fn render_in<Tz>(records: &[CredentialRecord], generated_at: DateTime<Utc>, tz: &Tz) -> Report
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let sorted = sort_by_urgency(records);
    let rows: Vec<Row> = sorted.iter().map(|record| Row::new(record, tz)).collect();
    let generated = format_in(generated_at, tz);
    let summary = summary_line(&rows);

    Report {
        plain: render_plain(&rows, &generated, &summary),
        html: render_html(&rows, &generated, &summary),
    }
}

/// Display strings for one record, computed once for both renderings.
struct Row {
    cells: [String; 6],
    class: UrgencyClass,
}

impl Row {
    fn new<Tz>(record: &CredentialRecord, tz: &Tz) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let created = record
            .created_time
            .map(|t| format_in(t, tz))
            .unwrap_or_else(|| UNKNOWN.to_string());

        let end = match (record.end_date, record.days_to_expire) {
            (Some(end), _) => format_in(end, tz),
            (None, DaysToExpire::NotApplicable) => "None".to_string(),
            (None, _) => UNKNOWN.to_string(),
        };

        Self {
            cells: [
                record.display_name.clone(),
                record.app_id.clone(),
                created,
                record.secret_label().to_string(),
                end,
                record.days_to_expire.to_string(),
            ],
            class: urgency_class(record),
        }
    }
}

fn summary_line(rows: &[Row]) -> String {
    let expired = rows.iter().filter(|r| r.class == UrgencyClass::Expired).count();
    let warning = rows.iter().filter(|r| r.class == UrgencyClass::Warning).count();
    format!(
        "Expired: {}, expiring within {} days: {}, total listed: {}",
        expired,
        crate::classify::WARNING_WINDOW_DAYS,
        warning,
        rows.len()
    )
}

fn render_plain(rows: &[Row], generated: &str, summary: &str) -> String {
    let mut table = Table::new();
    table.load_preset(ASCII_FULL).force_no_tty().set_header(HEADERS);
    for row in rows {
        table.add_row(row.cells.iter());
    }

    format!(
        "{}\nGenerated at: {}\n{}\n\n{}\n",
        REPORT_TITLE, generated, summary, table
    )
}

fn render_html(rows: &[Row], generated: &str, summary: &str) -> String {
    let header_cells: String = HEADERS.iter().map(|h| format!("<th>{}</th>", h)).collect();

    let mut body_rows = String::new();
    for row in rows {
        let _ = write!(body_rows, "            <tr class='{}'>", row.class);
        for cell in &row.cells {
            let _ = write!(body_rows, "<td>{}</td>", escape_html(cell));
        }
        body_rows.push_str("</tr>\n");
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <style>
        body {{ font-family: sans-serif; }}
        table {{ border-collapse: collapse; width: 100%; font-family: sans-serif; }}
        th, td {{ border: 1px solid #ddd; padding: 8px; text-align: left; }}
        th {{ background-color: #f2f2f2; }}
        tr:nth-child(even) {{ background-color: #f9f9f9; }}
        tr.warning {{ background-color: #fffacd; }}
        tr.expired {{ background-color: #ffcccc; }}
    </style>
</head>
<body>
    <h2>{title}</h2>
    <p>Generated at: {generated}</p>
    <p>{summary}</p>
    <table>
        <thead>
            <tr>{header_cells}</tr>
        </thead>
        <tbody>
{body_rows}        </tbody>
    </table>
    <p>Note: yellow rows expire within {window} days, red rows have already expired.</p>
</body>
</html>
"#,
        title = REPORT_TITLE,
        generated = escape_html(generated),
        summary = escape_html(summary),
        header_cells = header_cells,
        body_rows = body_rows,
        window = crate::classify::WARNING_WINDOW_DAYS,
    )
}

/// Escape text for inclusion in HTML element content or quoted attributes.
fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap()
    }

    fn record(name: &str, days: i64) -> CredentialRecord {
        CredentialRecord {
            display_name: name.to_string(),
            app_id: format!("{}-id", name),
            created_time: Some(Utc.with_ymd_and_hms(2023, 2, 3, 4, 5, 6).unwrap()),
            has_secret: true,
            end_date: Some(now() + Duration::days(days)),
            days_to_expire: DaysToExpire::Days(days),
        }
    }

    fn selected() -> Vec<CredentialRecord> {
        vec![record("soon", 5), record("gone", -10), record("edge", 30)]
    }

    #[test]
    fn test_render_is_deterministic() {
        let first = render_in(&selected(), now(), &Utc);
        let second = render_in(&selected(), now(), &Utc);
        assert_eq!(first, second);
    }

    #[test]
    fn test_plain_table_contents() {
        let report = render_in(&selected(), now(), &Utc);
        let lines: Vec<&str> = report.plain.lines().collect();

        assert_eq!(lines[0], REPORT_TITLE);
        assert_eq!(lines[1], "Generated at: 2024-06-01 09:30:00");
        assert_eq!(lines[2], "Expired: 1, expiring within 30 days: 2, total listed: 3");
        assert!(report.plain.contains("Display Name"));
        assert!(report.plain.contains("-10 days"));
        assert!(report.plain.contains("2024-06-06 09:30:00"));
        assert!(report.plain.contains("2023-02-03 04:05:06"));
        assert!(!report.plain.contains('\u{1b}'), "no ANSI styling in plain text");

        let gone = report.plain.find("gone").unwrap();
        let soon = report.plain.find("soon").unwrap();
        let edge = report.plain.find("edge").unwrap();
        assert!(gone < soon && soon < edge, "sorted by days ascending");
    }

    #[test]
    fn test_html_rows_carry_urgency_class() {
        let report = render_in(&selected(), now(), &Utc);

        assert!(report.html.contains("<tr class='expired'><td>gone</td>"));
        assert!(report.html.contains("<tr class='warning'><td>soon</td>"));
        assert!(report.html.contains("<tr class='warning'><td>edge</td>"));
        assert!(report.html.contains("<td>-10 days</td>"));
        assert!(report.html.contains("tr.expired"));
    }

    #[test]
    fn test_html_escapes_record_text() {
        let mut evil = record("<script>alert('x')</script>", 1);
        evil.app_id = "a&b".to_string();
        let report = render_in(&[evil], now(), &Utc);

        assert!(!report.html.contains("<script>"));
        assert!(report.html.contains("&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"));
        assert!(report.html.contains("<td>a&amp;b</td>"));
    }

    #[test]
    fn test_sentinel_rows_do_not_crash() {
        let odd = vec![
            CredentialRecord::without_secret("bare", "bare-id", None),
            record("soon", 2),
        ];
        let report = render_in(&odd, now(), &Utc);

        assert!(report.plain.contains("N/A"));
        assert!(report.plain.contains("Unknown"));
        assert!(report.plain.find("soon").unwrap() < report.plain.find("bare").unwrap());
        assert!(report.html.contains("<tr class=''><td>bare</td>"));
    }

    #[test]
    fn test_empty_render() {
        let report = render_in(&[], now(), &Utc);
        assert!(report.plain.contains("total listed: 0"));
        assert!(report.html.contains("<tbody>\n        </tbody>"));
    }
}
