//! CSV attendance export.

use crate::ReportRow;
use chrono::TimeZone;
use std::fmt::Display;
use std::io::Write;

pub const HEADER: [&str; 5] = ["Timestamp", "Name", "Reference", "Status", "Temperature"];

/// 12-hour clock with AM/PM, e.g. `2024-03-01 08:15:42 AM`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %I:%M:%S %p";

/// Write `rows` as CSV, rendering timestamps in `tz`.
pub fn write_csv<W, Tz>(rows: &[ReportRow], tz: &Tz, mut out: W) -> std::io::Result<()>
where
    W: Write,
    Tz: TimeZone,
    Tz::Offset: Display,
{
    writeln!(out, "{}", HEADER.join(","))?;
    for row in rows {
        let timestamp = row.timestamp.with_timezone(tz).format(TIMESTAMP_FORMAT).to_string();
        let temperature = format_temperature(row.temperature);
        let fields = [
            timestamp.as_str(),
            row.name.as_str(),
            row.reference.as_deref().unwrap_or(""),
            row.status.as_str(),
            temperature.as_str(),
        ];
        let line: Vec<_> = fields.iter().map(|f| escape(f)).collect();
        writeln!(out, "{}", line.join(","))?;
    }
    out.flush()
}

/// The stored reading unrounded, always with a decimal point (`37` → `37.0`).
fn format_temperature(celsius: f32) -> String {
    let text = celsius.to_string();
    if celsius.is_finite() && !text.contains('.') {
        format!("{text}.0")
    } else {
        text
    }
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
