//! Built-in command implementations and shared rendering helpers.

pub mod ai;
pub mod config;
pub mod context;
pub mod incident;
pub mod resources;
pub mod search;

use chrono::{DateTime, Utc};

/// Convert a k8s-openapi jiff timestamp into the chrono type used throughout
/// this crate's age/time comparisons.
pub fn jiff_to_chrono(ts: k8s_openapi::jiff::Timestamp) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(ts.as_second(), ts.subsec_nanosecond() as u32)
        .unwrap_or_else(Utc::now)
}

/// Inverse of [`jiff_to_chrono`], used by tests constructing k8s timestamps.
pub fn chrono_to_jiff(dt: DateTime<Utc>) -> k8s_openapi::jiff::Timestamp {
    k8s_openapi::jiff::Timestamp::new(dt.timestamp(), dt.timestamp_subsec_nanos() as i32)
        .unwrap_or_else(|_| k8s_openapi::jiff::Timestamp::now())
}

/// Plain fixed-width table; the same renderer backs TUI snapshots so saved
/// output is reproducible.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }
    let mut out = String::new();
    let format_row = |cells: Vec<&str>, widths: &[usize]| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:<width$}", c, width = widths.get(i).copied().unwrap_or(0)))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    out.push_str(&format_row(headers.to_vec(), &widths));
    out.push('\n');
    for row in rows {
        out.push_str(&format_row(row.iter().map(String::as_str).collect(), &widths));
        out.push('\n');
    }
    out
}

/// kubectl-style compact age: 90s, 5m, 3h, 2d.
pub fn format_age(from: Option<DateTime<Utc>>) -> String {
    let Some(from) = from else {
        return "<unknown>".to_string();
    };
    let seconds = (Utc::now() - from).num_seconds().max(0);
    if seconds < 120 {
        format!("{seconds}s")
    } else if seconds < 7200 {
        format!("{}m", seconds / 60)
    } else if seconds < 172_800 {
        format!("{}h", seconds / 3600)
    } else {
        format!("{}d", seconds / 86_400)
    }
}

pub fn parse_window(text: &str) -> kcli_core::Result<chrono::Duration> {
    let std_duration = humantime::parse_duration(text.trim())
        .map_err(|e| kcli_core::Error::InvalidArgument(format!("duration '{text}': {e}")))?;
    chrono::Duration::from_std(std_duration)
        .map_err(|_| kcli_core::Error::InvalidArgument(format!("duration '{text}' too large")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_alignment() {
        let out = render_table(
            &["NAME", "STATUS"],
            &[
                vec!["api-1".into(), "Running".into()],
                vec!["very-long-pod-name".into(), "Pending".into()],
            ],
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        let col = lines[0].find("STATUS").unwrap();
        assert_eq!(lines[1].find("Running").unwrap(), col);
        assert_eq!(lines[2].find("Pending").unwrap(), col);
    }

    #[test]
    fn age_buckets() {
        let now = Utc::now();
        assert_eq!(format_age(Some(now - chrono::Duration::seconds(30))), "30s");
        assert_eq!(format_age(Some(now - chrono::Duration::minutes(10))), "10m");
        assert_eq!(format_age(Some(now - chrono::Duration::hours(5))), "5h");
        assert_eq!(format_age(Some(now - chrono::Duration::days(3))), "3d");
        assert_eq!(format_age(None), "<unknown>");
    }

    #[test]
    fn window_parsing() {
        assert_eq!(parse_window("1h").unwrap(), chrono::Duration::hours(1));
        assert_eq!(parse_window("30m").unwrap(), chrono::Duration::minutes(30));
        assert!(parse_window("soon").is_err());
    }
}
