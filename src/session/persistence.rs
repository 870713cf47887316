//! Session report persistence (C9), per SPEC_FULL.md §4.9.
//!
//! Writes a per-session text report plus one row in a CSV index, using the
//! same write-temp-then-rename primitive `EliteMiningConfig::save` and
//! `JournalCursor::save` already use, so a crash never leaves either
//! artifact half-written.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::session::aggregator::SessionResult;

#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub reports_dir: PathBuf,
    pub csv_index_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct SessionCsvRow {
    timestamp: String,
    session_id: String,
    system: String,
    duration_secs: f64,
    total_tons: i64,
    material_count: usize,
    materials_breakdown: String,
    tons_per_hour: Option<f64>,
    prospectors_used: u32,
    hit_rate: Option<f64>,
    average_quality: Option<f64>,
    best_material: Option<String>,
}

fn atomic_write(path: &Path, contents: &str) -> Result<(), SessionError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp_path = dir.join(format!(".{}.tmp", path.file_name().and_then(|n| n.to_str()).unwrap_or("session")));
    std::fs::write(&tmp_path, contents)
        .map_err(|source| SessionError::AtomicWrite { path: tmp_path.clone(), source })?;
    std::fs::rename(&tmp_path, path).map_err(|source| SessionError::AtomicWrite { path: path.to_path_buf(), source })?;
    Ok(())
}

fn breakdown_string(materials: &std::collections::BTreeMap<String, i64>) -> String {
    let mut entries: Vec<_> = materials.iter().filter(|(_, v)| **v != 0).collect();
    entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    entries.iter().map(|(m, c)| format!("{m}: {c}")).collect::<Vec<_>>().join(", ")
}

fn report_filename(result: &SessionResult) -> String {
    let timestamp = result.started_at.format("%Y%m%d_%H%M%S");
    let system = result.system.as_deref().unwrap_or("UnknownSystem").replace(' ', "_");
    format!("Session_{timestamp}_{system}_{}.txt", result.body.replace(' ', "_"))
}

fn render_report(result: &SessionResult) -> String {
    let mut out = String::new();
    out.push_str("=== MINING SESSION REPORT ===\n");
    out.push_str(&format!("Session ID: {}\n", result.session_id));
    out.push_str(&format!("System: {}\n", result.system.as_deref().unwrap_or("Unknown")));
    out.push_str(&format!("Started: {}\n", result.started_at.to_rfc3339()));
    out.push_str(&format!("Ended: {}\n", result.ended_at.to_rfc3339()));
    out.push_str(&format!("Duration (s): {:.1}\n", result.duration_secs));
    out.push_str(&format!("Mined Tons: {}\n", result.materials_mined.values().sum::<i64>()));
    out.push_str(&format!("Total Tons: {}\n", result.total_tons));
    match result.tons_per_hour {
        Some(tph) => out.push_str(&format!("Tons/Hour: {tph:.1}\n")),
        None => out.push_str("Tons/Hour: N/A\n"),
    }
    out.push_str(&format!("Prospectors Used: {}\n", result.prospectors_used));
    match result.hit_rate {
        Some(rate) => out.push_str(&format!("Hit Rate: {:.1}%\n", rate * 100.0)),
        None => out.push_str("Hit Rate: N/A\n"),
    }
    match result.average_quality {
        Some(q) => out.push_str(&format!("Average Quality: {q:.1}%\n")),
        None => out.push_str("Average Quality: N/A\n"),
    }
    out.push_str(&format!("Best Material: {}\n", result.best_material.as_deref().unwrap_or("N/A")));

    out.push_str("\n=== MATERIALS MINED ===\n");
    for (material, count) in &result.materials_mined {
        out.push_str(&format!("{material}: {count}\n"));
    }

    out.push_str("\n=== ENGINEERING MATERIALS ===\n");
    for (material, count) in &result.engineering_materials {
        out.push_str(&format!("{material}: {count}\n"));
    }

    out.push_str("\n=== REFINED CARGO TRACKING ===\n");
    for (material, count) in &result.refined_materials {
        out.push_str(&format!("{material}: {count}\n"));
    }

    out
}

fn to_csv_row(result: &SessionResult) -> SessionCsvRow {
    SessionCsvRow {
        timestamp: result.started_at.format("%Y%m%d_%H%M%S").to_string(),
        session_id: result.session_id.clone(),
        system: result.system.clone().unwrap_or_else(|| "Unknown".to_string()),
        duration_secs: result.duration_secs,
        total_tons: result.total_tons,
        material_count: result.materials_mined.iter().filter(|(_, v)| **v != 0).count(),
        materials_breakdown: breakdown_string(&result.materials_mined),
        tons_per_hour: result.tons_per_hour,
        prospectors_used: result.prospectors_used,
        hit_rate: result.hit_rate,
        average_quality: result.average_quality,
        best_material: result.best_material.clone(),
    }
}

fn read_csv_rows(path: &Path) -> Result<Vec<SessionCsvRow>, SessionError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record?);
    }
    Ok(rows)
}

fn write_csv_rows(path: &Path, rows: &[SessionCsvRow]) -> Result<(), SessionError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp_path = dir.join(format!(".{}.tmp", path.file_name().and_then(|n| n.to_str()).unwrap_or("sessions.csv")));
    {
        let mut writer = csv::Writer::from_path(&tmp_path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }
    std::fs::rename(&tmp_path, path).map_err(|source| SessionError::AtomicWrite { path: path.to_path_buf(), source })?;
    Ok(())
}

/// Writes the initial text report and appends its CSV index row.
pub fn write_session(paths: &SessionPaths, result: &SessionResult) -> Result<(), SessionError> {
    let report_path = paths.reports_dir.join(report_filename(result));
    atomic_write(&report_path, &render_report(result))?;

    let mut rows = read_csv_rows(&paths.csv_index_path)?;
    rows.push(to_csv_row(result));
    write_csv_rows(&paths.csv_index_path, &rows)?;
    Ok(())
}

fn filename_timestamp_regex() -> &'static Regex {
    static RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^Session_(\d{8}_\d{6})_").unwrap());
    &RE
}

fn parse_timestamp_from_filename(path: &Path) -> Result<String, SessionError> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    filename_timestamp_regex()
        .captures(name)
        .map(|c| c[1].to_string())
        .ok_or_else(|| SessionError::MalformedReport(path.to_path_buf()))
}

fn parse_refined_section(text: &str) -> std::collections::BTreeMap<String, i64> {
    let mut out = std::collections::BTreeMap::new();
    let mut in_section = false;
    for line in text.lines() {
        if line.trim() == "=== REFINED CARGO TRACKING ===" {
            in_section = true;
            continue;
        }
        if in_section {
            if line.trim().is_empty() || line.trim_start().starts_with("===") {
                break;
            }
            if let Some((material, count)) = line.split_once(':') {
                if let Ok(n) = count.trim().parse::<i64>() {
                    out.insert(material.trim().to_string(), n);
                }
            }
        }
    }
    out
}

fn parse_mined_total(text: &str) -> i64 {
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("Mined Tons:") {
            if let Ok(n) = rest.trim().parse::<i64>() {
                return n;
            }
        }
    }
    0
}

fn replace_section(text: &str, header: &str, new_body: &str) -> String {
    let mut out = Vec::new();
    let mut lines = text.lines().peekable();
    let mut replaced = false;
    while let Some(line) = lines.next() {
        out.push(line.to_string());
        if line.trim() == header {
            replaced = true;
            while let Some(next) = lines.peek() {
                if next.trim().is_empty() || next.trim_start().starts_with("===") {
                    break;
                }
                lines.next();
            }
            out.push(new_body.trim_end().to_string());
        }
    }
    if !replaced {
        out.push(String::new());
        out.push(header.to_string());
        out.push(new_body.trim_end().to_string());
    }
    out.join("\n") + "\n"
}

fn replace_total_line(text: &str, new_total: i64) -> String {
    text.lines()
        .map(|line| {
            if line.starts_with("Total Tons:") {
                format!("Total Tons: {new_total}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        + "\n"
}

/// Merges manually-reported refinery quantities (materials still in the
/// refinery at stop time) into an already-persisted session report and its
/// CSV row. Both artifacts are rewritten to temp files and only renamed into
/// place once the CSV update is known to succeed, so they never diverge.
pub fn amend_refinery(
    paths: &SessionPaths,
    report_path: &Path,
    amendments: &[(String, i64)],
) -> Result<(), SessionError> {
    let timestamp = parse_timestamp_from_filename(report_path)?;
    let text = std::fs::read_to_string(report_path)?;

    let mut refined = parse_refined_section(&text);
    for (material, qty) in amendments {
        *refined.entry(material.clone()).or_insert(0) += qty;
    }

    let mined_total = parse_mined_total(&text);
    let refined_total: i64 = refined.values().sum();
    let new_total = mined_total + refined_total;

    let refined_body = refined.iter().map(|(m, c)| format!("{m}: {c}")).collect::<Vec<_>>().join("\n");
    let mut new_text = replace_section(&text, "=== REFINED CARGO TRACKING ===", &refined_body);
    new_text = replace_total_line(&new_text, new_total);

    let mut rows = read_csv_rows(&paths.csv_index_path)?;
    let row = rows
        .iter_mut()
        .find(|r| r.timestamp == timestamp)
        .ok_or_else(|| SessionError::MissingCsvRow(report_path.to_path_buf()))?;
    let mut combined = parse_mined_materials(&text);
    for (m, c) in &refined {
        *combined.entry(m.clone()).or_insert(0) += c;
    }
    row.total_tons = new_total;
    row.material_count = combined.iter().filter(|(_, v)| **v != 0).count();
    row.materials_breakdown = breakdown_string(&combined);

    // CSV write is the commit point: only rewrite the text file after it
    // succeeds, so a failed CSV write leaves the original report intact.
    write_csv_rows(&paths.csv_index_path, &rows)?;
    atomic_write(report_path, &new_text)?;
    Ok(())
}

fn parse_mined_materials(text: &str) -> std::collections::BTreeMap<String, i64> {
    let mut out = std::collections::BTreeMap::new();
    let mut in_section = false;
    for line in text.lines() {
        if line.trim() == "=== MATERIALS MINED ===" {
            in_section = true;
            continue;
        }
        if in_section {
            if line.trim().is_empty() || line.trim_start().starts_with("===") {
                break;
            }
            if let Some((material, count)) = line.split_once(':') {
                if let Ok(n) = count.trim().parse::<i64>() {
                    out.insert(material.trim().to_string(), n);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn sample_result() -> SessionResult {
        let mut materials_mined = BTreeMap::new();
        materials_mined.insert("Platinum".to_string(), 12);
        SessionResult {
            session_id: "11111111-1111-1111-1111-111111111111".to_string(),
            system: Some("Paesia".to_string()),
            body: "2 A Ring".to_string(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            duration_secs: 3600.0,
            materials_mined,
            refined_materials: BTreeMap::new(),
            total_tons: 12,
            tons_per_hour: Some(12.0),
            prospectors_used: 5,
            engineering_materials: BTreeMap::new(),
            hit_rate: Some(0.6),
            average_quality: Some(40.0),
            best_material: Some("Platinum".to_string()),
        }
    }

    #[test]
    fn write_session_creates_report_and_csv_row() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SessionPaths {
            reports_dir: dir.path().join("reports"),
            csv_index_path: dir.path().join("sessions.csv"),
        };
        let result = sample_result();
        write_session(&paths, &result).unwrap();

        let report_path = paths.reports_dir.join(report_filename(&result));
        assert!(report_path.exists());
        let text = std::fs::read_to_string(&report_path).unwrap();
        assert!(text.contains("Total Tons: 12"));
        assert!(text.contains("Platinum: 12"));

        let rows = read_csv_rows(&paths.csv_index_path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_tons, 12);
    }

    #[test]
    fn amend_refinery_merges_and_recomputes_total_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SessionPaths {
            reports_dir: dir.path().join("reports"),
            csv_index_path: dir.path().join("sessions.csv"),
        };
        let result = sample_result();
        write_session(&paths, &result).unwrap();
        let report_path = paths.reports_dir.join(report_filename(&result));

        amend_refinery(&paths, &report_path, &[("Platinum".to_string(), 4)]).unwrap();

        let text = std::fs::read_to_string(&report_path).unwrap();
        assert!(text.contains("Total Tons: 16"));
        assert!(text.contains("Platinum: 4"));

        let rows = read_csv_rows(&paths.csv_index_path).unwrap();
        assert_eq!(rows[0].total_tons, 16);
    }

    #[test]
    fn amend_refinery_fails_cleanly_without_a_matching_csv_row() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SessionPaths {
            reports_dir: dir.path().join("reports"),
            csv_index_path: dir.path().join("sessions.csv"),
        };
        let result = sample_result();
        let report_path = paths.reports_dir.join(report_filename(&result));
        atomic_write(&report_path, &render_report(&result)).unwrap();
        // No CSV row was ever written for this report.
        let before = std::fs::read_to_string(&report_path).unwrap();

        let err = amend_refinery(&paths, &report_path, &[("Platinum".to_string(), 4)]);
        assert!(err.is_err());

        let after = std::fs::read_to_string(&report_path).unwrap();
        assert_eq!(before, after, "report must be untouched when the CSV update fails");
    }
}
