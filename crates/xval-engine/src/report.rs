use crate::matrix::ResultMatrix;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const REPORT_SCHEMA_VERSION: &str = "1.0";

/// Totals section persisted in results.json.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepSummary {
    pub clients: usize,
    pub validators: usize,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

impl SweepSummary {
    pub fn of(matrix: &ResultMatrix) -> Self {
        Self {
            clients: matrix.len(),
            validators: matrix.validators().len(),
            total: matrix.cell_count(),
            passed: matrix.passed_count(),
            failed: matrix.failed_count(),
        }
    }
}

/// Canonical sweep artifact written for CI consumption.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SweepReport {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub summary: SweepSummary,
    pub results: ResultMatrix,
}

impl SweepReport {
    pub fn new(matrix: ResultMatrix) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            summary: SweepSummary::of(&matrix),
            results: matrix,
        }
    }
}

/// Write results.json in pretty JSON format.
pub fn write_sweep_report_json(path: &Path, report: &SweepReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize sweep report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render a markdown summary for CI job output.
///
/// One row per client, one column per validator. Cells read `pass`,
/// `fail (exit N)` or `error`; failures are listed below the table.
pub fn render_summary_md(report: &SweepReport) -> String {
    let matrix = &report.results;
    let validators = matrix.validators();
    let s = &report.summary;

    let mut out = String::new();
    out.push_str("# Validation Summary\n\n");
    out.push_str(&format!(
        "- pairs: {}\n- passed: {}\n- failed: {}\n\n",
        s.total, s.passed, s.failed
    ));

    out.push_str("| client |");
    for v in &validators {
        out.push_str(&format!(" {} |", v));
    }
    out.push('\n');
    out.push_str("|---|");
    for _ in &validators {
        out.push_str("---|");
    }
    out.push('\n');

    for client in matrix.clients() {
        out.push_str(&format!("| {} |", client));
        for v in &validators {
            let cell = match matrix.get(client, v) {
                Some(verdict) if verdict.passed() => "pass".to_string(),
                Some(verdict) if verdict.error.is_some() => "error".to_string(),
                Some(verdict) => match verdict.exit_code {
                    Some(code) => format!("fail (exit {})", code),
                    None => "fail".to_string(),
                },
                None => "-".to_string(),
            };
            out.push_str(&format!(" {} |", cell));
        }
        out.push('\n');
    }

    let errors: Vec<_> = matrix
        .failures()
        .filter_map(|(c, v, verdict)| verdict.error.as_ref().map(|e| (c, v, e)))
        .collect();
    if !errors.is_empty() {
        out.push_str("\n## Errors\n");
        for (client, validator, error) in errors {
            out.push_str(&format!("- `{}` × `{}`: {}\n", client, validator, error));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::{RunError, RunVerdict, Stage};
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .expect("parse RFC3339")
            .with_timezone(&Utc)
            + chrono::Duration::seconds(secs)
    }

    fn matrix() -> ResultMatrix {
        let mut m = ResultMatrix::new();
        m.record("besu", "rpc", RunVerdict::completed(at(0), at(3), 0, None))
            .unwrap();
        m.record("besu", "sync", RunVerdict::completed(at(0), at(9), 1, None))
            .unwrap();
        m.record(
            "geth",
            "rpc",
            RunVerdict::failed(
                at(0),
                at(30),
                RunError::Timeout {
                    stage: Stage::Readiness,
                    limit_ms: 30_000,
                },
                None,
            ),
        )
        .unwrap();
        m.record("geth", "sync", RunVerdict::completed(at(0), at(4), 0, None))
            .unwrap();
        m
    }

    #[test]
    fn sweep_report_schema_has_expected_keys() {
        let report = SweepReport::new(matrix());
        let raw = serde_json::to_value(&report).expect("serialize report");
        let obj = raw.as_object().expect("report object");

        assert!(obj.contains_key("schema_version"));
        assert!(obj.contains_key("generated_at"));
        assert!(obj.contains_key("summary"));
        assert!(obj.contains_key("results"));
        assert_eq!(raw["summary"]["total"], json!(4));
        assert_eq!(raw["summary"]["passed"], json!(2));
        assert_eq!(raw["summary"]["validators"], json!(2));
        assert_eq!(raw["results"]["geth"]["rpc"]["error"]["kind"], json!("timeout"));
    }

    #[test]
    fn summary_markdown_render_is_stable() {
        let actual = render_summary_md(&SweepReport::new(matrix()));
        let expected = "# Validation Summary\n\n- pairs: 4\n- passed: 2\n- failed: 2\n\n\
| client | rpc | sync |\n|---|---|---|\n\
| besu | pass | fail (exit 1) |\n\
| geth | error | pass |\n\
\n## Errors\n- `geth` × `rpc`: readiness wait timed out after 30000ms\n";
        assert_eq!(actual, expected);
    }

    #[test]
    fn write_report_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("results.json");
        let report = SweepReport::new(matrix());

        write_sweep_report_json(&path, &report).unwrap();
        let back: SweepReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, report);
    }
}
