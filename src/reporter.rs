use std::fmt::Write as _;

use serde::Serialize;

use crate::errors::ReportError;
use crate::result::TestResult;

/// The one set of numbers both `report.json` and `report.html` are built
/// from, so they can never disagree (§8 P8).
#[derive(Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// One-decimal percentage string, or `"n/a"` when `total == 0`.
    pub success_rate: String,
}

impl ReportSummary {
    pub fn from_results(results: &[TestResult]) -> ReportSummary {
        let total = results.len();
        let passed = results.iter().filter(|r| r.success).count();
        let failed = total - passed;
        let success_rate = if total == 0 {
            "n/a".to_string()
        } else {
            format!("{:.1}", (passed as f64 / total as f64) * 100.0)
        };
        ReportSummary {
            total,
            passed,
            failed,
            success_rate,
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    summary: &'a ReportSummary,
    results: &'a [TestResult],
}

/// Writes `report.json` and `report.html` from one shared summary,
/// matching the teacher's own `Display`-impl string-building style for
/// the HTML side rather than reaching for a templating crate.
pub struct Reporter;

impl Reporter {
    pub async fn write(
        results: &[TestResult],
        json_path: &std::path::Path,
        html_path: &std::path::Path,
    ) -> Result<(), ReportError> {
        let summary = ReportSummary::from_results(results);

        let json = JsonReport {
            summary: &summary,
            results,
        };
        let body = serde_json::to_vec_pretty(&json)
            .map_err(|error| ReportError::SerializationFailure { error })?;
        write_atomic(json_path, &body).await?;

        let html = render_html(&summary, results);
        write_atomic(html_path, html.as_bytes()).await?;

        Ok(())
    }
}

async fn write_atomic(path: &std::path::Path, bytes: &[u8]) -> Result<(), ReportError> {
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|error| ReportError::WriteFailure {
        path: path.to_path_buf(),
        error,
    })?;
    tokio::fs::write(tmp.path(), bytes)
        .await
        .map_err(|error| ReportError::WriteFailure {
            path: path.to_path_buf(),
            error,
        })?;
    tmp.persist(path).map_err(|error| ReportError::WriteFailure {
        path: path.to_path_buf(),
        error: error.error,
    })?;
    Ok(())
}

fn render_html(summary: &ReportSummary, results: &[TestResult]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "<!doctype html>");
    let _ = writeln!(out, "<html><head><meta charset=\"utf-8\"><title>Panoptic report</title></head><body>");
    let _ = writeln!(out, "<h1>Panoptic report</h1>");
    let _ = writeln!(
        out,
        "<p>applications: {} · passed: {} · failed: {} · success rate: {}</p>",
        summary.total, summary.passed, summary.failed, summary.success_rate
    );
    let _ = writeln!(out, "<table border=\"1\" cellpadding=\"4\">");
    let _ = writeln!(
        out,
        "<tr><th>Application</th><th>Kind</th><th>Status</th><th>Duration (ms)</th><th>Actions</th><th>Artifacts</th></tr>"
    );
    for result in results {
        let status_color = if result.success { "green" } else { "red" };
        let status_text = if result.success { "passed" } else { "failed" };
        let _ = writeln!(out, "<tr>");
        let _ = writeln!(out, "<td>{}</td>", escape(&result.app_name));
        let _ = writeln!(out, "<td>{}</td>", result.app_kind);
        let _ = writeln!(
            out,
            "<td style=\"color:{status_color}\">{status_text}</td>"
        );
        let _ = writeln!(out, "<td>{}</td>", result.duration_ms());
        let _ = writeln!(out, "<td><ul>");
        for action in &result.action_outcomes {
            let (color, label) = if action.success {
                ("green", "ok".to_string())
            } else {
                ("red", escape(&action.error))
            };
            let _ = writeln!(
                out,
                "<li style=\"color:{color}\">{} ({}): {}</li>",
                escape(&action.name),
                escape(&action.type_),
                label
            );
        }
        let _ = writeln!(out, "</ul></td>");
        let _ = writeln!(out, "<td>{}</td>", render_artifacts(result));
        let _ = writeln!(out, "</tr>");
    }
    let _ = writeln!(out, "</table>");
    let _ = writeln!(out, "</body></html>");
    out
}

/// Lists screenshots (embedded) and videos (linked) for one application's
/// row, per §4.10's "embedded (or linked) screenshots, and a link to each
/// video" requirement.
fn render_artifacts(result: &TestResult) -> String {
    if result.screenshots.is_empty() && result.videos.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    let _ = write!(out, "<ul>");
    for screenshot in &result.screenshots {
        let href = escape(screenshot);
        let _ = write!(
            out,
            "<li><img src=\"{href}\" alt=\"{href}\" width=\"160\"></li>"
        );
    }
    for video in &result.videos {
        let href = escape(video);
        let _ = write!(out, "<li><a href=\"{href}\">{href}</a></li>");
    }
    let _ = write!(out, "</ul>");
    out
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApplicationKind;
    use time::OffsetDateTime;

    fn result(success: bool) -> TestResult {
        TestResult {
            app_name: "a".into(),
            app_kind: ApplicationKind::Web,
            start_time: OffsetDateTime::UNIX_EPOCH,
            end_time: OffsetDateTime::UNIX_EPOCH,
            screenshots: vec![],
            videos: vec![],
            metrics: Default::default(),
            success,
            error: if success { String::new() } else { "boom".into() },
            action_outcomes: vec![],
        }
    }

    #[test]
    fn success_rate_is_na_for_zero_total() {
        let summary = ReportSummary::from_results(&[]);
        assert_eq!(summary.success_rate, "n/a");
    }

    #[test]
    fn success_rate_has_one_decimal() {
        let summary = ReportSummary::from_results(&[result(true), result(false)]);
        assert_eq!(summary.success_rate, "50.0");
        assert_eq!(summary.total, 2);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn html_escapes_user_controlled_text() {
        let html = render_html(&ReportSummary::from_results(&[]), &[]);
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn html_links_screenshots_and_videos() {
        let mut r = result(true);
        r.screenshots.push("screenshots/a_shot.png".into());
        r.videos.push("videos/a_rec.mp4".into());
        let html = render_html(&ReportSummary::from_results(&[r.clone()]), &[r]);
        assert!(html.contains("screenshots/a_shot.png"));
        assert!(html.contains("videos/a_rec.mp4"));
    }
}
