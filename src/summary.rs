use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{json, Value};

use crate::rest::CheckOutcome;

/// Per-credential result of a check run. Holds only the redacted form of the
/// credential.
pub struct CheckReport {
    pub index: usize,
    pub credential: String,
    pub outcome: CheckOutcome,
}

fn outcome_line(report: &CheckReport) -> String {
    match &report.outcome {
        CheckOutcome::Valid(identity) => {
            format!(
                "Session {}: {} (ID: {})",
                report.index,
                identity.tag(),
                identity.id
            )
        }
        CheckOutcome::Invalid => {
            format!("Session {}: invalid or expired credential", report.index)
        }
        CheckOutcome::RateLimited => format!("Session {}: rate limited", report.index),
        CheckOutcome::Failed(message) => format!("Session {}: {message}", report.index),
    }
}

/// Prints the end-of-run summary for check mode.
pub fn print_summary(reports: &[CheckReport]) {
    if reports.is_empty() {
        println!("No credentials checked.");
        return;
    }

    let valid = reports.iter().filter(|r| r.outcome.is_valid()).count();
    let failed = reports.len() - valid;
    let rate = valid as f64 / reports.len() as f64 * 100.0;

    println!();
    println!("{}", "=".repeat(50));
    println!("CREDENTIAL CHECK SUMMARY");
    println!("{}", "=".repeat(50));
    println!("Total:      {}", reports.len());
    println!("Valid:      {valid}");
    println!("Failed:     {failed}");
    println!("Success:    {rate:.1}%");
    println!("{}", "=".repeat(50));

    if valid > 0 {
        println!();
        println!("VALID CREDENTIALS:");
        println!("{}", "-".repeat(30));
        for report in reports.iter().filter(|r| r.outcome.is_valid()) {
            println!("{}", outcome_line(report));
        }
    }

    if failed > 0 {
        println!();
        println!("FAILED CREDENTIALS ({failed}):");
        println!("{}", "-".repeat(30));
        for report in reports.iter().filter(|r| !r.outcome.is_valid()) {
            println!("{} [{}]", outcome_line(report), report.credential);
        }
    }

    println!("{}", "=".repeat(50));
    println!();
}

fn report_value(report: &CheckReport) -> Value {
    let (status, detail) = match &report.outcome {
        CheckOutcome::Valid(identity) => (
            "valid",
            json!({ "id": identity.id, "tag": identity.tag() }),
        ),
        CheckOutcome::Invalid => ("invalid", Value::Null),
        CheckOutcome::RateLimited => ("rate_limited", Value::Null),
        CheckOutcome::Failed(message) => ("failed", json!(message)),
    };
    json!({
        "session": report.index,
        "credential": report.credential,
        "status": status,
        "detail": detail,
    })
}

/// Saves check results to a timestamped JSON file under `dir` and returns
/// its path. Credentials appear only in their redacted form.
pub fn write_report_file(dir: &Path, reports: &[CheckReport]) -> std::io::Result<PathBuf> {
    let name = format!("check_results_{}.json", Utc::now().format("%Y%m%d_%H%M%S"));
    let path = dir.join(name);
    let body = Value::Array(reports.iter().map(report_value).collect());
    std::fs::write(&path, serde_json::to_string_pretty(&body)?)?;
    Ok(path)
}
