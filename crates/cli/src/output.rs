// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! result.json and JUnit XML artifacts.

use avrlit_core::{CaseRecord, Outcome, Summary};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::error;

pub const RESULT_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Serialize)]
pub struct TargetReport {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunResult {
    pub result_schema_version: String,
    pub status: String,
    pub suite: String,
    pub target: TargetReport,
    pub summary: Summary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
    pub cases: Vec<CaseRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<PathBuf>,
}

pub fn write_result_json(path: &Path, result: &RunResult) {
    match std::fs::File::create(path) {
        Ok(f) => {
            if let Err(e) = serde_json::to_writer_pretty(f, result) {
                error!("Failed to write {:?}: {}", path, e);
            }
        }
        Err(e) => error!("Failed to create {:?}: {}", path, e),
    }
}

/// Writes result.json (and junit.xml) into `output_dir`, plus `junit` if given.
pub fn write_outputs(
    output_dir: Option<&Path>,
    junit: Option<&Path>,
    result: &RunResult,
    duration: Duration,
) {
    if let Some(dir) = output_dir {
        if let Err(e) = std::fs::create_dir_all(dir) {
            error!("Failed to create output directory {:?}: {}", dir, e);
        } else {
            write_result_json(&dir.join("result.json"), result);
            if let Err(e) = write_junit_xml(&dir.join("junit.xml"), result, duration) {
                error!("Failed to write junit.xml: {}", e);
            }
        }
    }

    if let Some(path) = junit {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = write_junit_xml(path, result, duration) {
            error!("Failed to write JUnit report {:?}: {}", path, e);
        }
    }
}

pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

pub fn write_junit_xml(path: &Path, result: &RunResult, duration: Duration) -> std::io::Result<()> {
    let time_secs = duration.as_secs_f64();
    let mut tests: u64 = 0;
    let mut failures: u64 = 0;
    let mut errors: u64 = 0;
    let mut testcases = String::new();

    // A run that never reached its cases (config, connect, handshake) is one errored testcase.
    if result.cases.is_empty() && result.status == "error" {
        tests += 1;
        errors += 1;
        testcases.push_str(&format!(
            "  <testcase classname=\"avrlit.{}\" name=\"run\" time=\"{:.6}\">\n",
            xml_escape(&result.suite),
            time_secs
        ));
        testcases.push_str(&format!(
            "    <error message=\"{}\">{}</error>\n",
            xml_escape("run error"),
            xml_escape(result.message.as_deref().unwrap_or(""))
        ));
        testcases.push_str("  </testcase>\n");
    }

    for case in &result.cases {
        tests += 1;
        let name = format!("{}({})", case.function, case.input);
        testcases.push_str(&format!(
            "  <testcase classname=\"avrlit.{}\" name=\"{}\" time=\"{:.6}\">\n",
            xml_escape(&result.suite),
            xml_escape(&name),
            case.duration_us as f64 / 1_000_000.0
        ));
        match &case.outcome {
            Outcome::Pass => {}
            Outcome::Fail { expected, actual } => {
                failures += 1;
                testcases.push_str(&format!(
                    "    <failure message=\"value mismatch\">{}</failure>\n",
                    xml_escape(&format!("expected {}, actual {}", expected, actual))
                ));
            }
            Outcome::Error { class, message } => {
                errors += 1;
                testcases.push_str(&format!(
                    "    <error message=\"{}\">{}</error>\n",
                    xml_escape(class.label()),
                    xml_escape(message)
                ));
            }
        }
        testcases.push_str("  </testcase>\n");
    }

    let mut xml = String::new();
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');
    xml.push_str(&format!(
        r#"<testsuite name="{}" tests="{}" failures="{}" errors="{}" time="{:.6}">"#,
        xml_escape(&result.suite),
        tests,
        failures,
        errors,
        time_secs
    ));
    xml.push('\n');
    xml.push_str("  <properties>\n");
    xml.push_str(&format!(
        "    <property name=\"result_schema_version\" value=\"{}\"/>\n",
        xml_escape(RESULT_SCHEMA_VERSION)
    ));
    xml.push_str(&format!(
        "    <property name=\"target_model\" value=\"{}\"/>\n",
        xml_escape(&result.target.model)
    ));
    if let Some(fp) = &result.target.fingerprint {
        xml.push_str(&format!(
            "    <property name=\"target_fingerprint\" value=\"{}\"/>\n",
            xml_escape(fp)
        ));
    }
    xml.push_str("  </properties>\n");
    xml.push_str(&testcases);
    xml.push_str("</testsuite>\n");

    std::fs::write(path, xml)
}
