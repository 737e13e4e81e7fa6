//! Output formatting for mm-conformance CLI
//!
//! Provides human-readable and JSON output formatting for all commands.

use serde::Serialize;

use mm_conformance::report::{SweepEntry, SweepSummary, Verdict, VerificationReport};
use mm_conformance::synth::ProgramText;

/// Format a single verification report
pub fn format_report(report: &VerificationReport, verbose: bool) -> String {
    let mut out = String::new();

    match &report.verdict {
        Verdict::Pass => {
            out.push_str(&format!("\x1b[32m✓ pass\x1b[0m {}\n", report.path));
        }
        Verdict::Fail {
            total_failures,
            failing_invocations,
        } => {
            out.push_str(&format!("\x1b[31m✗ fail\x1b[0m {}\n", report.path));
            out.push_str(&format!(
                "  {} failing invocation(s)\n",
                total_failures
            ));
            if verbose && !failing_invocations.is_empty() {
                let sample: Vec<String> =
                    failing_invocations.iter().map(|i| i.to_string()).collect();
                out.push_str(&format!("  first: {}\n", sample.join(", ")));
            }
        }
        Verdict::Skip { reason } => {
            out.push_str(&format!("\x1b[33m○ skip\x1b[0m {}\n", report.path));
            out.push_str(&format!("  unsupported: {}\n", reason));
        }
    }

    out.push_str(&format!(
        "  {} invocations × {} rounds × {} iterations on {}\n",
        report.invocation_count, report.rounds, report.iterations_per_round, report.backend
    ));
    if verbose {
        out.push_str(&format!("  digest: {}\n", report.digest));
        out.push_str(&format!("  started: {}\n", report.started_at));
    }
    out.push_str(&format!("  elapsed: {} ms\n", report.elapsed_ms));
    out
}

/// Format a sweep summary; passing entries are only listed when verbose
pub fn format_summary(summary: &SweepSummary, verbose: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "\x1b[1mSweep {}\x1b[0m: {} configuration(s) in {} ms\n",
        summary.run_id,
        summary.total(),
        summary.elapsed_ms
    ));
    out.push_str(&format!(
        "  passed: {}  failed: {}  skipped: {}  fatal: {}\n",
        summary.passed, summary.failed, summary.skipped, summary.fatal
    ));

    let listed: Vec<&SweepEntry> = summary
        .entries
        .iter()
        .filter(|entry| verbose || entry.outcome != "pass")
        .collect();
    if !listed.is_empty() {
        out.push('\n');
        for entry in listed {
            let marker = match entry.outcome.as_str() {
                "pass" => "\x1b[32m✓\x1b[0m",
                "skip" => "\x1b[33m○\x1b[0m",
                _ => "\x1b[31m✗\x1b[0m",
            };
            out.push_str(&format!("{} {} {}", marker, entry.outcome, entry.path));
            if let Some(detail) = &entry.detail {
                out.push_str(&format!(" ({})", detail));
            }
            out.push('\n');
        }
    }
    out
}

/// Format a synthesized program with a short header
pub fn format_program(text: &ProgramText, verbose: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!("// {} ({})\n", text.name, text.stage.token()));
    if verbose {
        out.push_str(&format!("// digest: {}\n", text.digest()));
        out.push_str(&format!(
            "// specialization: dim = {}, workgroups = {}\n",
            text.specialization.dim, text.specialization.workgroups_per_dim
        ));
        for binding in &text.bindings {
            match binding.slot {
                Some(slot) => out.push_str(&format!(
                    "// binding {}: {} ({:?})\n",
                    slot, binding.name, binding.kind
                )),
                None => out.push_str(&format!(
                    "// unbound: {} ({:?})\n",
                    binding.name, binding.kind
                )),
            }
        }
    }
    out.push_str(&text.source);
    if let Some(aux) = &text.auxiliary {
        out.push_str("\n// auxiliary vertex program\n");
        out.push_str(aux);
    }
    out
}

/// Format an error for display
pub fn format_error(error: &anyhow::Error, json_output: bool) -> String {
    if json_output {
        #[derive(Serialize)]
        struct ErrorJson {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            cause: Option<String>,
        }

        let err = ErrorJson {
            error: error.to_string(),
            cause: error.chain().nth(1).map(|e| e.to_string()),
        };
        let mut out = serde_json::to_string_pretty(&err).unwrap_or_else(|_| "{}".to_string());
        out.push('\n');
        out
    } else {
        let mut out = format!("\x1b[31mError:\x1b[0m {}\n", error);
        let mut causes = error.chain().skip(1).peekable();
        if causes.peek().is_some() {
            out.push_str("Caused by:\n");
            for (idx, cause) in causes.enumerate() {
                out.push_str(&format!("  {}: {}\n", idx + 1, cause));
            }
        }
        out
    }
}
