use std::io::Write;
use std::path::Path;

use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};

use crate::eval::Decision;
use crate::validate::sanitize_log_value;

/// Audit log location relative to the home directory.
pub const AUDIT_LOG: &str = ".local/share/aport-guardrails/decisions.log";

/// Route `log` records to stderr; stdout carries the decision document.
/// Calling this twice is harmless (the second call is ignored).
pub fn init(level: LevelFilter) {
    let config = ConfigBuilder::new()
        .set_time_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .build();
    let _ = TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Never);
}

/// One tab-separated audit line: timestamp, verdict, request id, tool, codes.
pub fn audit_line(tool: &str, decision: &Decision) -> String {
    let tool = sanitize_log_value(tool, "tool").replace(['\t', '\n'], " ");
    let codes = decision.codes().join(",");
    format!(
        "{ts}\t{verdict}\t{rid}\t{tool}\t{codes}",
        ts = decision.timestamp(),
        verdict = decision.as_str(),
        rid = decision.request_id(),
    )
}

/// Append a decision record to ~/.local/share/aport-guardrails/decisions.log.
/// Best-effort: failures are silently ignored (logging must never block the hook).
pub fn log_decision(home: &Path, tool: &str, decision: &Decision) {
    let log_path = home.join(AUDIT_LOG);
    if let Some(dir) = log_path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    else {
        return;
    };
    let _ = writeln!(file, "{}", audit_line(tool, decision));
}
