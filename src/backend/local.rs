//! Local evaluation: run the guardrail script and read the decision it
//! leaves next to the passport.
//!
//! The script receives the tool name and the JSON context as its two
//! arguments. `OPENCLAW_PASSPORT_FILE` points at the passport and
//! `OPENCLAW_DECISION_FILE` at a per-invocation artifact path. Scripts that
//! predate the per-invocation file write `decision.json` into the passport
//! directory instead; that file is only trusted if it was written after the
//! script started.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant, SystemTime};

use serde_json::{Value, json};

use super::Verdict;
use crate::config::ENV_PASSPORT_FILE;
use crate::eval::{Decision, ErrorCode, Reason};
use crate::validate::{resolve_lenient, sanitize_log_value};

pub const DECISION_FILE_ENV: &str = "OPENCLAW_DECISION_FILE";
pub const LEGACY_DECISION_FILE: &str = "decision.json";

/// Artifacts larger than this are ignored.
const MAX_ARTIFACT_BYTES: u64 = 1024 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// Tolerance for coarse filesystem timestamps when judging `decision.json`.
const MTIME_SLACK: Duration = Duration::from_secs(1);

/// One guardrail-script invocation. All paths must already be validated.
#[derive(Debug)]
pub struct LocalBackend<'a> {
    pub script: &'a Path,
    pub passport: &'a Path,
    pub timeout: Duration,
}

impl LocalBackend<'_> {
    pub fn evaluate(&self, tool: &str, context: &Value) -> Decision {
        let passport = match resolve_lenient(self.passport) {
            Ok(p) => p,
            Err(e) => {
                return Decision::deny(
                    ErrorCode::EvaluatorError,
                    format!("Cannot resolve passport path: {e}"),
                );
            }
        };
        let data_dir = passport
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        let artifact = data_dir.join(format!("decision-{}.json", uuid::Uuid::new_v4().simple()));

        let mut cmd = Command::new(self.script);
        cmd.arg(tool)
            .arg(context.to_string())
            .env(ENV_PASSPORT_FILE, &passport)
            .env(DECISION_FILE_ENV, &artifact)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if data_dir.is_dir() {
            cmd.current_dir(&data_dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        log::debug!(
            "running {} for tool {}",
            self.script.display(),
            sanitize_log_value(tool, "tool")
        );
        let started = SystemTime::now();
        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return Decision::deny(
                    ErrorCode::EvaluatorError,
                    format!("Failed to start guardrail script {}: {e}", self.script.display()),
                );
            }
        };

        let status = match wait_with_timeout(child, self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                log::warn!("guardrail script timed out after {:?}", self.timeout);
                let _ = fs::remove_file(&artifact);
                return Decision::deny(
                    ErrorCode::EvaluatorError,
                    format!(
                        "Guardrail script timed out after {} seconds",
                        self.timeout.as_secs()
                    ),
                );
            }
            Err(e) => {
                return Decision::deny(
                    ErrorCode::EvaluatorError,
                    format!("Failed waiting for guardrail script: {e}"),
                );
            }
        };

        let verdict = read_artifact(&artifact, &data_dir.join(LEGACY_DECISION_FILE), started);
        let _ = fs::remove_file(&artifact);

        match verdict {
            Some(v) => v.into_decision(),
            None => {
                let code = status.code();
                Decision::denied(
                    Reason::new(
                        ErrorCode::EvaluatorError,
                        format!(
                            "Guardrail script exited with {} without writing a readable decision",
                            describe(status)
                        ),
                    )
                    .with_details(json!({ "exit_code": code })),
                )
            }
        }
    }
}

/// `Ok(None)` means the deadline passed; the child has been killed and reaped.
/// A timeout too large to represent as an instant never expires.
fn wait_with_timeout(mut child: Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now().checked_add(timeout);
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) if deadline.is_some_and(|d| Instant::now() >= d) => {
                terminate(&mut child);
                return Ok(None);
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => {
                terminate(&mut child);
                return Err(e);
            }
        }
    }
}

/// Kill the script and anything it started. The child leads its own
/// process group on unix, so the whole group is signalled.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = i32::try_from(child.id()) {
            // SAFETY: plain syscall on a process group this evaluator created.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn describe(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("status {code}"),
        None => status.to_string(),
    }
}

fn read_artifact(per_call: &Path, legacy: &Path, started: SystemTime) -> Option<Verdict> {
    if let Some(v) = read_verdict(per_call) {
        return Some(v);
    }
    let fresh = fs::metadata(legacy)
        .and_then(|m| m.modified())
        .is_ok_and(|modified| modified + MTIME_SLACK >= started);
    if !fresh {
        if legacy.exists() {
            log::debug!("ignoring stale {}", legacy.display());
        }
        return None;
    }
    read_verdict(legacy)
}

fn read_verdict(path: &Path) -> Option<Verdict> {
    let meta = fs::metadata(path).ok()?;
    if !meta.is_file() || meta.len() > MAX_ARTIFACT_BYTES {
        return None;
    }
    let bytes = fs::read(path).ok()?;
    let verdict = Verdict::from_slice(&bytes);
    if verdict.is_none() {
        log::debug!("unparseable decision artifact {}", path.display());
    }
    verdict
}
