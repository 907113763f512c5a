// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// External engine adapter that runs a converter binary (Calibre's
// `ebook-convert` by default) as a subprocess.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use umbruch_core::config::EngineConfig;
use umbruch_core::{Result, UmbruchError};

use super::{ConversionEngine, EngineRun};

/// Budget for the `--version` availability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs `program <input> <output> [extra args] [--language tag]`.
#[derive(Debug, Clone)]
pub struct ExternalCommandEngine {
    program: String,
    extra_args: Vec<String>,
}

impl ExternalCommandEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            program: config.program.clone(),
            extra_args: config.extra_args.clone(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Version string reported by the program, if it runs at all.
    pub async fn version(&self) -> Option<String> {
        let mut command = Command::new(&self.program);
        command
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let output = match tokio::time::timeout(PROBE_TIMEOUT, command.output()).await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => {
                debug!(program = %self.program, status = %output.status, "Version probe failed");
                return None;
            }
            Ok(Err(err)) => {
                debug!(program = %self.program, error = %err, "Engine program not found");
                return None;
            }
            Err(_) => {
                debug!(program = %self.program, "Version probe timed out");
                return None;
            }
        };
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }

    fn command(&self, input: &Path, output: &Path, language: Option<&str>) -> Command {
        let mut command = Command::new(&self.program);
        command.arg(input).arg(output).args(&self.extra_args);
        if let Some(language) = language {
            command.arg("--language").arg(language);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl ConversionEngine for ExternalCommandEngine {
    fn name(&self) -> &str {
        &self.program
    }

    async fn is_available(&self) -> bool {
        self.version().await.is_some()
    }

    #[instrument(skip(self), fields(program = %self.program))]
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        language: Option<&str>,
        timeout: Duration,
    ) -> Result<EngineRun> {
        let started = Instant::now();
        let child = self
            .command(input, output, language)
            .spawn()
            .map_err(|e| UmbruchError::FallbackInvocation(format!("failed to start {}: {}", self.program, e)))?;

        // Dropping the future on timeout kills the child.
        let result = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(budget = ?timeout, "External engine timed out and was killed");
                return Err(UmbruchError::FallbackInvocation(format!(
                    "{} did not finish within {:?}",
                    self.program, timeout
                )));
            }
        };
        let finished = result
            .map_err(|e| UmbruchError::FallbackInvocation(format!("{} failed: {}", self.program, e)))?;

        let stdout = String::from_utf8_lossy(&finished.stdout);
        let stderr = String::from_utf8_lossy(&finished.stderr);
        let warnings = count_warnings(&stdout) + count_warnings(&stderr);

        if !finished.status.success() {
            let detail = stderr.lines().rev().find(|line| !line.trim().is_empty()).unwrap_or_default();
            return Err(UmbruchError::FallbackInvocation(format!(
                "{} exited with {}: {}",
                self.program,
                finished.status,
                detail.trim()
            )));
        }

        let bytes = tokio::fs::metadata(output).await.map(|m| m.len()).unwrap_or(0);
        if bytes == 0 {
            return Err(UmbruchError::FallbackInvocation(format!(
                "{} reported success but wrote no output to {}",
                self.program,
                output.display()
            )));
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(bytes, warnings, elapsed_ms, "External engine finished");
        Ok(EngineRun {
            output: output.to_path_buf(),
            bytes,
            warnings,
            elapsed_ms,
        })
    }
}

/// Lines mentioning a warning, case-insensitively.
fn count_warnings(text: &str) -> usize {
    text.lines()
        .filter(|line| line.to_ascii_uppercase().contains("WARNING"))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(program: &str, extra_args: &[&str]) -> ExternalCommandEngine {
        ExternalCommandEngine::new(&EngineConfig {
            program: program.into(),
            extra_args: extra_args.iter().map(|a| a.to_string()).collect(),
            timeout_secs: 5,
        })
    }

    #[test]
    fn warnings_are_counted_per_line() {
        let log = "Converting...\nWARNING: font missing\nwarning: bad xref\nDone\n";
        assert_eq!(count_warnings(log), 2);
    }

    #[test]
    fn default_engine_is_ebook_convert() {
        let engine = ExternalCommandEngine::new(&EngineConfig::default());
        assert_eq!(engine.name(), "ebook-convert");
        assert!(engine.extra_args.contains(&"--enable-heuristics".to_string()));
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let engine = engine("umbruch-no-such-converter", &[]);
        assert!(!engine.is_available().await);
        let dir = tempfile::tempdir().expect("temp dir");
        let result = engine
            .convert(Path::new("in.pdf"), &dir.path().join("out.epub"), None, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(UmbruchError::FallbackInvocation(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_fails() {
        let dir = tempfile::tempdir().expect("temp dir");
        let result = engine("false", &[])
            .convert(Path::new("in.pdf"), &dir.path().join("out.epub"), None, Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(UmbruchError::FallbackInvocation(_))));
    }

    /// `sh <script> <output> ...` runs the script with the output path as `$1`.
    #[cfg(unix)]
    #[tokio::test]
    async fn successful_run_reports_output_and_warnings() {
        let dir = tempfile::tempdir().expect("temp dir");
        let script = dir.path().join("convert.sh");
        std::fs::write(&script, "echo 'WARNING: heuristics applied'\nprintf 'epub' > \"$1\"\n")
            .expect("write script");
        let output = dir.path().join("book.epub");

        let run = engine("sh", &[])
            .convert(&script, &output, Some("en"), Duration::from_secs(5))
            .await
            .expect("conversion succeeds");
        assert_eq!(run.bytes, 4);
        assert_eq!(run.warnings, 1);
        assert_eq!(run.output, output);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn empty_output_fails() {
        let dir = tempfile::tempdir().expect("temp dir");
        let script = dir.path().join("convert.sh");
        std::fs::write(&script, ": > \"$1\"\n").expect("write script");
        let result = engine("sh", &[])
            .convert(&script, &dir.path().join("book.epub"), None, Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(UmbruchError::FallbackInvocation(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_engine_is_killed_at_the_timeout() {
        let dir = tempfile::tempdir().expect("temp dir");
        let script = dir.path().join("convert.sh");
        std::fs::write(&script, "sleep 30\n").expect("write script");
        let started = Instant::now();
        let result = engine("sh", &[])
            .convert(&script, &dir.path().join("book.epub"), None, Duration::from_millis(300))
            .await;
        assert!(matches!(result, Err(UmbruchError::FallbackInvocation(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
