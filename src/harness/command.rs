use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::timing::TimingParser;
use super::{MeasureRequest, Measurement, MeasurementHarness};
use crate::config::{CommandSpec, HarnessConfig};
use crate::error::HarnessError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Subprocess build/link/run pipeline.
///
/// Each request is written as JSON to `<work_dir>/<label>.json`; the
/// configured commands receive that path through the `{input}` placeholder.
/// Build and link steps fail on a non-zero exit status. The run step also
/// fails when it writes anything to stderr, and its stdout is scanned for
/// timing lines.
#[derive(Debug)]
pub struct CommandHarness {
    config: HarnessConfig,
    timing: TimingParser,
    timeout: Option<Duration>,
}

struct StepOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

impl CommandHarness {
    pub fn new(config: HarnessConfig) -> Result<Self, HarnessError> {
        if config.run.program.is_empty() {
            return Err(HarnessError::MissingRunCommand);
        }
        let timing = TimingParser::new(&config.timing_pattern)?;
        let timeout = config.timeout_secs.map(Duration::from_secs);
        Ok(Self {
            config,
            timing,
            timeout,
        })
    }

    /// Override the per-step limit from the config.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    fn write_request(&self, request: &MeasureRequest<'_>) -> Result<PathBuf, HarnessError> {
        let dir = &self.config.work_dir;
        fs::create_dir_all(dir).map_err(|source| HarnessError::Io {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(format!("{}.json", request.label));
        let json = serde_json::to_vec_pretty(request).map_err(|e| HarnessError::Io {
            path: path.clone(),
            source: e.into(),
        })?;
        fs::write(&path, json).map_err(|source| HarnessError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    fn expand(&self, arg: &str, input: &Path) -> String {
        arg.replace("{input}", &input.to_string_lossy())
            .replace("{work_dir}", &self.config.work_dir.to_string_lossy())
    }

    /// Run one command to completion, killing it on timeout.
    fn execute(&self, stage: &str, spec: &CommandSpec, input: &Path) -> Result<StepOutput, HarnessError> {
        let args: Vec<String> = spec.args.iter().map(|a| self.expand(a, input)).collect();
        debug!("{}: {} {}", stage, spec.program, args.join(" "));

        let io_error = |source| HarnessError::Io {
            path: PathBuf::from(&spec.program),
            source,
        };
        let mut child = Command::new(&spec.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(io_error)?;

        // Drain both pipes while waiting so a chatty child cannot block.
        let stdout = child.stdout.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                buf
            })
        });
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                buf
            })
        });

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().map_err(io_error)? {
                break status;
            }
            if let Some(limit) = self.timeout {
                let elapsed = start.elapsed();
                if elapsed >= limit {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(HarnessError::Timeout {
                        stage: stage.to_string(),
                        elapsed,
                    });
                }
            }
            thread::sleep(POLL_INTERVAL);
        };

        let collect = |handle: Option<thread::JoinHandle<Vec<u8>>>| {
            let bytes = handle.and_then(|h| h.join().ok()).unwrap_or_default();
            String::from_utf8_lossy(&bytes).into_owned()
        };
        Ok(StepOutput {
            status,
            stdout: collect(stdout),
            stderr: collect(stderr),
        })
    }

    fn build_step(&self, stage: &str, spec: &CommandSpec, input: &Path) -> Result<(), HarnessError> {
        let out = self.execute(stage, spec, input)?;
        if !out.status.success() {
            return Err(HarnessError::BuildFailed {
                stage: stage.to_string(),
                status: out.status.to_string(),
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

impl MeasurementHarness for CommandHarness {
    fn measure(&mut self, request: &MeasureRequest<'_>) -> Result<Measurement, HarnessError> {
        let input = self.write_request(request)?;
        for spec in &self.config.build {
            self.build_step("build", spec, &input)?;
        }
        if let Some(link) = &self.config.link {
            self.build_step("link", link, &input)?;
        }

        let out = self.execute("run", &self.config.run, &input)?;
        if !out.status.success() || !out.stderr.trim().is_empty() {
            warn!("{}: run step failed with {}", request.label, out.status);
            return Err(HarnessError::RunFailed {
                status: out.status.to_string(),
                stderr: out.stderr.trim().to_string(),
            });
        }
        let measurement = self.timing.parse(&out.stdout)?;
        info!(
            "{}: avg {:.4} (min {:.4}, max {:.4})",
            request.label, measurement.avg, measurement.min, measurement.max
        );
        Ok(measurement)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::ir::{DType, FunctionBuilder, OpRef, Type};
    use crate::schedule::StreamSchedule;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    fn measure(config: HarnessConfig) -> Result<Measurement, HarnessError> {
        let ty = Type::tensor(vec![4], DType::F32);
        let mut b = FunctionBuilder::new("f");
        let x = b.param("x", ty.clone());
        let a = b.call(OpRef::new("neg"), vec![x], ty);
        let func = b.finish(a);
        let schedule = StreamSchedule::serial(&func);
        let request = MeasureRequest {
            label: "step_0".to_string(),
            function: &func,
            schedule: &schedule,
        };
        CommandHarness::new(config)?.measure(&request)
    }

    #[test]
    fn test_run_output_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig::default()
            .with_work_dir(dir.path())
            .with_build_step(sh("test -f {input}"))
            .with_run(sh("echo 'time: 1.50'; echo 'time: 2.50'"));
        let m = measure(config).unwrap();
        assert_eq!(m.avg, 2.0);
        assert!(dir.path().join("step_0.json").exists());
    }

    #[test]
    fn test_failed_build_stops_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig::default()
            .with_work_dir(dir.path())
            .with_build_step(sh("echo 'no compiler' >&2; exit 3"))
            .with_run(sh("echo 'time: 1.0'"));
        match measure(config) {
            Err(HarnessError::BuildFailed { stage, stderr, .. }) => {
                assert_eq!(stage, "build");
                assert_eq!(stderr, "no compiler");
            }
            other => panic!("expected build failure, got {:?}", other),
        }
    }

    #[test]
    fn test_stderr_on_run_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig::default()
            .with_work_dir(dir.path())
            .with_run(sh("echo 'time: 1.0'; echo 'segfault' >&2"));
        assert!(matches!(measure(config), Err(HarnessError::RunFailed { .. })));
    }

    #[test]
    fn test_timeout_kills_step() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig::default()
            .with_work_dir(dir.path())
            .with_timeout_secs(1)
            .with_run(sh("sleep 5"));
        let err = measure(config).unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn test_missing_run_command() {
        let err = CommandHarness::new(HarnessConfig::default()).unwrap_err();
        assert!(matches!(err, HarnessError::MissingRunCommand));
    }
}
