// src/exec/mod.rs

//! Command execution for container-engine and scanner invocations
//!
//! Every external program the worker touches (the container engine, and
//! through it the scanner inside the helper container) is launched here.
//! Key properties:
//!
//! - Commands are argument vectors, never shell strings. An optional
//!   elevation prefix (e.g. `sudo -E`) is carried separately.
//! - Exactly one process per call; the caller blocks until it exits.
//!   There is no timeout.
//! - Output is streamed into sinks as it is produced, never buffered whole.
//! - The exit code is returned verbatim; interpretation belongs to the caller.
//!
//! `CommandRunner` is the seam to the operating system. `ProcessRunner` is
//! the real implementation; tests substitute `scripted::ScriptedRunner`.

#[doc(hidden)]
pub mod scripted;

use crate::error::{Error, Result};
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, info};

/// Elevation prefix prepended when privilege elevation is enabled
pub const ELEVATION_PREFIX: &[&str] = &["sudo", "-E"];

/// A fully-formed external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    elevation: Vec<String>,
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandLine {
    /// Start a command line for the given program
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            elevation: Vec::new(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable on the launched process
    ///
    /// Values never appear in the rendered command line.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Prepend the elevation prefix when `enabled`
    pub fn elevated(mut self, enabled: bool) -> Self {
        if enabled {
            self.elevation = ELEVATION_PREFIX.iter().map(|s| s.to_string()).collect();
        } else {
            self.elevation.clear();
        }
        self
    }

    pub fn is_elevated(&self) -> bool {
        !self.elevation.is_empty()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn environment(&self) -> &[(String, String)] {
        &self.env
    }

    /// Full argument vector including the elevation prefix
    pub fn argv(&self) -> Vec<&str> {
        self.elevation
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.program.as_str()))
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

/// Destination for one output stream of a process
pub enum Sink<'a> {
    /// Drop the output
    Discard,
    /// Emit each line to the execution log under the given label
    Log(&'a str),
    /// Stream raw bytes into a writer
    Writer(&'a mut (dyn Write + Send)),
}

impl fmt::Debug for Sink<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discard => write!(f, "Discard"),
            Self::Log(label) => write!(f, "Log({})", label),
            Self::Writer(_) => write!(f, "Writer"),
        }
    }
}

/// Launches external processes
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion and return its exit code
    fn run(&self, command: &CommandLine, stdout: Sink<'_>, stderr: Sink<'_>) -> Result<i32>;

    /// Whether programs are looked up on the host `PATH` when launched
    fn resolves_on_path(&self) -> bool {
        false
    }
}

/// `CommandRunner` backed by `std::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn resolves_on_path(&self) -> bool {
        true
    }

    fn run(&self, command: &CommandLine, stdout: Sink<'_>, stderr: Sink<'_>) -> Result<i32> {
        let argv = command.argv();
        let rendered = command.to_string();
        let exec_err = |source: io::Error| Error::Execution {
            command: rendered.clone(),
            source,
        };

        let mut cmd = Command::new(argv[0]);
        cmd.args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(stdio_for(&stdout))
            .stderr(stdio_for(&stderr));
        for (key, value) in command.environment() {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(exec_err)?;
        let child_stdout = child.stdout.take();
        let child_stderr = child.stderr.take();

        // Both pipes are drained concurrently so neither can fill up and stall the child
        let (out_result, err_result) = std::thread::scope(|scope| {
            let out = scope.spawn(move || match child_stdout {
                Some(pipe) => pump(pipe, stdout),
                None => Ok(()),
            });
            let err_result = match child_stderr {
                Some(pipe) => pump(pipe, stderr),
                None => Ok(()),
            };
            let out_result = out
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("output reader panicked")));
            (out_result, err_result)
        });

        let status = child.wait().map_err(exec_err)?;

        let code = match status.code() {
            Some(code) => code,
            None => {
                return Err(exec_err(io::Error::other(format!(
                    "process terminated by signal ({})",
                    status
                ))));
            }
        };

        if let Err(source) = out_result.and(err_result) {
            return Err(Error::OutputSink {
                command: rendered,
                source,
            });
        }

        Ok(code)
    }
}

fn stdio_for(sink: &Sink<'_>) -> Stdio {
    match sink {
        Sink::Discard => Stdio::null(),
        Sink::Log(_) | Sink::Writer(_) => Stdio::piped(),
    }
}

/// Copy a pipe into a sink until EOF
///
/// A failure on either side does not stop the pipe being emptied: the rest is
/// drained so the child can still exit, and the first error is returned.
fn pump(reader: impl Read, sink: Sink<'_>) -> io::Result<()> {
    let mut reader = reader;
    match sink {
        Sink::Discard => {
            io::copy(&mut reader, &mut io::sink())?;
            Ok(())
        }
        Sink::Log(label) => {
            let mut reader = BufReader::new(reader);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => return Ok(()),
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line);
                        info!("[{}] {}", label, text.trim_end());
                    }
                    Err(e) => return Err(drain(&mut reader, e)),
                }
            }
        }
        Sink::Writer(writer) => {
            let mut buf = [0u8; 8192];
            let mut failure: Option<io::Error> = None;
            loop {
                let n = match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        let e = drain(&mut reader, e);
                        failure.get_or_insert(e);
                        break;
                    }
                };
                if failure.is_none()
                    && let Err(e) = writer.write_all(&buf[..n])
                {
                    failure = Some(e);
                }
            }
            if failure.is_none()
                && let Err(e) = writer.flush()
            {
                failure = Some(e);
            }
            match failure {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }
}

/// Empty the rest of a pipe after `error`, handing `error` back
fn drain(reader: &mut impl Read, error: io::Error) -> io::Error {
    if let Err(e) = io::copy(reader, &mut io::sink()) {
        debug!("Could not drain pipe after read error: {}", e);
    }
    error
}

/// Command Executor shared by every component of one execution
///
/// Applies the sink defaults: a missing stdout sink discards output unless
/// debug is on, in which case it goes to the execution log; a missing
/// stderr sink always goes to the execution log.
#[derive(Clone)]
pub struct Executor {
    runner: Arc<dyn CommandRunner>,
    debug: bool,
}

impl Executor {
    pub fn new(runner: Arc<dyn CommandRunner>, debug: bool) -> Self {
        Self { runner, debug }
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Whether the underlying runner launches real host programs
    pub fn resolves_on_path(&self) -> bool {
        self.runner.resolves_on_path()
    }

    /// Run `command` and return its exit code
    pub fn execute(
        &self,
        label: &str,
        command: &CommandLine,
        stdout: Option<&mut (dyn Write + Send)>,
        stderr: Option<&mut (dyn Write + Send)>,
    ) -> Result<i32> {
        debug!("Executing [{}]: {}", label, command);

        let stdout = match stdout {
            Some(writer) => Sink::Writer(writer),
            None if self.debug => Sink::Log(label),
            None => Sink::Discard,
        };
        let stderr = match stderr {
            Some(writer) => Sink::Writer(writer),
            None => Sink::Log(label),
        };

        let code = self.runner.run(command, stdout, stderr)?;
        debug!("[{}] exited with code {}", label, code);
        Ok(code)
    }

    /// Run `command` and report whether it exited zero
    pub fn succeeds(&self, label: &str, command: &CommandLine) -> Result<bool> {
        Ok(self.execute(label, command, None, None)? == 0)
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor").field("debug", &self.debug).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scripted::ScriptedRunner;

    /// Fails its first read, then yields `data`
    struct FlakyPipe {
        data: &'static [u8],
        failed: bool,
    }

    impl FlakyPipe {
        fn new(data: &'static [u8]) -> Self {
            Self {
                data,
                failed: false,
            }
        }
    }

    impl Read for FlakyPipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.failed {
                self.failed = true;
                return Err(io::Error::other("pipe hiccup"));
            }
            let n = buf.len().min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_pump_log_drains_after_read_error() {
        let mut pipe = FlakyPipe::new(b"line one\nline two\n");
        let err = pump(&mut pipe, Sink::Log("t")).unwrap_err();
        assert_eq!(err.to_string(), "pipe hiccup");
        assert!(pipe.data.is_empty());
    }

    #[test]
    fn test_pump_writer_drains_after_read_error() {
        let mut pipe = FlakyPipe::new(b"payload");
        let mut out = Vec::new();
        let err = pump(&mut pipe, Sink::Writer(&mut out)).unwrap_err();
        assert_eq!(err.to_string(), "pipe hiccup");
        assert!(pipe.data.is_empty());
        assert!(out.is_empty());
    }

    #[test]
    fn test_command_line_rendering() {
        let cmd = CommandLine::new("docker")
            .arg("exec")
            .args(["jenkins_anchore", "mkdir", "-p", "/root/anchore.job_1"]);
        assert_eq!(cmd.to_string(), "docker exec jenkins_anchore mkdir -p /root/anchore.job_1");
        assert!(!cmd.is_elevated());
    }

    #[test]
    fn test_elevation_prefix() {
        let cmd = CommandLine::new("docker").arg("start").arg("c1").elevated(true);
        assert_eq!(cmd.argv(), vec!["sudo", "-E", "docker", "start", "c1"]);
        assert!(cmd.is_elevated());

        let cmd = cmd.elevated(false);
        assert_eq!(cmd.argv(), vec!["docker", "start", "c1"]);
    }

    #[test]
    fn test_arguments_with_spaces_stay_single() {
        let cmd = CommandLine::new("docker").arg("cp").arg("/ws/my file").arg("c1:/x");
        assert_eq!(cmd.arguments().len(), 3);
        assert_eq!(cmd.arguments()[1], "/ws/my file");
    }

    #[test]
    fn test_env_values_not_rendered() {
        let cmd = CommandLine::new("docker").env("ANCHOREPASS", "secret").arg("exec");
        assert!(!cmd.to_string().contains("secret"));
        assert_eq!(cmd.environment()[0].1, "secret");
    }

    #[test]
    fn test_process_runner_captures_stdout() {
        let cmd = CommandLine::new("sh").args(["-c", "printf 'hello\\nworld'"]);
        let mut out: Vec<u8> = Vec::new();
        let code = ProcessRunner
            .run(&cmd, Sink::Writer(&mut out), Sink::Discard)
            .unwrap();
        assert_eq!(code, 0);
        assert_eq!(out, b"hello\nworld");
    }

    #[test]
    fn test_process_runner_returns_exit_code_verbatim() {
        let cmd = CommandLine::new("sh").args(["-c", "exit 2"]);
        let code = ProcessRunner.run(&cmd, Sink::Discard, Sink::Discard).unwrap();
        assert_eq!(code, 2);
    }

    #[test]
    fn test_process_runner_launch_failure() {
        let cmd = CommandLine::new("/nonexistent/definitely-not-a-binary");
        let err = ProcessRunner.run(&cmd, Sink::Discard, Sink::Discard).unwrap_err();
        match err {
            Error::Execution { command, .. } => {
                assert!(command.contains("definitely-not-a-binary"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_process_runner_passes_env() {
        let cmd = CommandLine::new("sh")
            .args(["-c", "printf \"$WORKER_TEST_VAR\""])
            .env("WORKER_TEST_VAR", "value-1");
        let mut out: Vec<u8> = Vec::new();
        ProcessRunner
            .run(&cmd, Sink::Writer(&mut out), Sink::Discard)
            .unwrap();
        assert_eq!(out, b"value-1");
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_process_runner_sink_failure_is_reported() {
        let cmd = CommandLine::new("sh").args(["-c", "echo data"]);
        let mut writer = FailingWriter;
        let err = ProcessRunner
            .run(&cmd, Sink::Writer(&mut writer), Sink::Discard)
            .unwrap_err();
        assert!(matches!(err, Error::OutputSink { .. }));
    }

    #[test]
    fn test_executor_records_through_runner() {
        let runner = Arc::new(ScriptedRunner::new().on("inspect", 1, ""));
        let executor = Executor::new(runner.clone(), false);

        let ok = executor
            .succeeds("start", &CommandLine::new("docker").arg("start").arg("c1"))
            .unwrap();
        assert!(ok);
        let ok = executor
            .succeeds("inspect", &CommandLine::new("docker").arg("inspect").arg("img"))
            .unwrap();
        assert!(!ok);

        assert_eq!(
            runner.commands(),
            vec!["docker start c1".to_string(), "docker inspect img".to_string()]
        );
    }

    #[test]
    fn test_executor_writes_stdout_to_sink() {
        let runner = Arc::new(ScriptedRunner::new().on("gate", 2, "{\"ok\":true}"));
        let executor = Executor::new(runner, false);
        let mut out: Vec<u8> = Vec::new();
        let code = executor
            .execute(
                "gate",
                &CommandLine::new("anchore").arg("gate"),
                Some(&mut out),
                None,
            )
            .unwrap();
        assert_eq!(code, 2);
        assert_eq!(out, b"{\"ok\":true}");
    }
}
