// src/exec/scripted.rs

//! Scripted `CommandRunner` for tests
//!
//! Stands in for the container engine: every command line is recorded, and
//! exit codes and stdout are replayed for commands containing a needle.

use super::{CommandLine, CommandRunner, Sink};
use crate::error::{Error, Result};
use std::io::{self, Write};
use std::sync::Mutex;

enum Reply {
    Exit { code: i32, stdout: Vec<u8> },
    LaunchFailure,
    OutputFailure,
}

struct Rule {
    needle: String,
    reply: Reply,
}

/// Replays exit codes and stdout for commands containing a substring
///
/// The first matching rule wins; commands matching no rule exit 0 silently.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    log: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit with `exit_code` after writing `stdout`
    pub fn on(self, needle: &str, exit_code: i32, stdout: &str) -> Self {
        self.rule(
            needle,
            Reply::Exit {
                code: exit_code,
                stdout: stdout.as_bytes().to_vec(),
            },
        )
    }

    /// Fail to launch, as if the program were missing
    pub fn fail_launch(self, needle: &str) -> Self {
        self.rule(needle, Reply::LaunchFailure)
    }

    /// Run, but fail while streaming stdout into its sink
    pub fn fail_output(self, needle: &str) -> Self {
        self.rule(needle, Reply::OutputFailure)
    }

    fn rule(mut self, needle: &str, reply: Reply) -> Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            reply,
        });
        self
    }

    /// Rendered command lines in execution order
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(needle)).count()
    }

    /// Index of the first command containing `needle`
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.contains(needle))
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &CommandLine, stdout: Sink<'_>, _stderr: Sink<'_>) -> Result<i32> {
        let rendered = command.to_string();
        if let Ok(mut log) = self.log.lock() {
            log.push(rendered.clone());
        }

        let Some(rule) = self.rules.iter().find(|r| rendered.contains(&r.needle)) else {
            return Ok(0);
        };

        match &rule.reply {
            Reply::LaunchFailure => Err(Error::Execution {
                command: rendered,
                source: io::Error::new(io::ErrorKind::NotFound, "scripted launch failure"),
            }),
            Reply::OutputFailure => Err(Error::OutputSink {
                command: rendered,
                source: io::Error::new(io::ErrorKind::StorageFull, "scripted sink failure"),
            }),
            Reply::Exit { code, stdout: bytes } => {
                if let Sink::Writer(writer) = stdout {
                    writer
                        .write_all(bytes)
                        .and_then(|_| writer.flush())
                        .map_err(|source| Error::OutputSink {
                            command: rendered,
                            source,
                        })?;
                }
                Ok(*code)
            }
        }
    }
}
