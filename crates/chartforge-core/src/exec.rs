//! External command execution
//!
//! Every external tool (the templating engine, the overlay-build engine,
//! post-render filters) is invoked synchronously through the [`CommandRunner`]
//! trait. The pipeline blocks on each invocation; exit code and captured
//! output are the only success signal.

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use crate::error::{Error, Result};

/// Captured output of a finished command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Stdout decoded as UTF-8, lossily
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Trait for running external commands
///
/// The real implementation is [`SystemRunner`]; tests substitute mock
/// runners that produce canned output or write expected files.
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, optionally in `dir`, with `env` merged over
    /// the inherited environment. A non-zero exit must be reported as
    /// [`Error::CommandFailed`] carrying the command line and captured output.
    fn run(
        &self,
        program: &str,
        args: &[String],
        dir: Option<&Path>,
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput>;
}

/// Runs commands on the host system via `std::process`
#[derive(Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        dir: Option<&Path>,
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput> {
        let resolved = which::which(program).map_err(|e| Error::BinaryNotFound {
            program: program.to_string(),
            message: e.to_string(),
        })?;

        tracing::debug!("running {} {}", program, args.join(" "));

        let mut command = Command::new(resolved);
        command.args(args);
        if let Some(d) = dir {
            command.current_dir(d);
        }
        for (k, v) in env {
            command.env(k, v);
        }

        let output = command.output()?;

        if !output.status.success() {
            let command_line = render_command_line(program, args);
            return Err(Error::CommandFailed {
                message: output
                    .status
                    .code()
                    .map(|c| format!("exit status {c}"))
                    .unwrap_or_else(|| "terminated by signal".to_string()),
                command: indent(&command_line, "  "),
                output: indent(&String::from_utf8_lossy(&output.stderr), "  "),
            });
        }

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Convenience wrappers shared by the pipeline stages
pub(crate) fn run_captured(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
    dir: Option<&Path>,
) -> Result<CommandOutput> {
    runner.run(program, args, dir, &HashMap::new())
}

/// Run a whitespace-separated command template, e.g. an injector command
/// whose `FILE` placeholder has already been substituted.
pub(crate) fn run_command_string(
    runner: &dyn CommandRunner,
    command: &str,
) -> Result<CommandOutput> {
    let mut tokens = command.split_whitespace().map(str::to_string);
    let program = tokens.next().ok_or_else(|| Error::CommandFailed {
        message: "empty command".to_string(),
        command: command.to_string(),
        output: String::new(),
    })?;
    let args: Vec<String> = tokens.collect();
    runner.run(&program, &args, None, &HashMap::new())
}

fn render_command_line(program: &str, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(program.to_string());
    parts.extend(args.iter().cloned());
    parts.join(" ")
}

/// Indent every non-empty line of `text` with `prefix`
pub(crate) fn indent(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|l| {
            if l.is_empty() {
                l.to_string()
            } else {
                format!("{prefix}{l}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Scripted command runner for tests: delegates to a closure so each test
/// can fake the exact tool behavior it needs (canned stdout, files written
/// as a side effect, or failures)
#[cfg(test)]
pub(crate) struct ScriptedRunner<F>
where
    F: Fn(&str, &[String], Option<&Path>) -> Result<CommandOutput> + Send + Sync,
{
    pub script: F,
}

#[cfg(test)]
impl<F> CommandRunner for ScriptedRunner<F>
where
    F: Fn(&str, &[String], Option<&Path>) -> Result<CommandOutput> + Send + Sync,
{
    fn run(
        &self,
        program: &str,
        args: &[String],
        dir: Option<&Path>,
        _env: &HashMap<String, String>,
    ) -> Result<CommandOutput> {
        (self.script)(program, args, dir)
    }
}
