//! Post-render injection
//!
//! Pipes each rendered file through external filter commands; every
//! command's stdout replaces the file content. Injector specs are validated
//! up front so a malformed spec never runs half the commands first.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::exec::{CommandRunner, run_captured, run_command_string};

/// The placeholder injector commands use for the current file path
const FILE_PLACEHOLDER: &str = "FILE";

/// Injection options
#[derive(Debug, Clone, Default)]
pub struct InjectOpts {
    /// Specs of the form `command,key1=value1[,key2=value2,...]`; values
    /// may use the `FILE` placeholder
    pub injectors: Vec<String>,
    /// Raw command templates with a `FILE` placeholder
    pub injects: Vec<String>,
}

impl InjectOpts {
    pub fn is_empty(&self) -> bool {
        self.injectors.is_empty() && self.injects.is_empty()
    }
}

/// Parse an injector spec into its command and flag-argument template
///
/// Each flag token is either a bare argument or `key=value`, expanded to
/// `--key value` (`-k value` for single-character keys). Anything else is a
/// fatal configuration error.
pub(crate) fn parse_injector(spec: &str) -> Result<(String, Vec<String>)> {
    let mut tokens = spec.split(',');
    let command = tokens.next().unwrap_or_default().to_string();

    let mut args = Vec::new();
    for flag in tokens {
        let parts: Vec<&str> = flag.split('=').collect();
        match parts.as_slice() {
            [bare] => args.push(bare.to_string()),
            [key, value] => {
                let dashes = if key.len() == 1 { "-" } else { "--" };
                args.push(format!("{dashes}{key}"));
                args.push(value.to_string());
            }
            _ => {
                return Err(Error::InvalidInjectFlag {
                    flag: flag.to_string(),
                });
            }
        }
    }

    Ok((command, args))
}

/// Run every injector over every file, in order, rewriting each file with
/// the command's stdout
pub fn inject(runner: &dyn CommandRunner, files: &[PathBuf], opts: &InjectOpts) -> Result<()> {
    // Reject malformed specs before any command runs
    let parsed: Vec<(String, Vec<String>)> = opts
        .injectors
        .iter()
        .map(|spec| parse_injector(spec))
        .collect::<Result<_>>()?;

    for (command, arg_template) in &parsed {
        for file in files {
            let args = substitute_file(arg_template, file);
            let out = run_captured(runner, command, &args, None)?;
            std::fs::write(file, &out.stdout).map_err(|e| Error::path_io(file, e))?;
        }
    }

    for template in &opts.injects {
        for file in files {
            let command =
                template.replacen(FILE_PLACEHOLDER, &file.display().to_string(), 1);
            let out = run_command_string(runner, &command)?;
            std::fs::write(file, &out.stdout).map_err(|e| Error::path_io(file, e))?;
        }
    }

    Ok(())
}

/// Substitute the first `FILE` placeholder in the argument template
fn substitute_file(args: &[String], file: &Path) -> Vec<String> {
    let mut substituted = false;
    args.iter()
        .map(|a| {
            if !substituted && a.contains(FILE_PLACEHOLDER) {
                substituted = true;
                a.replacen(FILE_PLACEHOLDER, &file.display().to_string(), 1)
            } else {
                a.clone()
            }
        })
        .collect()
}
