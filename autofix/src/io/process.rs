//! Blocking child-process execution with captured and echoed output.
//!
//! Every external tool the repair loop touches (tests, linters, git apply,
//! oracle commands) goes through [`ProcessRunner::run`]. Output is drained
//! concurrently to avoid pipe deadlocks, echoed to this process inside a CI
//! log group, and captured up to a byte limit. The capture keeps the tail of
//! each stream, where test runners print their failure summary.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};

use crate::core::types::RunResult;

/// Where a drained child stream is echoed.
#[derive(Debug, Clone, Copy)]
enum Echo {
    Stdout,
    Stderr,
}

/// Runs external commands to completion in a fixed working directory.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    workdir: PathBuf,
    output_limit_bytes: usize,
}

impl ProcessRunner {
    pub fn new(workdir: impl Into<PathBuf>, output_limit_bytes: usize) -> Self {
        Self {
            workdir: workdir.into(),
            output_limit_bytes,
        }
    }

    /// Run `argv` and wait for it to exit.
    ///
    /// A non-zero exit is reported through [`RunResult::exit_code`]; only a
    /// spawn or pipe failure is an error.
    #[instrument(skip_all, fields(program = argv.first().map(String::as_str).unwrap_or("")))]
    pub fn run(&self, argv: &[String], stdin: Option<&[u8]>) -> Result<RunResult> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("empty command"))?;
        let rendered = display_command(argv);

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        if stdin.is_some() {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        println!("::group::RUN {rendered}");
        debug!(command = %rendered, "spawning child process");
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                println!("::endgroup::");
                error!(err = %e, command = %rendered, "failed to spawn command");
                return Err(e).with_context(|| format!("spawn {rendered}"));
            }
        };

        let stdin_handle = match stdin {
            Some(input) => {
                let mut child_stdin = child
                    .stdin
                    .take()
                    .ok_or_else(|| anyhow!("stdin was not piped"))?;
                let input = input.to_vec();
                Some(thread::spawn(move || -> Result<()> {
                    child_stdin.write_all(&input).context("write stdin")
                }))
            }
            None => None,
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;

        let limit = self.output_limit_bytes;
        let stdout_handle = thread::spawn(move || drain_and_echo(stdout, limit, Echo::Stdout));
        let stderr_handle = thread::spawn(move || drain_and_echo(stderr, limit, Echo::Stderr));

        let status = child.wait().context("wait for command")?;

        if let Some(handle) = stdin_handle {
            match handle.join() {
                // The child may exit without reading all of its input.
                Ok(Err(e)) => debug!(err = %e, "stdin not fully consumed"),
                Ok(Ok(())) => {}
                Err(_) => return Err(anyhow!("stdin writer thread panicked")),
            }
        }
        let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
        let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;
        println!("::endgroup::");

        if stdout_truncated > 0 || stderr_truncated > 0 {
            warn!(stdout_truncated, stderr_truncated, "output truncated");
        }

        let exit_code = status.code().unwrap_or(-1);
        debug!(exit_code, "command finished");
        Ok(RunResult {
            exit_code,
            stdout: captured_text(&stdout, stdout_truncated, "stdout"),
            stderr: captured_text(&stderr, stderr_truncated, "stderr"),
        })
    }
}

/// Render a command for logs, quoting arguments that need it.
pub fn display_command(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| quote_arg(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_arg(arg: &str) -> String {
    if !arg.is_empty()
        && arg.chars().all(|ch| {
            ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':' | '=' | ',')
        })
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', "'\"'\"'"))
}

fn captured_text(bytes: &[u8], truncated: usize, label: &str) -> String {
    let kept = String::from_utf8_lossy(bytes);
    if truncated == 0 {
        return kept.into_owned();
    }
    format!("[{label} truncated {truncated} bytes]\n{kept}")
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read `reader` line by line and echo every line. Keeps the last `limit`
/// bytes and returns them with the number of leading bytes dropped.
fn drain_and_echo<R: Read>(reader: R, limit: usize, echo: Echo) -> Result<(Vec<u8>, usize)> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected = VecDeque::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read output")?;
        if n == 0 {
            break;
        }

        let echoed = match echo {
            Echo::Stdout => std::io::stdout().lock().write_all(&line),
            Echo::Stderr => std::io::stderr().lock().write_all(&line),
        };
        if let Err(e) = echoed {
            warn!(err = %e, "failed to echo child output");
        }

        collected.extend(line);
        if collected.len() > limit {
            let excess = collected.len() - limit;
            collected.drain(..excess);
            truncated += excess;
        }
    }

    Ok((collected.into(), truncated))
}
