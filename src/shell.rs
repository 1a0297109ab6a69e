//! Command-line front end: tokenizing, pipeline/redirection parsing, and
//! pipeline spawning.
//!
//! Parse errors carry user-facing messages; they are forwarded to the client
//! verbatim, the way a local shell would print them.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};

use anyhow::{Context, Result, bail};

/// One `cmd [args] [redirections]` stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Stage {
    pub argv: Vec<String>,
    pub stdin_file: Option<String>,
    pub stdout_file: Option<String>,
    /// `>>` instead of `>`.
    pub append: bool,
    pub stderr_file: Option<String>,
}

/// Split a raw line into whitespace-separated tokens, honoring single and
/// double quotes. No glob expansion.
pub fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for ch in line.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    in_token = true;
                }
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                c => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }
    if quote.is_some() {
        bail!("Unterminated quote.");
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Split tokens on `|` and parse each stage's redirections.
pub fn build_pipeline(tokens: &[String]) -> Result<Vec<Stage>> {
    let mut stages = Vec::new();
    for chunk in tokens.split(|t| t == "|") {
        stages.push(parse_stage(chunk)?);
    }
    Ok(stages)
}

fn parse_stage(tokens: &[String]) -> Result<Stage> {
    let mut stage = Stage::default();
    let mut it = tokens.iter();
    while let Some(tok) = it.next() {
        match tok.as_str() {
            "<" => {
                if stage.stdin_file.is_some() {
                    bail!("Duplicate input redirection.");
                }
                let file = it.next().context("Input file not specified.")?;
                stage.stdin_file = Some(file.clone());
            }
            ">" | ">>" => {
                if stage.stdout_file.is_some() {
                    bail!("Duplicate output redirection.");
                }
                let file = it.next().context("Output file not specified.")?;
                stage.stdout_file = Some(file.clone());
                stage.append = tok == ">>";
            }
            "2>" => {
                if stage.stderr_file.is_some() {
                    bail!("Duplicate error redirection.");
                }
                let file = it.next().context("Error output file not specified.")?;
                stage.stderr_file = Some(file.clone());
            }
            _ => stage.argv.push(tok.clone()),
        }
    }
    if stage.argv.is_empty() {
        bail!("Command missing.");
    }
    Ok(stage)
}

/// Live handles of a spawned pipeline.
pub struct PipelineHandles {
    pub children: Vec<Child>,
    /// Read end of the last stage's stdout, unless redirected to a file.
    pub stdout: Option<ChildStdout>,
    /// Captured stderr of every stage that did not redirect it.
    pub stderrs: Vec<ChildStderr>,
}

/// Spawn every stage, wiring stage N's stdout to stage N+1's stdin.
/// Redirections override the pipe wiring at the edges. On a mid-pipeline
/// spawn failure the already-started stages are killed and reaped before the
/// error is returned.
pub fn spawn_pipeline(stages: &[Stage], cwd: Option<&Path>) -> Result<PipelineHandles> {
    let mut children: Vec<Child> = Vec::new();
    let mut stderrs: Vec<ChildStderr> = Vec::new();
    let mut carry: Option<ChildStdout> = None;

    for stage in stages {
        let result = spawn_stage(stage, cwd, carry.take());
        match result {
            Ok(mut child) => {
                carry = child.stdout.take();
                if let Some(err_pipe) = child.stderr.take() {
                    stderrs.push(err_pipe);
                }
                children.push(child);
            }
            Err(err) => {
                for mut child in children {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                return Err(err);
            }
        }
    }

    Ok(PipelineHandles {
        children,
        stdout: carry,
        stderrs,
    })
}

fn spawn_stage(stage: &Stage, cwd: Option<&Path>, incoming: Option<ChildStdout>) -> Result<Child> {
    let mut cmd = Command::new(&stage.argv[0]);
    cmd.args(&stage.argv[1..]);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    // stdin: an explicit redirection wins over the incoming pipe.
    if let Some(path) = &stage.stdin_file {
        let file =
            File::open(resolve(cwd, path)).with_context(|| format!("open input file {path}"))?;
        cmd.stdin(Stdio::from(file));
    } else if let Some(prev) = incoming {
        cmd.stdin(Stdio::from(prev));
    } else {
        cmd.stdin(Stdio::null());
    }

    if let Some(path) = &stage.stdout_file {
        cmd.stdout(Stdio::from(open_output(cwd, path, stage.append)?));
    } else {
        cmd.stdout(Stdio::piped());
    }

    if let Some(path) = &stage.stderr_file {
        cmd.stderr(Stdio::from(open_output(cwd, path, false)?));
    } else {
        cmd.stderr(Stdio::piped());
    }

    cmd.spawn()
        .with_context(|| format!("spawn {}", stage.argv[0]))
}

fn open_output(cwd: Option<&Path>, path: &str, append: bool) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .append(append)
        .truncate(!append)
        .open(resolve(cwd, path))
        .with_context(|| format!("open output file {path}"))
}

fn resolve(cwd: Option<&Path>, path: &str) -> PathBuf {
    match cwd {
        Some(dir) if !Path::new(path).is_absolute() => dir.join(path),
        _ => PathBuf::from(path),
    }
}
