//! External command execution.
//!
//! A small builder over [`std::process::Command`] that captures stderr and
//! turns a non-zero exit into [`Error::SynthesisTool`] carrying the tool name
//! and a human hint.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;

use tracing::debug;

use crate::error::{Error, IoContext, Result};

enum Input {
    Null,
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// Builder for a single external command invocation.
pub struct Cmd {
    program: String,
    args: Vec<OsString>,
    dir: Option<PathBuf>,
    stdin: Input,
    stdout_file: Option<PathBuf>,
    error_msg: Option<String>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dir: None,
            stdin: Input::Null,
            stdout_file: None,
            error_msg: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.dir = Some(dir.to_path_buf());
        self
    }

    /// Feed the contents of `path` on stdin.
    pub fn stdin_file(mut self, path: &Path) -> Self {
        self.stdin = Input::File(path.to_path_buf());
        self
    }

    /// Feed `bytes` on stdin.
    pub fn stdin_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.stdin = Input::Bytes(bytes);
        self
    }

    /// Redirect stdout into `path` (truncated).
    pub fn stdout_file(mut self, path: &Path) -> Self {
        self.stdout_file = Some(path.to_path_buf());
        self
    }

    /// Hint appended to the error when the command fails.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    fn failure(&self, detail: String) -> Error {
        match &self.error_msg {
            Some(hint) => Error::tool(&self.program, format!("{detail}\n{hint}")),
            None => Error::tool(&self.program, detail),
        }
    }

    /// Run to completion. Stdout is captured unless redirected to a file.
    pub fn run(self) -> Result<Output> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).stderr(Stdio::piped());
        if let Some(dir) = &self.dir {
            command.current_dir(dir);
        }

        let stdin = match &self.stdin {
            Input::Null => Stdio::null(),
            Input::File(path) => Stdio::from(
                File::open(path).io_context(|| format!("opening {}", path.display()))?,
            ),
            Input::Bytes(_) => Stdio::piped(),
        };
        command.stdin(stdin);

        let stdout = match &self.stdout_file {
            Some(path) => Stdio::from(
                File::create(path).io_context(|| format!("creating {}", path.display()))?,
            ),
            None => Stdio::piped(),
        };
        command.stdout(stdout);

        debug!(command = %self.display(), "running");
        let mut child = command
            .spawn()
            .map_err(|e| self.failure(format!("failed to start: {e}")))?;

        let feeder = match (&self.stdin, child.stdin.take()) {
            (Input::Bytes(bytes), Some(mut pipe)) => {
                let bytes = bytes.clone();
                Some(thread::spawn(move || pipe.write_all(&bytes)))
            }
            _ => None,
        };

        let output = child
            .wait_with_output()
            .map_err(|e| self.failure(format!("failed to wait: {e}")))?;

        if let Some(feeder) = feeder {
            match feeder.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(self.failure(format!("writing stdin: {e}"))),
                Err(_) => return Err(self.failure("stdin writer panicked".to_string())),
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.failure(format!(
                "`{}` exited with {}: {}",
                self.display(),
                output.status,
                stderr.trim()
            )));
        }

        Ok(output)
    }
}
