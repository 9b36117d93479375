// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! External tool execution

use std::{
    ffi::{OsStr, OsString},
    io::{Read, Write},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use itertools::Itertools;
use log::{debug, warn};

use crate::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A single tool invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    program: &'static str,
    args: Vec<OsString>,
    input: Option<String>,
    accepted: Vec<i32>,
}

impl Invocation {
    pub fn new(program: &'static str) -> Self {
        Self {
            program,
            args: vec![],
            input: None,
            accepted: vec![0],
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Feed `input` on stdin. It never appears in [`Invocation::render`].
    pub fn input(mut self, input: &str) -> Self {
        self.input = Some(input.to_owned());
        self
    }

    /// Treat exit `code` as success in addition to 0
    pub fn accept(mut self, code: i32) -> Self {
        self.accepted.push(code);
        self
    }

    /// The command line, for logs and diagnostics
    pub fn render(&self) -> String {
        std::iter::once(self.program.to_owned())
            .chain(self.args.iter().map(|a| a.to_string_lossy().into_owned()))
            .join(" ")
    }

    fn succeeded(&self, status: ExitStatus) -> bool {
        status.code().is_some_and(|code| self.accepted.contains(&code))
    }
}

/// Runs invocations, optionally through a privilege helper and with a timeout
#[derive(Debug, Clone, Default)]
pub struct Runner {
    privilege: Vec<String>,
    timeout: Option<Duration>,
}

impl Runner {
    pub fn new(privilege: Vec<String>, timeout: Option<Duration>) -> Self {
        Self { privilege, timeout }
    }

    /// Run `invocation` to completion and return its stdout
    pub fn run(&self, invocation: &Invocation) -> Result<String, Error> {
        let command = invocation.render();
        let argv0 = self
            .privilege
            .first()
            .map(String::as_str)
            .unwrap_or(invocation.program);

        if which::which(argv0).is_err() {
            return Err(Error::MissingTool {
                program: argv0.to_owned(),
            });
        }

        let mut cmd = Command::new(argv0);
        if !self.privilege.is_empty() {
            cmd.args(&self.privilege[1..]).arg(invocation.program);
        }
        cmd.args(&invocation.args)
            .stdin(if invocation.input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("running: {command}");
        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            command: command.clone(),
            source,
        })?;

        if let Some(input) = &invocation.input {
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(e) = stdin.write_all(input.as_bytes()) {
                    warn!("could not write to stdin of {command}: {e}");
                }
            }
        }

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = self.wait(&mut child, &command)?;
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if !invocation.succeeded(status) {
            let diagnostic = if stderr.trim().is_empty() { &stdout } else { &stderr };
            return Err(Error::Failed {
                command,
                status: status.code(),
                stderr: diagnostic.trim().to_owned(),
            });
        }

        Ok(stdout)
    }

    fn wait(&self, child: &mut Child, command: &str) -> Result<ExitStatus, Error> {
        let Some(timeout) = self.timeout else {
            return child.wait().map_err(Error::Io);
        };

        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if started.elapsed() >= timeout {
                warn!("{command} exceeded {timeout:?}, killing it");
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Timeout {
                    command: command.to_owned(),
                    timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn drain<R>(pipe: Option<R>) -> thread::JoinHandle<String>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}
