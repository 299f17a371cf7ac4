use crate::fanout::{current_token, CancelToken};
use crate::{RunError, RuntimeError};
use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Where a command's stdin comes from.
#[derive(Default)]
pub enum Stdin {
    #[default]
    Null,
    Bytes(Vec<u8>),
    Reader(Box<dyn Read + Send>),
}

/// A command to run: program, arguments, extra environment and stream wiring.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    stdin: Stdin,
    stdout: Option<Box<dyn Write + Send>>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: Stdin::Null,
            stdout: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn stdin_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Stdin::Bytes(bytes.into());
        self
    }

    #[must_use]
    pub fn stdin_reader(mut self, reader: Box<dyn Read + Send>) -> Self {
        self.stdin = Stdin::Reader(reader);
        self
    }

    /// Stream stdout into `sink` instead of capturing it.
    #[must_use]
    pub fn stdout_to(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.stdout = Some(sink);
        self
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

    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    pub fn pretty(&self) -> String {
        pretty_command(&self.argv())
    }

    pub fn take_stdin(&mut self) -> Stdin {
        std::mem::take(&mut self.stdin)
    }

    pub fn take_stdout(&mut self) -> Option<Box<dyn Write + Send>> {
        self.stdout.take()
    }
}

impl std::fmt::Debug for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cmd")
            .field("argv", &self.argv())
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CmdOutput {
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stdout followed by stderr.
    pub fn combined(&self) -> Vec<u8> {
        let mut out = self.stdout.clone();
        out.extend_from_slice(&self.stderr);
        out
    }

    pub fn stdout_lines(&self) -> Vec<String> {
        split_lines(&self.stdout)
    }

    pub fn combined_lines(&self) -> Vec<String> {
        split_lines(&self.combined())
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(ToOwned::to_owned)
        .collect()
}

/// Runs commands. Everything that spawns a subprocess goes through this.
pub trait CommandRunner: Send + Sync {
    /// Run `cmd` to completion. A non-zero exit becomes `RuntimeError::Run`.
    fn run(&self, cmd: Cmd) -> Result<CmdOutput, RuntimeError>;
}

/// Runs commands as real host processes.
///
/// When called from inside a fan-out task the runner observes the task's
/// cancellation token and kills the child once it fires.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalRunner;

impl LocalRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for LocalRunner {
    fn run(&self, mut cmd: Cmd) -> Result<CmdOutput, RuntimeError> {
        let pretty = cmd.pretty();
        debug!("running: {pretty}");

        let stdin = cmd.take_stdin();
        let sink = cmd.take_stdout();

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if matches!(stdin, Stdin::Null) {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                RuntimeError::EngineUnavailable(cmd.program.clone())
            } else {
                RuntimeError::Io(e)
            }
        })?;

        let stdin_writer = spawn_stdin_writer(&mut child, stdin);
        let stdout_reader = spawn_reader(child.stdout.take(), sink);
        let stderr_reader = spawn_reader(child.stderr.take(), None);

        let waited = wait_for_child(&mut child, current_token().as_ref());

        if let Some(handle) = stdin_writer {
            if let Ok(Err(e)) = handle.join() {
                debug!("stdin of {pretty} closed early: {e}");
            }
        }
        let stdout = join_reader(stdout_reader)?;
        let stderr = join_reader(stderr_reader)?;

        let status = match waited {
            Ok(status) => status,
            Err(WaitError::Cancelled) => return Err(RuntimeError::Cancelled(pretty)),
            Err(WaitError::Io(e)) => return Err(RuntimeError::Io(e)),
        };

        if status.success() {
            Ok(CmdOutput { stdout, stderr })
        } else {
            let mut output = stdout;
            output.extend_from_slice(&stderr);
            debug!(
                "command failed: {pretty}: {}",
                String::from_utf8_lossy(&output).trim_end()
            );
            Err(RuntimeError::Run(RunError {
                command: cmd.argv(),
                output,
                exit_code: status.code(),
            }))
        }
    }
}

enum WaitError {
    Cancelled,
    Io(io::Error),
}

fn wait_for_child(child: &mut Child, token: Option<&CancelToken>) -> Result<ExitStatus, WaitError> {
    let Some(token) = token else {
        return child.wait().map_err(WaitError::Io);
    };
    loop {
        if let Some(status) = child.try_wait().map_err(WaitError::Io)? {
            return Ok(status);
        }
        if token.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(WaitError::Cancelled);
        }
        thread::sleep(CANCEL_POLL_INTERVAL);
    }
}

fn spawn_stdin_writer(child: &mut Child, stdin: Stdin) -> Option<JoinHandle<io::Result<()>>> {
    let mut pipe = child.stdin.take()?;
    match stdin {
        Stdin::Null => None,
        Stdin::Bytes(bytes) => Some(thread::spawn(move || pipe.write_all(&bytes))),
        Stdin::Reader(mut reader) => Some(thread::spawn(move || {
            io::copy(&mut reader, &mut pipe).map(|_| ())
        })),
    }
}

type ReaderHandle = JoinHandle<io::Result<Vec<u8>>>;

fn spawn_reader<R>(pipe: Option<R>, sink: Option<Box<dyn Write + Send>>) -> ReaderHandle
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        let Some(mut pipe) = pipe else {
            return Ok(buf);
        };
        match sink {
            Some(mut sink) => {
                io::copy(&mut pipe, &mut sink)?;
                sink.flush()?;
            }
            None => {
                pipe.read_to_end(&mut buf)?;
            }
        }
        Ok(buf)
    })
}

fn join_reader(handle: ReaderHandle) -> Result<Vec<u8>, RuntimeError> {
    handle
        .join()
        .map_err(|_| RuntimeError::ExecFailed("output reader thread panicked".to_owned()))?
        .map_err(RuntimeError::Io)
}

/// Run and return stdout split into lines.
pub fn output_lines(runner: &dyn CommandRunner, cmd: Cmd) -> Result<Vec<String>, RuntimeError> {
    Ok(runner.run(cmd)?.stdout_lines())
}

/// Run and return stdout followed by stderr, split into lines.
pub fn combined_output_lines(
    runner: &dyn CommandRunner,
    cmd: Cmd,
) -> Result<Vec<String>, RuntimeError> {
    Ok(runner.run(cmd)?.combined_lines())
}

/// Render argv the way a user could paste it into a POSIX shell.
pub fn pretty_command(argv: &[String]) -> String {
    argv.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'/' | b':' | b'=' | b',' | b'@' | b'+')
        });
    if safe {
        s.to_owned()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}
