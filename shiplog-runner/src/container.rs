//! Container runtime management
//!
//! Drives the `docker` (or `podman`) CLI for the workload's lifecycle:
//! - Starting the container detached, with the command run through a shell
//!   whose stderr is redirected into stdout, so the workload writes a single
//!   ordered stream
//! - Following that stream as a lazy sequence of lines
//! - Waiting for it to exit, killing it, removing it
//!
//! Kill and remove treat a container that is already gone as success.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use shiplog_core::domain::log::MAX_MESSAGE_BYTES;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::Poll;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Opaque reference to a started container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    id: String,
    name: String,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short: String = self.id.chars().take(12).collect();
        write!(f, "{} ({})", self.name, short)
    }
}

/// Live output of a container: one item per line, `\n` removed
///
/// Lines longer than [`MAX_MESSAGE_BYTES`] arrive as several consecutive items.
///
/// The stream ends once the container stops producing output. If it was
/// produced by a log-follower process, that process lives as long as the
/// stream does.
pub struct ContainerOutput {
    lines: BoxStream<'static, io::Result<Vec<u8>>>,
    follower: Option<Child>,
}

impl ContainerOutput {
    pub fn new(lines: BoxStream<'static, io::Result<Vec<u8>>>) -> Self {
        Self {
            lines,
            follower: None,
        }
    }

    fn with_follower(mut self, child: Child) -> Self {
        self.follower = Some(child);
        self
    }
}

impl Stream for ContainerOutput {
    type Item = io::Result<Vec<u8>>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.lines.poll_next_unpin(cx)
    }
}

impl fmt::Debug for ContainerOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerOutput")
            .field("follower", &self.follower.as_ref().and_then(Child::id))
            .finish()
    }
}

/// Container lifecycle operations the pipeline depends on
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Starts `command` in a new detached container and follows its output
    async fn run(&self, image: &str, command: &str)
    -> Result<(ContainerHandle, ContainerOutput)>;

    /// Waits for the container to exit and returns its exit status
    async fn wait(&self, handle: &ContainerHandle) -> Result<i64>;

    /// Forcefully stops the container; never fails
    async fn kill(&self, handle: &ContainerHandle);

    /// Removes the container; removing a missing container succeeds
    async fn remove(&self, handle: &ContainerHandle) -> Result<()>;
}

/// [`ContainerRuntime`] backed by the docker/podman command line
#[derive(Debug, Clone)]
pub struct CliRuntime {
    /// Runtime binary, e.g. "docker" or "podman"
    binary: String,
    /// Shell the command is handed to with `-c`
    shell: String,
}

impl CliRuntime {
    pub fn new(binary: impl Into<String>, shell: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            shell: shell.into(),
        }
    }

    /// Spawns `<runtime> logs -f` and streams the container's output
    ///
    /// The workload's stderr is already folded into stdout, so the follower's
    /// own stderr only carries runtime diagnostics; those are logged.
    fn follow_logs(&self, id: &str) -> Result<ContainerOutput> {
        let mut child = Command::new(&self.binary)
            .arg("logs")
            .arg("--follow")
            .arg(id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to execute '{} logs'", self.binary))?;

        let stdout = child
            .stdout
            .take()
            .context("Log follower has no stdout pipe")?;
        let stderr = child
            .stderr
            .take()
            .context("Log follower has no stderr pipe")?;

        let binary = self.binary.clone();
        tokio::spawn(async move {
            let mut diagnostics = read_lines(stderr, MAX_MESSAGE_BYTES);
            while let Some(Ok(line)) = diagnostics.next().await {
                warn!("{} logs: {}", binary, String::from_utf8_lossy(&line));
            }
        });

        let lines = read_lines(stdout, MAX_MESSAGE_BYTES);
        Ok(ContainerOutput::new(lines).with_follower(child))
    }

    /// Runs a short-lived runtime subcommand and captures its output
    async fn exec(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to execute '{} {}'", self.binary, args[0]))
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn run(
        &self,
        image: &str,
        command: &str,
    ) -> Result<(ContainerHandle, ContainerOutput)> {
        let name = format!("shiplog-{}", Uuid::new_v4());
        info!(
            "Running container {} with image: {} and command: {} -c {:?}",
            name, image, self.shell, command
        );

        let output = self
            .exec(&[
                "run",
                "--detach",
                "--name",
                &name,
                "--entrypoint",
                &self.shell,
                image,
                "-c",
                &merged_script(command),
            ])
            .await
            .with_context(|| format!("Is {} installed?", self.binary))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !stderr.trim().is_empty() {
            debug!("{} run stderr: {}", self.binary, stderr.trim());
        }

        if !output.status.success() {
            anyhow::bail!(
                "Failed to start container for image {}: exit_code={}, stderr='{}'",
                image,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        let id = stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .map(str::to_string)
            .with_context(|| format!("{} run printed no container ID", self.binary))?;
        let handle = ContainerHandle::new(id, name);

        match self.follow_logs(handle.id()) {
            Ok(output) => Ok((handle, output)),
            Err(e) => {
                // Nothing will ever read this container's output
                self.kill(&handle).await;
                if let Err(remove_err) = self.remove(&handle).await {
                    warn!("Failed to remove container {}: {:#}", handle, remove_err);
                }
                Err(e)
            }
        }
    }

    async fn wait(&self, handle: &ContainerHandle) -> Result<i64> {
        debug!("Waiting for container {} to finish", handle);

        let output = self.exec(&["wait", handle.id()]).await?;
        if !output.status.success() {
            anyhow::bail!(
                "Failed to wait for container {}: {}",
                handle,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        parse_exit_code(&String::from_utf8_lossy(&output.stdout))
    }

    async fn kill(&self, handle: &ContainerHandle) {
        info!("Killing container {}", handle);

        match self.exec(&["kill", handle.id()]).await {
            Ok(output) if output.status.success() => debug!("Container {} killed", handle),
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if is_gone(&stderr) {
                    debug!("Container {} already stopped: {}", handle, stderr.trim());
                } else {
                    warn!("Failed to kill container {}: {}", handle, stderr.trim());
                }
            }
            Err(e) => warn!("Failed to kill container {}: {:#}", handle, e),
        }
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<()> {
        info!("Removing container {}", handle);

        let output = self.exec(&["rm", "--force", handle.id()]).await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_gone(&stderr) {
            debug!("Container {} already removed", handle);
            return Ok(());
        }

        anyhow::bail!("Failed to remove container {}: {}", handle, stderr.trim())
    }
}

/// Wraps `command` so the shell sends its stderr to stdout
///
/// Both streams then share one pipe inside the container and keep the order
/// the workload wrote them in.
fn merged_script(command: &str) -> String {
    format!("exec 2>&1\n{}", command)
}

/// Splits a byte stream into lines without touching their content
///
/// Only the `\n` delimiter is dropped; `\r` and other control characters are
/// kept. A line longer than `max_len` bytes is cut into `max_len` sized items,
/// so memory stays bounded. The stream ends at EOF or after the first read
/// error.
fn read_lines<R>(reader: R, max_len: usize) -> BoxStream<'static, io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let max_len = max_len.max(1);
    stream::unfold(Some(BufReader::new(reader)), move |state| async move {
        let mut reader = state?;
        match read_line_capped(&mut reader, max_len).await {
            Ok(None) => None,
            Ok(Some(line)) => Some((Ok(line), Some(reader))),
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}

/// Reads up to the next `\n` or `max_len` bytes, whichever comes first
///
/// Returns `None` at EOF when nothing was read.
async fn read_line_capped<R>(reader: &mut R, max_len: usize) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok((!line.is_empty()).then_some(line));
        }

        let room = max_len - line.len();
        let window = &available[..available.len().min(room)];
        match window.iter().position(|b| *b == b'\n') {
            Some(end) => {
                line.extend_from_slice(&window[..end]);
                reader.consume(end + 1);
                return Ok(Some(line));
            }
            None => {
                let taken = window.len();
                line.extend_from_slice(window);
                reader.consume(taken);
                if line.len() >= max_len {
                    return Ok(Some(line));
                }
            }
        }
    }
}

fn parse_exit_code(stdout: &str) -> Result<i64> {
    let code = stdout
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .context("Runtime printed no exit code")?;

    code.parse::<i64>()
        .with_context(|| format!("Unexpected exit code output: {:?}", code))
}

/// Whether runtime stderr says the container no longer exists or runs
fn is_gone(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("no such container") || stderr.contains("is not running")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_lines_keeps_raw_content() {
        let input: &'static [u8] = b"first\nwith\ttab\r\n\nlast without newline";
        let lines: Vec<Vec<u8>> = read_lines(input, 1024)
            .map(|line| line.unwrap())
            .collect()
            .await;

        assert_eq!(
            lines,
            vec![
                b"first".to_vec(),
                b"with\ttab\r".to_vec(),
                b"".to_vec(),
                b"last without newline".to_vec(),
            ]
        );
    }

    #[tokio::test]
    async fn test_read_lines_empty_input() {
        let input: &'static [u8] = b"";
        assert_eq!(read_lines(input, 1024).count().await, 0);
    }

    #[tokio::test]
    async fn test_read_lines_cuts_long_lines() {
        let input: &'static [u8] = b"abcdefghij\nxy\n";
        let lines: Vec<Vec<u8>> = read_lines(input, 4)
            .map(|line| line.unwrap())
            .collect()
            .await;

        assert_eq!(
            lines,
            vec![
                b"abcd".to_vec(),
                b"efgh".to_vec(),
                b"ij".to_vec(),
                b"xy".to_vec(),
            ]
        );
    }

    #[tokio::test]
    async fn test_read_lines_bounds_unterminated_line() {
        let input = vec![b'q'; 10_000];
        let lines: Vec<Vec<u8>> = read_lines(std::io::Cursor::new(input), 4096)
            .map(|line| line.unwrap())
            .collect()
            .await;

        let sizes: Vec<usize> = lines.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4096, 4096, 1808]);
    }

    #[test]
    fn test_merged_script_redirects_stderr_first() {
        assert_eq!(merged_script("echo hi >&2"), "exec 2>&1\necho hi >&2");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_merged_script_keeps_stdout_stderr_order() {
        // Everything is written before the reader starts, so both streams are
        // fully buffered when they are read
        let script = merged_script(
            "echo out-1; echo err-1 >&2; echo out-2; echo err-2 >&2; echo out-3",
        );
        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .unwrap();

        assert!(output.stderr.is_empty());
        let lines: Vec<String> = read_lines(std::io::Cursor::new(output.stdout), 1024)
            .map(|line| String::from_utf8(line.unwrap()).unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["out-1", "err-1", "out-2", "err-2", "out-3"]);
    }

    #[tokio::test]
    async fn test_container_output_streams_lines() {
        let lines = stream::iter(vec![Ok(b"a".to_vec()), Ok(b"b".to_vec())]).boxed();
        let output = ContainerOutput::new(lines);

        let collected: Vec<_> = output.map(|line| line.unwrap()).collect().await;
        assert_eq!(collected, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_parse_exit_code() {
        assert_eq!(parse_exit_code("0\n").unwrap(), 0);
        assert_eq!(parse_exit_code("\n137\n").unwrap(), 137);
        assert!(parse_exit_code("").is_err());
        assert!(parse_exit_code("exited").is_err());
    }

    #[test]
    fn test_is_gone() {
        assert!(is_gone(
            "Error response from daemon: No such container: shiplog-1"
        ));
        assert!(is_gone(
            "Error response from daemon: Cannot kill container: abc: Container abc is not running"
        ));
        assert!(is_gone(
            "Error: no container with name or ID \"abc\" found: no such container"
        ));
        assert!(!is_gone("permission denied while trying to connect"));
    }

    #[test]
    fn test_handle_display_shortens_id() {
        let handle = ContainerHandle::new("0123456789abcdef0123", "shiplog-x");
        assert_eq!(handle.to_string(), "shiplog-x (0123456789ab)");

        let short = ContainerHandle::new("abc", "shiplog-y");
        assert_eq!(short.to_string(), "shiplog-y (abc)");
    }

    #[test]
    fn test_handle_display_with_multibyte_id() {
        // Byte 12 falls inside a multi-byte char
        let handle = ContainerHandle::new("abcdefghijkéééé", "shiplog-z");
        assert_eq!(handle.to_string(), "shiplog-z (abcdefghijké)");
    }

    #[tokio::test]
    async fn test_run_fails_when_runtime_is_missing() {
        let runtime = CliRuntime::new("shiplog-test-no-such-runtime", "/bin/sh");

        let err = runtime.run("alpine", "echo hi").await.unwrap_err();
        assert!(format!("{:#}", err).contains("Is shiplog-test-no-such-runtime installed?"));
    }
}
