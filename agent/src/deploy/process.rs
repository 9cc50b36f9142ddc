//! Child process execution with streamed output

use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::DeployError;

const READ_CHUNK_SIZE: usize = 4096;

pub const TRUNCATION_MARKER: &str = "[... earlier output truncated ...]\n";

/// A spawned command whose stdout and stderr arrive as one chunk stream
pub struct RunningProcess {
    child: Child,
    chunks: mpsc::Receiver<Vec<u8>>,
    readers: Vec<JoinHandle<()>>,
}

/// Run `command` through `<shell> -c`.
///
/// Both output streams are read concurrently; chunks are delivered in the
/// order they were read.
pub fn spawn(shell: &str, command: &str) -> Result<RunningProcess, DeployError> {
    let mut child = Command::new(shell)
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| DeployError::ProcessSpawn(format!("{} -c: {}", shell, e)))?;

    debug!("Spawned process with PID {:?}", child.id());

    let (tx, rx) = mpsc::channel(64);
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(pump(stdout, tx.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(pump(stderr, tx.clone())));
    }

    Ok(RunningProcess {
        child,
        chunks: rx,
        readers,
    })
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to read process output: {}", e);
                break;
            }
        }
    }
}

impl RunningProcess {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// The next output chunk, or `None` once both streams are closed
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        self.chunks.recv().await
    }

    /// Wait for the process to exit and return its exit code
    pub async fn wait(mut self) -> Result<i32, DeployError> {
        let status = self.child.wait().await?;
        futures::future::join_all(self.readers.drain(..)).await;
        Ok(exit_code(status))
    }
}

/// The exit code of `status`; `128 + signal` for a process killed by a signal
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

// ================================ OUTPUT BUFFER ================================= //

/// Accumulated process output, bounded to the most recent `cap` bytes
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    bytes: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            bytes: Vec::new(),
            cap: cap.max(1),
            truncated: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        if self.bytes.len() > self.cap {
            let mut excess = self.bytes.len() - self.cap;
            // never start the kept tail inside a UTF-8 sequence
            while excess < self.bytes.len() && self.bytes[excess] & 0xC0 == 0x80 {
                excess += 1;
            }
            self.bytes.drain(..excess);
            self.truncated = true;
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Buffer contents as text, prefixed with a marker once bytes were dropped
    pub fn text(&self) -> String {
        let body = String::from_utf8_lossy(&self.bytes);
        if self.truncated {
            format!("{}{}", TRUNCATION_MARKER, body)
        } else {
            body.into_owned()
        }
    }
}
