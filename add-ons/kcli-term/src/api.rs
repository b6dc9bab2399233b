//! Programmatic entry point: one-shot and streamed execution of the command
//! tree. Concurrent invocations serialize through one mutex because the
//! command tree touches shared on-disk state.

use crate::runtime::Output;
use std::io::Write;
use std::sync::OnceLock;
use tokio::sync::{mpsc, Mutex};

fn exec_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Whitespace splitting with single/double quote support; no expansion.
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in line.chars() {
        match (c, quote) {
            (q @ ('"' | '\''), None) => quote = Some(q),
            (q, Some(open)) if q == open => quote = None,
            (c, None) if c.is_whitespace() => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            (c, _) => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[derive(Debug)]
pub struct ExecOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Parses the command line, runs it with captured stdio and returns both
/// streams plus the exit code.
pub async fn execute(command_line: &str) -> ExecOutcome {
    let _guard = exec_lock().lock().await;
    let argv = split_command_line(command_line);

    struct Shared(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);
    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let stdout = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let stderr = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let output = Output::custom(
        Box::new(Shared(std::sync::Arc::clone(&stdout))),
        Box::new(Shared(std::sync::Arc::clone(&stderr))),
    );
    let exit_code = crate::dispatch_captured(argv, output).await;
    let stdout_text = String::from_utf8_lossy(&stdout.lock().unwrap()).into_owned();
    let stderr_text = String::from_utf8_lossy(&stderr.lock().unwrap()).into_owned();
    ExecOutcome {
        stdout: stdout_text,
        stderr: stderr_text,
        exit_code,
    }
}

/// One streamed chunk. Exactly one `{done: true, ..}` sentinel is emitted,
/// strictly after the last data chunk of both streams.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    pub stream: String,
    pub data: String,
    pub done: bool,
    pub err: Option<String>,
}

impl StreamChunk {
    fn data_chunk(stream: &str, data: String) -> Self {
        Self {
            stream: stream.to_string(),
            data,
            done: false,
            err: None,
        }
    }
}

/// Line-framing writer: every completed line is forwarded with its stream
/// tag; a trailing unterminated line flushes on drop.
struct LineWriter {
    tag: &'static str,
    tx: mpsc::UnboundedSender<(String, String)>,
    buffer: Vec<u8>,
}

impl LineWriter {
    fn new(tag: &'static str, tx: mpsc::UnboundedSender<(String, String)>) -> Self {
        Self {
            tag,
            tx,
            buffer: Vec::new(),
        }
    }
}

impl Write for LineWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            let _ = self.tx.send((self.tag.to_string(), text));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for LineWriter {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            let text = String::from_utf8_lossy(&self.buffer).into_owned();
            let _ = self.tx.send((self.tag.to_string(), text));
        }
    }
}

/// Spawns the execution and returns a channel of line-framed chunks. The
/// terminal sentinel is sent only after both stream forwarders have drained,
/// so no data chunk can trail it.
pub fn execute_stream(command_line: &str) -> mpsc::UnboundedReceiver<StreamChunk> {
    let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
    let line = command_line.to_string();

    tokio::spawn(async move {
        let _guard = exec_lock().lock().await;
        let argv = split_command_line(&line);

        let (stdout_tx, mut stdout_rx) = mpsc::unbounded_channel::<(String, String)>();
        let (stderr_tx, mut stderr_rx) = mpsc::unbounded_channel::<(String, String)>();
        let output = Output::custom(
            Box::new(LineWriter::new("stdout", stdout_tx)),
            Box::new(LineWriter::new("stderr", stderr_tx)),
        );

        let out_forward = {
            let chunk_tx = chunk_tx.clone();
            tokio::spawn(async move {
                while let Some((stream, data)) = stdout_rx.recv().await {
                    let _ = chunk_tx.send(StreamChunk::data_chunk(&stream, data));
                }
            })
        };
        let err_forward = {
            let chunk_tx = chunk_tx.clone();
            tokio::spawn(async move {
                while let Some((stream, data)) = stderr_rx.recv().await {
                    let _ = chunk_tx.send(StreamChunk::data_chunk(&stream, data));
                }
            })
        };

        let exit_code = crate::dispatch_captured(argv, output.clone()).await;
        // Dropping the runtime's writers closes the line channels; both
        // forwarders must finish before the sentinel goes out.
        drop(output);
        let _ = out_forward.await;
        let _ = err_forward.await;

        let err = (exit_code != 0).then(|| format!("exit code {exit_code}"));
        let _ = chunk_tx.send(StreamChunk {
            stream: String::new(),
            data: String::new(),
            done: true,
            err,
        });
    });

    chunk_rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_splitting() {
        assert_eq!(
            split_command_line("get pods -n payments"),
            vec!["get", "pods", "-n", "payments"]
        );
        assert_eq!(
            split_command_line("ai why \"pod with spaces\""),
            vec!["ai", "why", "pod with spaces"]
        );
        assert_eq!(split_command_line("  "), Vec::<String>::new());
    }

    #[tokio::test]
    async fn execute_version_captures_stdout() {
        let outcome = execute("version").await;
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.stdout.contains("kcli"));
        assert!(outcome.stderr.is_empty());
    }

    #[tokio::test]
    async fn stream_emits_data_then_single_done() {
        let mut rx = execute_stream("version");
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        assert!(chunks.len() >= 2);
        let done_count = chunks.iter().filter(|c| c.done).count();
        assert_eq!(done_count, 1);
        let last = chunks.last().unwrap();
        assert!(last.done, "done sentinel must be the final chunk");
        assert!(last.err.is_none());
        assert!(chunks
            .iter()
            .any(|c| c.stream == "stdout" && c.data.contains("kcli")));
    }

    #[tokio::test]
    async fn stream_reports_failure_in_sentinel() {
        let mut rx = execute_stream("config get no.such.key");
        let mut last = None;
        while let Some(chunk) = rx.recv().await {
            last = Some(chunk);
        }
        let last = last.unwrap();
        assert!(last.done);
        assert!(last.err.is_some());
    }

    #[tokio::test]
    async fn concurrent_executions_serialize() {
        let (a, b) = tokio::join!(execute("version"), execute("version"));
        assert_eq!(a.exit_code, 0);
        assert_eq!(b.exit_code, 0);
    }
}
