//! Backend terminal output capture.

use std::sync::LazyLock;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::broadcast;

/// Lines kept for slow bootstrap readers before they start lagging.
pub(crate) const OUTPUT_CAPACITY: usize = 1024;

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .unwrap()
});

/// Remove terminal escape sequences (colors, cursor movement, titles).
pub(crate) fn strip_ansi(line: &str) -> String {
    ANSI_ESCAPE.replace_all(line, "").into_owned()
}

/// Read `reader` line by line, publishing each cleaned line.
///
/// Runs until the stream closes. Bytes that are not valid UTF-8 are replaced,
/// never treated as the end of the stream: dropping the pipe early would kill
/// the backend on its next write. Having no subscribers is not an error:
/// lines produced while no bootstrap page is open are only logged.
pub(crate) async fn pipe_lines<R>(reader: R, stream: &'static str, tx: broadcast::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = decode_line(&buf);
                tracing::debug!(stream, "{line}");
                let _ = tx.send(line);
            }
            Err(e) => {
                tracing::debug!(stream, error = %e, "Backend output stream closed");
                break;
            }
        }
    }
}

/// Decode one raw line: lossy UTF-8, line ending trimmed, ANSI codes stripped.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    strip_ansi(&String::from_utf8_lossy(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_colors() {
        assert_eq!(strip_ansi("\x1b[32mready\x1b[0m in 12ms"), "ready in 12ms");
    }

    #[test]
    fn test_strip_cursor_and_title() {
        assert_eq!(strip_ansi("\x1b[2K\x1b[1Gbuilding"), "building");
        assert_eq!(strip_ansi("\x1b]0;vite\x07done"), "done");
    }

    #[test]
    fn test_plain_line_unchanged() {
        assert_eq!(strip_ansi("listening on :3001"), "listening on :3001");
    }

    #[tokio::test]
    async fn test_pipe_lines_publishes_each_line() {
        let (tx, mut rx) = broadcast::channel(OUTPUT_CAPACITY);
        let input: &[u8] = b"one\n\x1b[1mtwo\x1b[0m\nthree";

        pipe_lines(input, "stdout", tx).await;

        assert_eq!(rx.recv().await.unwrap(), "one");
        assert_eq!(rx.recv().await.unwrap(), "two");
        assert_eq!(rx.recv().await.unwrap(), "three");
    }

    #[tokio::test]
    async fn test_pipe_lines_keeps_reading_after_invalid_utf8() {
        let (tx, mut rx) = broadcast::channel(OUTPUT_CAPACITY);
        let input: &[u8] = b"caf\xe9\r\nafter\n";

        pipe_lines(input, "stdout", tx).await;

        assert_eq!(rx.recv().await.unwrap(), "caf\u{fffd}");
        assert_eq!(rx.recv().await.unwrap(), "after");
    }

    #[tokio::test]
    async fn test_pipe_lines_without_subscribers() {
        let (tx, rx) = broadcast::channel::<String>(4);
        drop(rx);
        let input: &[u8] = b"ignored\n";

        pipe_lines(input, "stderr", tx).await;
    }
}
