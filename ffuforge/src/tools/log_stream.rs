//! Streaming of child stdout/stderr into the tracing system.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

/// Which pipe a reader is attached to.
#[derive(Debug, Clone, Copy)]
pub(super) enum Stream {
    Stdout,
    Stderr,
}

/// Strips ANSI escape codes from a line.
///
/// Some tools colour their output; the escapes are removed before the
/// line is re-logged so formatters do not double-style it.
pub(super) fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if chars.next() == Some('[') {
                for next_char in chars.by_ref() {
                    if next_char == 'm' {
                        break;
                    }
                }
            }
        } else {
            result.push(c);
        }
    }

    result
}

/// Spawn a task that logs each line of `reader` and returns the full text.
///
/// The task ends when the pipe closes. DISM writes progress bars using bare
/// `\r`, so carriage returns are treated as line ends too.
pub(super) fn spawn_reader<R>(reader: R, tool: String, stream: Stream) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut collected = String::new();
        let mut lines = BufReader::new(reader).lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    for segment in line.split('\r').filter(|s| !s.trim().is_empty()) {
                        let clean = strip_ansi_codes(segment);
                        match stream {
                            Stream::Stdout => {
                                tracing::debug!(target: "tool:stdout", tool = %tool, "{}", clean);
                            }
                            Stream::Stderr => {
                                tracing::warn!(target: "tool:stderr", tool = %tool, "{}", clean);
                            }
                        }
                    }
                    collected.push_str(&line);
                    collected.push('\n');
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(
                        target: "tool:stdout/stderr",
                        tool = %tool,
                        ?stream,
                        "Failed to read from pipe: {}", e
                    );
                    break;
                }
            }
        }

        tracing::trace!(target: "tool:stdout/stderr", tool = %tool, ?stream, "Pipe closed");
        collected
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi_codes() {
        assert_eq!(strip_ansi_codes("\x1b[32mOK\x1b[0m"), "OK");
        assert_eq!(strip_ansi_codes("plain"), "plain");
        assert_eq!(strip_ansi_codes("[=====  50.0%  ]"), "[=====  50.0%  ]");
    }

    #[tokio::test]
    async fn test_reader_collects_lines() {
        let input: &[u8] = b"line one\nline two\r[==  10%]\n";
        let text = spawn_reader(input, "dism.exe".into(), Stream::Stdout)
            .await
            .unwrap();
        assert!(text.contains("line one\n"));
        assert!(text.contains("line two"));
    }
}
