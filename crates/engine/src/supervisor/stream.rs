use crate::command::OutputStream;
use crate::output::OutputSink;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Appended to a stored line whose tail was cut at the byte bound.
const LINE_CUT_MARKER: &str = " [line truncated]";

/// Drains one process pipe into the sink until EOF, one line per push.
/// Lines are captured as raw bytes and decoded lossily, so output that is
/// not valid UTF-8 keeps flowing instead of wedging the pipe. Any single
/// line is stored up to `max_line_bytes`; the rest of an overlong line is
/// discarded and the record is flagged truncated. Only a genuine read
/// error sets the shared fault flag, which fails the command even on a
/// clean exit.
pub(super) async fn pump_lines<R>(
    reader: R,
    stream: OutputStream,
    sink: OutputSink,
    max_line_bytes: usize,
    io_fault: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        // One extra byte tells a line of exactly max_line_bytes apart from
        // one that really overruns the bound.
        let read = {
            let mut bounded = (&mut reader).take(max_line_bytes as u64 + 1);
            bounded.read_until(b'\n', &mut buf).await
        };
        match read {
            Ok(0) => return,
            Ok(_) => {}
            Err(err) => {
                fault(&sink, &io_fault, &err);
                return;
            }
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            sink.push(stream, &String::from_utf8_lossy(&buf));
        } else if buf.len() > max_line_bytes {
            buf.truncate(max_line_bytes);
            let mut content = String::from_utf8_lossy(&buf).into_owned();
            content.push_str(LINE_CUT_MARKER);
            sink.push(stream, &content);
            sink.mark_truncated();
            // Skim the rest of the line off the pipe so the writer never
            // blocks on a reader that went away.
            if let Err(err) = skip_to_line_end(&mut reader).await {
                fault(&sink, &io_fault, &err);
                return;
            }
        } else {
            // EOF with no trailing newline; keep the partial final line.
            sink.push(stream, &String::from_utf8_lossy(&buf));
        }
    }
}

fn fault(sink: &OutputSink, io_fault: &AtomicBool, err: &std::io::Error) {
    io_fault.store(true, Ordering::Relaxed);
    sink.push(OutputStream::Stderr, &format!("output stream error: {err}"));
}

/// Consumes bytes up to and including the next newline, or to EOF. Works
/// through the reader's own buffer, so an endless line costs no memory.
async fn skip_to_line_end<R>(reader: &mut BufReader<R>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let (advance, found) = {
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                return Ok(());
            }
            match chunk.iter().position(|&byte| byte == b'\n') {
                Some(pos) => (pos + 1, true),
                None => (chunk.len(), false),
            }
        };
        reader.consume(advance);
        if found {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandLocation, CommandRecord, RiskLevel};
    use crate::events::EngineEvent;
    use crate::registry::CommandRegistry;
    use std::io;
    use std::path::PathBuf;
    use std::pin::Pin;
    use std::sync::RwLock;
    use std::task::{Context, Poll};
    use tokio::sync::broadcast;

    const BOUND: usize = 4096;

    fn sink() -> (OutputSink, Arc<RwLock<CommandRegistry>>, broadcast::Receiver<EngineEvent>) {
        let registry = Arc::new(RwLock::new(CommandRegistry::default()));
        {
            let mut guard = registry.write().expect("lock");
            guard
                .insert(CommandRecord::new(
                    "cmd_1".to_string(),
                    "cat",
                    PathBuf::from("/tmp"),
                    CommandLocation::Background,
                    RiskLevel::Safe,
                    false,
                ))
                .expect("insert");
            guard.mark_running("cmd_1", Some(1));
        }
        let (events, rx) = broadcast::channel(16);
        (
            OutputSink::new(registry.clone(), events, "cmd_1".to_string(), 100),
            registry,
            rx,
        )
    }

    fn contents(registry: &Arc<RwLock<CommandRegistry>>) -> Vec<String> {
        registry
            .read()
            .expect("lock")
            .get("cmd_1")
            .expect("present")
            .output
            .iter()
            .map(|line| line.content.clone())
            .collect()
    }

    #[tokio::test]
    async fn pumps_lines_until_eof() {
        let (sink, registry, _rx) = sink();
        let fault = Arc::new(AtomicBool::new(false));
        pump_lines(&b"one\r\ntwo\n"[..], OutputStream::Stdout, sink, BOUND, fault.clone()).await;

        assert_eq!(contents(&registry), vec!["one", "two"]);
        assert!(!fault.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn invalid_utf8_is_decoded_lossily_and_pumping_continues() {
        let (sink, registry, _rx) = sink();
        let fault = Arc::new(AtomicBool::new(false));
        pump_lines(
            &b"bad\xffline\nafter\n"[..],
            OutputStream::Stdout,
            sink,
            BOUND,
            fault.clone(),
        )
        .await;

        assert_eq!(contents(&registry), vec!["bad\u{fffd}line", "after"]);
        assert!(!fault.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn final_line_without_newline_is_kept() {
        let (sink, registry, _rx) = sink();
        let fault = Arc::new(AtomicBool::new(false));
        pump_lines(&b"first\ntail"[..], OutputStream::Stdout, sink, BOUND, fault.clone()).await;

        assert_eq!(contents(&registry), vec!["first", "tail"]);
        assert!(!fault.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn overlong_line_is_capped_and_flagged() {
        let (sink, registry, _rx) = sink();
        let fault = Arc::new(AtomicBool::new(false));
        let mut input = vec![b'x'; BOUND * 3];
        input.extend_from_slice(b"\nshort\n");
        pump_lines(&input[..], OutputStream::Stdout, sink, BOUND, fault.clone()).await;

        let lines = contents(&registry);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), BOUND + LINE_CUT_MARKER.len());
        assert!(lines[0].ends_with(LINE_CUT_MARKER));
        assert_eq!(lines[1], "short");
        let record = registry.read().expect("lock").get("cmd_1").expect("present");
        assert!(record.output_truncated);
        assert!(!fault.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn line_of_exactly_the_bound_is_not_flagged() {
        let (sink, registry, _rx) = sink();
        let fault = Arc::new(AtomicBool::new(false));
        let mut input = vec![b'y'; BOUND];
        input.push(b'\n');
        pump_lines(&input[..], OutputStream::Stdout, sink, BOUND, fault.clone()).await;

        let lines = contents(&registry);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), BOUND);
        let record = registry.read().expect("lock").get("cmd_1").expect("present");
        assert!(!record.output_truncated);
    }

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe gone")))
        }
    }

    #[tokio::test]
    async fn read_error_sets_fault_and_synthesizes_stderr() {
        let (sink, registry, _rx) = sink();
        let fault = Arc::new(AtomicBool::new(false));
        pump_lines(FailingReader, OutputStream::Stdout, sink, BOUND, fault.clone()).await;

        assert!(fault.load(Ordering::Relaxed));
        let record = registry.read().expect("lock").get("cmd_1").expect("present");
        assert_eq!(record.output.len(), 1);
        assert_eq!(record.output[0].stream, OutputStream::Stderr);
        assert!(record.output[0].content.contains("output stream error"));
    }
}
