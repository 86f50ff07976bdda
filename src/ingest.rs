use crate::error::TrawlError;
use std::io::{ErrorKind, Read};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::thread;

const CHANNEL_DEPTH: usize = 16;

enum Message {
    /// Complete lines, each terminated by `\n`.
    Chunk(String),
    Done,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    pub chunk_bytes: usize,
    /// Stop after this many bytes; `None` reads to end of stream.
    pub max_bytes: Option<u64>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunk_bytes: 64 * 1024,
            max_bytes: None,
        }
    }
}

/// Text collected by one [`Ingest::drain`] call.
#[derive(Debug, Default)]
pub struct Drained {
    pub text: String,
    pub error: Option<TrawlError>,
    pub finished: bool,
}

/// Reads a stream on a worker thread and hands complete lines to the event
/// loop through a bounded channel.
pub struct Ingest {
    rx: Receiver<Message>,
    bytes: u64,
    finished: bool,
}

impl Ingest {
    pub fn spawn<R: Read + Send + 'static>(reader: R, options: IngestOptions) -> Self {
        let (tx, rx) = mpsc::sync_channel(CHANNEL_DEPTH);
        thread::spawn(move || read_loop(reader, options, tx));
        Self {
            rx,
            bytes: 0,
            finished: false,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Collects at most `max_chunks` pending chunks without blocking. A read
    /// failure is reported once; the stream then counts as finished.
    pub fn drain(&mut self, max_chunks: usize) -> Drained {
        let mut out = Drained::default();
        for _ in 0..max_chunks {
            if self.finished {
                break;
            }
            match self.rx.try_recv() {
                Ok(Message::Chunk(text)) => {
                    self.bytes += text.len() as u64;
                    out.text.push_str(&text);
                }
                Ok(Message::Done) => self.finished = true,
                Ok(Message::Failed(reason)) => {
                    tracing::warn!(%reason, "input stream failed");
                    self.finished = true;
                    out.error = Some(TrawlError::StreamIo(reason));
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.finished = true;
                    out.error = Some(TrawlError::StreamIo("reader thread exited".to_string()));
                }
            }
        }
        out.finished = self.finished;
        out
    }
}

fn split_complete_lines(pending: &mut Vec<u8>) -> Option<String> {
    let cut = pending.iter().rposition(|&b| b == b'\n')? + 1;
    let rest = pending.split_off(cut);
    let lines = std::mem::replace(pending, rest);
    Some(String::from_utf8_lossy(&lines).into_owned())
}

fn flush_tail(pending: &mut Vec<u8>, tx: &SyncSender<Message>) -> bool {
    if pending.is_empty() {
        return true;
    }
    let mut tail = String::from_utf8_lossy(pending).into_owned();
    pending.clear();
    tail.push('\n');
    tx.send(Message::Chunk(tail)).is_ok()
}

fn read_loop<R: Read>(mut reader: R, options: IngestOptions, tx: SyncSender<Message>) {
    let mut buf = vec![0u8; options.chunk_bytes.max(1)];
    let mut pending = Vec::new();
    let mut total: u64 = 0;
    loop {
        if options.max_bytes.is_some_and(|max| total >= max) {
            break;
        }
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                total += n as u64;
                pending.extend_from_slice(&buf[..n]);
                if let Some(lines) = split_complete_lines(&mut pending) {
                    // receiver gone: nobody wants the rest
                    if tx.send(Message::Chunk(lines)).is_err() {
                        return;
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                if flush_tail(&mut pending, &tx) {
                    let _ = tx.send(Message::Failed(err.to_string()));
                }
                return;
            }
        }
    }
    if flush_tail(&mut pending, &tx) {
        let _ = tx.send(Message::Done);
    }
}

#[cfg(test)]
mod tests {
    use super::{Drained, Ingest, IngestOptions};
    use crate::error::TrawlError;
    use std::io::{self, Cursor, Read};
    use std::time::{Duration, Instant};

    fn collect(ingest: &mut Ingest) -> (String, Vec<Drained>) {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut text = String::new();
        let mut batches = Vec::new();
        while !ingest.is_finished() {
            assert!(Instant::now() < deadline, "ingest did not finish");
            let drained = ingest.drain(4);
            text.push_str(&drained.text);
            batches.push(drained);
            std::thread::sleep(Duration::from_millis(1));
        }
        (text, batches)
    }

    #[test]
    fn chunks_hold_whole_lines_only() {
        let input = "first line\nsecond\nthird without newline";
        let options = IngestOptions {
            chunk_bytes: 5,
            max_bytes: None,
        };
        let mut ingest = Ingest::spawn(Cursor::new(input.as_bytes().to_vec()), options);
        let (text, batches) = collect(&mut ingest);
        assert_eq!(text, "first line\nsecond\nthird without newline\n");
        assert!(batches.iter().all(|b| b.text.is_empty() || b.text.ends_with('\n')));
        assert!(batches.iter().all(|b| b.error.is_none()));
        assert_eq!(ingest.bytes_read(), text.len() as u64);
    }

    #[test]
    fn byte_limit_stops_reading() {
        let input: String = (0..100).map(|i| format!("{i}\n")).collect();
        let options = IngestOptions {
            chunk_bytes: 10,
            max_bytes: Some(20),
        };
        let mut ingest = Ingest::spawn(Cursor::new(input.into_bytes()), options);
        let (text, _) = collect(&mut ingest);
        assert!(text.len() < 40);
        assert!(text.starts_with("0\n1\n"));
    }

    struct FailAfter {
        data: Cursor<Vec<u8>>,
    }

    impl Read for FailAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.data.read(buf)? {
                0 => Err(io::Error::other("device gone")),
                n => Ok(n),
            }
        }
    }

    #[test]
    fn read_error_is_reported_once_with_buffered_text() {
        let reader = FailAfter {
            data: Cursor::new(b"one\ntwo".to_vec()),
        };
        let mut ingest = Ingest::spawn(reader, IngestOptions::default());
        let (text, batches) = collect(&mut ingest);
        assert_eq!(text, "one\ntwo\n");
        let errors: Vec<_> = batches.iter().filter_map(|b| b.error.as_ref()).collect();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], TrawlError::StreamIo(msg) if msg.contains("device gone")));
        assert!(ingest.drain(4).error.is_none());
    }
}
