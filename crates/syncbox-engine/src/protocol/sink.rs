//! Destinations for forwarded protocol lines.

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use syncbox_runtime::BoxedWriter;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

/// Where forwarded lines go.
pub enum OutputSink {
    /// Byte-identical lines, each terminated by `\n`.
    File(BufWriter<File>),
    /// Operator-facing lines framed as `<timestamp> [<tag>] <line>`.
    Terminal { out: BoxedWriter, tag: &'static str },
    /// Any async writer, typically a destination container's stdin.
    Writer(BufWriter<BoxedWriter>),
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(_) => f.write_str("OutputSink::File"),
            Self::Terminal { tag, .. } => write!(f, "OutputSink::Terminal({tag})"),
            Self::Writer(_) => f.write_str("OutputSink::Writer"),
        }
    }
}

impl OutputSink {
    /// Create (or truncate) `path`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from creating the file.
    pub async fn file(path: &Path) -> std::io::Result<Self> {
        let file = File::create(path).await?;
        Ok(Self::File(BufWriter::new(file)))
    }

    /// Process stdout, tagged `[SRC]`.
    #[must_use]
    pub fn terminal() -> Self {
        Self::framed(Box::new(tokio::io::stdout()), "SRC")
    }

    /// Timestamp-and-tag framing over an arbitrary writer.
    #[must_use]
    pub fn framed(out: BoxedWriter, tag: &'static str) -> Self {
        Self::Terminal { out, tag }
    }

    #[must_use]
    pub fn writer(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self::Writer(BufWriter::new(Box::new(writer)))
    }

    /// Write one line plus its terminator.
    ///
    /// # Errors
    ///
    /// Propagates write errors, including a broken pipe when a destination
    /// closes its stdin early.
    pub async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        match self {
            Self::File(out) => {
                out.write_all(line).await?;
                out.write_all(b"\n").await
            }
            Self::Writer(out) => {
                out.write_all(line).await?;
                out.write_all(b"\n").await
            }
            Self::Terminal { out, tag } => {
                let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
                let mut framed = format!("{stamp} [{tag}] ").into_bytes();
                framed.extend_from_slice(line);
                framed.push(b'\n');
                out.write_all(&framed).await
            }
        }
    }

    /// Flush buffered bytes.
    ///
    /// # Errors
    ///
    /// Propagates flush errors.
    pub async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::File(out) => out.flush().await,
            Self::Writer(out) => out.flush().await,
            Self::Terminal { out, .. } => out.flush().await,
        }
    }

    /// Flush and shut the sink down. For a destination's stdin this is what
    /// signals end of input.
    ///
    /// # Errors
    ///
    /// Propagates flush or shutdown errors.
    pub async fn close(mut self) -> std::io::Result<()> {
        self.flush().await?;
        match &mut self {
            Self::File(out) => out.shutdown().await,
            Self::Writer(out) => out.shutdown().await,
            Self::Terminal { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn file_sink_writes_lines_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let mut sink = OutputSink::file(&path).await.unwrap();
        sink.write_line(br#"{"type":"RECORD"}"#).await.unwrap();
        sink.write_line(b"second").await.unwrap();
        sink.close().await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "{\"type\":\"RECORD\"}\nsecond\n"
        );
    }

    #[tokio::test]
    async fn writer_sink_signals_eof_on_close() {
        let (tx, mut rx) = tokio::io::duplex(1024);
        let mut sink = OutputSink::writer(tx);
        sink.write_line(b"a").await.unwrap();
        sink.close().await.unwrap();
        let mut got = Vec::new();
        rx.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, b"a\n");
    }

    #[tokio::test]
    async fn terminal_sink_frames_with_timestamp_and_tag() {
        let (tx, mut rx) = tokio::io::duplex(1024);
        let mut sink = OutputSink::framed(Box::new(tx), "SRC");
        sink.write_line(br#"{"type":"RECORD"}"#).await.unwrap();
        sink.flush().await.unwrap();
        drop(sink);

        let mut got = String::new();
        rx.read_to_string(&mut got).await.unwrap();
        let (stamp, rest) = got.split_once(' ').unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok(), "{stamp}");
        assert_eq!(rest, "[SRC] {\"type\":\"RECORD\"}\n");
    }
}
