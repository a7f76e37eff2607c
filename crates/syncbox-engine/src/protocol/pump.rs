//! Reader → processor → sink loops.

use tokio::io::{AsyncRead, AsyncReadExt};

use super::lines::LineBuffer;
use super::processor::{StreamProcessor, StreamStats};
use super::sink::OutputSink;

const READ_CHUNK: usize = 64 * 1024;

/// Copy framed lines from `reader` through `processor` into `sink` until
/// end of input, then flush. A raw processor gets its lines with any `\r`
/// intact.
///
/// Lines forwarded from one read are written and flushed before the next
/// read, so a live consumer sees them while the producer is still running
/// and a slow sink slows the reader down.
///
/// # Errors
///
/// Propagates read, write, and flush errors.
pub async fn pump<R>(
    reader: &mut R,
    processor: &mut StreamProcessor,
    sink: &mut OutputSink,
) -> std::io::Result<StreamStats>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut lines = if processor.is_raw() {
        LineBuffer::verbatim()
    } else {
        LineBuffer::new()
    };
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let mut forwarded = false;
        for line in lines.push(&chunk[..n]) {
            if let Some(out) = processor.process_line(&line) {
                sink.write_line(&out).await?;
                forwarded = true;
            }
        }
        if forwarded {
            sink.flush().await?;
        }
    }
    if let Some(line) = lines.finish() {
        if let Some(out) = processor.process_line(&line) {
            sink.write_line(&out).await?;
        }
    }
    sink.flush().await?;
    Ok(processor.stats())
}

/// Consume `reader` to the end without forwarding anything.
///
/// `LOG` lines are still re-emitted by the processor; anything it would
/// have forwarded is logged at debug.
///
/// # Errors
///
/// Propagates read errors.
pub async fn drain<R>(reader: &mut R, processor: &mut StreamProcessor) -> std::io::Result<StreamStats>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut lines = LineBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let emit = |processor: &mut StreamProcessor, line: &[u8]| {
        if let Some(out) = processor.process_line(line) {
            tracing::debug!(
                connector = processor.role().as_str(),
                line = %String::from_utf8_lossy(&out),
                "Connector output"
            );
        }
    };
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        for line in lines.push(&chunk[..n]) {
            emit(processor, &line);
        }
    }
    if let Some(line) = lines.finish() {
        emit(processor, &line);
    }
    Ok(processor.stats())
}
