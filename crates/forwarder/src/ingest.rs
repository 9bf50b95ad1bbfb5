//! Newline-delimited change-record input

use crate::pipeline::{ChangeRecord, Forwarder, ForwarderError, ForwarderStats};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{error, warn};

/// Feed NDJSON change records from `reader` into `forwarder` until EOF
///
/// Lines that are not a valid record (including non-UTF-8 bytes) are
/// logged, counted as malformed and skipped. The forwarder is always shut
/// down before returning, so queued records are drained even when reading
/// fails. A fatal store failure takes precedence over an input error.
pub async fn run<R>(mut reader: R, forwarder: Forwarder) -> Result<ForwarderStats, ForwarderError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(4096);
    let mut line_number: u64 = 0;
    let mut input_error = None;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                error!(line = line_number + 1, error = %e, "Failed to read change stream");
                input_error = Some(e);
                break;
            }
        }
        line_number += 1;

        let line = trim_line(&buf);
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let record: ChangeRecord = match serde_json::from_slice(line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = line_number, error = %e, "Skipping malformed change record");
                forwarder.note_malformed();
                continue;
            }
        };

        match forwarder.submit(record).await {
            Ok(()) => {}
            Err(ForwarderError::Halted) => break,
            Err(e) => {
                // submit only fails with Halted today; drain before reporting anything else
                forwarder.shutdown().await?;
                return Err(e);
            }
        }
    }

    let stats = forwarder.shutdown().await?;
    match input_error {
        Some(e) => Err(ForwarderError::Input(e)),
        None => Ok(stats),
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
