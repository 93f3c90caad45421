//! Splits a multiplexed container log stream into stdout and stderr.
//!
//! Each frame is an 8 byte header followed by the payload:
//!
//! ```text
//! [selector: u8][0, 0, 0][length: u32 big-endian][payload; length]
//! ```
//!
//! Selector 1 is stdout, 2 is stderr. Collection is all-or-nothing: a
//! malformed frame discards everything read so far.

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{BencherError, Result};

pub const STDOUT: u8 = 1;
pub const STDERR: u8 = 2;
/// Engines use this selector to report their own failure in-band.
pub const SYSTEM_ERROR: u8 = 3;

const HEADER_LEN: usize = 8;

/// Lengths come off the wire; don't trust them for allocation.
const MAX_PREALLOC: usize = 64 * 1024;

/// Captured output of one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Encode one frame.
pub fn frame(selector: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(selector);
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Fill `header`, returning false on a clean end of stream before any byte.
async fn read_header<R: AsyncRead + Unpin>(
    reader: &mut R,
    header: &mut [u8; HEADER_LEN],
) -> Result<bool> {
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(BencherError::Demux(format!(
                "truncated frame header ({filled} of {HEADER_LEN} bytes)"
            )));
        }
        filled += n;
    }
    Ok(true)
}

/// Read `reader` to the end and demultiplex it.
pub async fn demux<R: AsyncRead + Unpin>(mut reader: R) -> Result<LogOutput> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut header = [0u8; HEADER_LEN];

    while read_header(&mut reader, &mut header).await? {
        let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

        let mut payload = Vec::with_capacity(len.min(MAX_PREALLOC));
        let read = (&mut reader)
            .take(len as u64)
            .read_to_end(&mut payload)
            .await?;
        if read < len {
            return Err(BencherError::Demux(format!(
                "truncated payload ({read} of {len} bytes)"
            )));
        }

        match header[0] {
            STDOUT => stdout.extend_from_slice(&payload),
            STDERR => stderr.extend_from_slice(&payload),
            SYSTEM_ERROR => {
                return Err(BencherError::Demux(format!(
                    "engine error in log stream: {}",
                    String::from_utf8_lossy(&payload).trim_end()
                )))
            }
            other => {
                return Err(BencherError::Demux(format!(
                    "unknown stream selector {other}"
                )))
            }
        }
    }

    Ok(LogOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}
