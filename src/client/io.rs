//! Low-level I/O for the NNTP protocol
//!
//! Command transmission, single-line response parsing, and dot-terminated
//! multiline streaming with byte-unstuffing. Usenet headers are frequently
//! mis-encoded, so every inbound line goes through lossy UTF-8 conversion.

use super::NntpClient;
use crate::commands;
use crate::error::{IndexError, Result};
use crate::response::NntpResponse;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::trace;

/// Per-read socket timeout
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Strip NNTP byte-stuffing from a line (leading ".." becomes ".")
fn strip_byte_stuffing(line: &str) -> &str {
    if line.starts_with("..") {
        &line[1..]
    } else {
        line
    }
}

impl NntpClient {
    /// Send a command to the server
    pub(super) async fn send_command(&mut self, command: &str) -> Result<()> {
        trace!("Sending command: {}", command.trim());
        let result: Result<()> = async {
            self.stream.get_mut().write_all(command.as_bytes()).await?;
            self.stream.get_mut().flush().await?;
            Ok(())
        }
        .await;
        if result.is_err() {
            self.mark_broken();
        }
        result
    }

    /// Read one line with the socket read timeout, lossy-decoded
    ///
    /// Returns the line without its trailing CRLF. An empty read means the
    /// peer closed the connection.
    async fn read_line(&mut self) -> Result<String> {
        let read_future = async {
            let mut line_bytes = Vec::with_capacity(512);
            self.stream.read_until(b'\n', &mut line_bytes).await?;

            if line_bytes.is_empty() {
                return Err(IndexError::ConnectionClosed);
            }

            let line = String::from_utf8_lossy(&line_bytes);
            Ok(line.trim_end_matches(['\r', '\n']).to_string())
        };

        let result = timeout(READ_TIMEOUT, read_future)
            .await
            .map_err(|_| IndexError::Timeout)
            .and_then(|r| r);

        if result.is_err() {
            self.mark_broken();
        }
        result
    }

    /// Read a single-line status response
    pub(super) async fn read_response(&mut self) -> Result<NntpResponse> {
        let line = self.read_line().await?;
        trace!("Received: {}", line);

        let result = commands::parse_single_response(&line);
        if let Err(IndexError::InvalidResponse(_)) = &result {
            self.mark_broken();
        }
        result
    }

    /// Read a dot-terminated multiline body, yielding unstuffed lines
    ///
    /// The status line must already have been consumed. Each line is read
    /// under the socket timeout; a connection that stalls mid-stream
    /// surfaces as [`IndexError::Timeout`] and marks the session broken.
    pub(super) async fn read_multiline_body(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::with_capacity(64);
        loop {
            let line = self.read_line().await?;

            if line == "." {
                break;
            }

            lines.push(strip_byte_stuffing(&line).to_string());
        }
        Ok(lines)
    }
}
