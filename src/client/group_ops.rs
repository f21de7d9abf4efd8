//! Group selection and overview retrieval

use super::NntpClient;
use crate::commands::{self, GroupInfo};
use crate::error::{IndexError, Result};
use crate::response::codes;
use tracing::debug;

impl NntpClient {
    /// Select a newsgroup, skipping the round trip when already selected
    ///
    /// The GROUP response is cached per session; re-selecting the same group
    /// returns the cached `(count, low, high)` without touching the wire.
    ///
    /// # Errors
    ///
    /// - [`IndexError::NoSuchGroup`] - server answered 411
    /// - [`IndexError::Protocol`] / [`IndexError::InvalidResponse`] - anything else unexpected
    pub async fn select_group(&mut self, newsgroup: &str) -> Result<GroupInfo> {
        if let Some((current, info)) = &self.current_group {
            if current == newsgroup {
                return Ok(*info);
            }
        }

        debug!("Selecting newsgroup: {}", newsgroup);

        let cmd = commands::group(newsgroup);
        self.send_command(&cmd).await?;
        let response = self.read_response().await?;

        if response.code == codes::NO_SUCH_GROUP {
            return Err(IndexError::NoSuchGroup(newsgroup.to_string()));
        }

        let info = commands::parse_group_response(response)?;
        self.current_group = Some((newsgroup.to_string(), info));

        debug!(
            "Group {} selected: {} articles ({}-{})",
            newsgroup, info.count, info.first, info.last
        );
        Ok(info)
    }

    /// Fetch raw overview lines for an inclusive article-number range
    ///
    /// Sends `XOVER low-high` and streams the dot-terminated response. A
    /// group must be selected first. Lines are returned raw (tab-separated
    /// overview fields) for the overview parser.
    ///
    /// # Errors
    ///
    /// - [`IndexError::NoSuchRange`] - server answered 423; non-retryable
    /// - [`IndexError::Protocol`] - no group selected (412) or unexpected status
    pub async fn xover_lines(&mut self, low: u64, high: u64) -> Result<Vec<String>> {
        let cmd = commands::xover(low, high);
        self.send_command(&cmd).await?;
        let response = self.read_response().await?;

        match response.code {
            codes::OVERVIEW_INFO_FOLLOWS => {}
            codes::NO_SUCH_ARTICLE_NUMBER => {
                return Err(IndexError::NoSuchRange { low, high });
            }
            _ => {
                return Err(IndexError::Protocol {
                    code: response.code,
                    message: response.message,
                });
            }
        }

        let lines = self.read_multiline_body().await?;
        debug!("XOVER {}-{} returned {} lines", low, high, lines.len());
        Ok(lines)
    }

    /// Send QUIT and shut the stream down
    ///
    /// The response is read best-effort; servers commonly close the socket
    /// right after 205.
    pub async fn quit(&mut self) -> Result<()> {
        self.send_command(commands::quit()).await?;
        let _ = self.read_response().await;
        use tokio::io::AsyncWriteExt;
        let _ = self.stream.get_mut().shutdown().await;
        Ok(())
    }
}
