//! NNTP authentication (AUTHINFO USER/PASS)

use super::{ConnectionState, NntpClient};
use crate::commands;
use crate::error::{IndexError, Result};
use crate::response::codes;
use tracing::debug;

impl NntpClient {
    /// Authenticate with username and password
    ///
    /// Sends AUTHINFO USER, then AUTHINFO PASS when the server answers 381.
    /// Rejection codes 481/482/502 surface as [`IndexError::AuthFailed`].
    ///
    /// # Errors
    ///
    /// - [`IndexError::Protocol`] - already authenticated
    /// - [`IndexError::AuthFailed`] - credentials rejected
    /// - [`IndexError::ConnectionClosed`] / [`IndexError::Timeout`] - transport faults
    pub async fn authenticate(&mut self) -> Result<()> {
        debug!("Authenticating as {}", self.config.username);

        if matches!(self.state, ConnectionState::Authenticated) {
            return Err(IndexError::Protocol {
                code: codes::ACCESS_DENIED,
                message: "Already authenticated".to_string(),
            });
        }

        let cmd = commands::authinfo_user(&self.config.username);
        self.send_command(&cmd).await?;
        self.state = ConnectionState::InProgress;

        let response = self.read_response().await?;

        // Expect 381 (password required) or 281 (accepted outright)
        if response.code == codes::AUTH_CONTINUE {
            let cmd = commands::authinfo_pass(&self.config.password);
            self.send_command(&cmd).await?;
            let response = self.read_response().await?;

            if response.code != codes::AUTH_ACCEPTED {
                self.state = ConnectionState::Ready;
                return Err(IndexError::AuthFailed(response.message));
            }
        } else if response.code != codes::AUTH_ACCEPTED {
            self.state = ConnectionState::Ready;
            return Err(IndexError::AuthFailed(response.message));
        }

        self.state = ConnectionState::Authenticated;
        debug!("Authentication successful");
        Ok(())
    }
}
