//! NNTP command builders and response parsers

use crate::error::{IndexError, Result};
use crate::response::NntpResponse;

/// Build AUTHINFO USER command
pub fn authinfo_user(username: &str) -> String {
    format!("AUTHINFO USER {}\r\n", username)
}

/// Build AUTHINFO PASS command
pub fn authinfo_pass(password: &str) -> String {
    format!("AUTHINFO PASS {}\r\n", password)
}

/// Build GROUP command
pub fn group(newsgroup: &str) -> String {
    format!("GROUP {}\r\n", newsgroup)
}

/// Build XOVER command for an inclusive article-number range
pub fn xover(low: u64, high: u64) -> String {
    format!("XOVER {}-{}\r\n", low, high)
}

/// Build QUIT command
pub fn quit() -> &'static str {
    "QUIT\r\n"
}

/// Group information returned by the GROUP command
///
/// Contains the estimated article count and the low/high article numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupInfo {
    /// Estimated number of articles in the group
    pub count: u64,
    /// Number of the first article
    pub first: u64,
    /// Number of the last article
    pub last: u64,
}

/// Parse GROUP response to extract article count and range
///
/// Response format: "211 count first last group-name"
pub fn parse_group_response(response: NntpResponse) -> Result<GroupInfo> {
    if !response.is_success() {
        return Err(IndexError::Protocol {
            code: response.code,
            message: response.message,
        });
    }

    let parts: Vec<&str> = response.message.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(IndexError::InvalidResponse(response.message));
    }

    let count = parts[0]
        .parse()
        .map_err(|_| IndexError::InvalidResponse(response.message.clone()))?;
    let first = parts[1]
        .parse()
        .map_err(|_| IndexError::InvalidResponse(response.message.clone()))?;
    let last = parts[2]
        .parse()
        .map_err(|_| IndexError::InvalidResponse(response.message.clone()))?;

    Ok(GroupInfo { count, first, last })
}

/// Parse NNTP response line into code and message
pub fn parse_response_line(line: &str) -> Result<(u16, String)> {
    // Strip UTF-8 BOM if present (some broken servers/proxies add it)
    let line = line.trim_start_matches('\u{FEFF}');

    // Check minimum length and that first 3 chars are ASCII digits
    let bytes = line.as_bytes();
    if bytes.len() < 3
        || !bytes[0].is_ascii_digit()
        || !bytes[1].is_ascii_digit()
        || !bytes[2].is_ascii_digit()
    {
        return Err(IndexError::InvalidResponse(line.chars().take(100).collect()));
    }

    // Reject codes longer than three digits ("99999" must not parse as 999)
    if bytes.len() > 3 && bytes[3].is_ascii_digit() {
        return Err(IndexError::InvalidResponse(line.chars().take(100).collect()));
    }

    let code = line[0..3]
        .parse::<u16>()
        .map_err(|_| IndexError::InvalidResponse(line.chars().take(100).collect()))?;

    // Tolerate a missing space between code and message
    let message = if line.len() > 3 {
        if bytes[3] == b' ' {
            line[4..].to_string()
        } else {
            line[3..].to_string()
        }
    } else {
        String::new()
    };

    Ok((code, message))
}

/// Parse single-line NNTP response
pub fn parse_single_response(line: &str) -> Result<NntpResponse> {
    let (code, message) = parse_response_line(line)?;

    Ok(NntpResponse {
        code,
        message,
        lines: vec![],
    })
}
