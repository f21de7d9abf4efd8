//! Overview line parsing
//!
//! One XOVER line is tab-separated: `article_num`, `subject`, `from`, `date`,
//! `message_id`, `references`, `bytes`, `lines`, then optional trailing
//! headers such as `Xref:`. Malformed lines are dropped, never propagated;
//! callers count drops through [`ParseTally`].

use chrono::DateTime;
use tracing::trace;

/// One indexed article's overview metadata
///
/// `(group_name, article_num)` is the unique key. Numeric fields that the
/// server sent malformed are `None`; `date_raw` is preserved verbatim even
/// when `date_unix` could not be derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverviewRow {
    /// Numeric article id within the group
    pub article_num: u64,
    /// Newsgroup this row was fetched from
    pub group_name: String,
    /// Subject line, possibly empty
    pub subject: String,
    /// Raw From header, possibly empty
    pub from_addr: String,
    /// Server-supplied date field as received
    pub date_raw: String,
    /// Best-effort parse of `date_raw` as Unix seconds
    pub date_unix: Option<i64>,
    /// Message-id, normalized to `<...>` form
    pub message_id: String,
    /// Article size in bytes
    pub bytes_len: Option<u64>,
    /// Line count
    pub line_count: Option<u32>,
    /// Trailing Xref header, verbatim, or empty
    pub xref: String,
}

/// Counters for a parse pass over raw overview lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseTally {
    /// Lines successfully converted to rows
    pub parsed: u64,
    /// Lines dropped (too few fields, bad article number, empty message-id)
    pub parse_errors: u64,
}

impl ParseTally {
    /// Fold another tally into this one
    pub fn merge(&mut self, other: ParseTally) {
        self.parsed += other.parsed;
        self.parse_errors += other.parse_errors;
    }
}

/// Parse a date header into Unix seconds
///
/// Accepts RFC 5322/2822 forms. Some servers write `GMT` where the RFC wants
/// a numeric zone; normalize and retry before giving up.
pub fn parse_date_unix(date_raw: &str) -> Option<i64> {
    let date_raw = date_raw.trim();
    if date_raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(date_raw) {
        return Some(dt.timestamp());
    }

    if date_raw.contains("GMT") {
        let normalized = date_raw.replace("GMT", "+0000");
        if let Ok(dt) = DateTime::parse_from_rfc2822(&normalized) {
            return Some(dt.timestamp());
        }
    }

    None
}

/// Normalize a message-id to `<...>` form
///
/// Ids missing their angle brackets are accepted and wrapped; empty ids are
/// rejected (the row is useless for NZB emission without one).
fn normalize_message_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "<>" {
        return None;
    }
    if raw.starts_with('<') && raw.ends_with('>') {
        Some(raw.to_string())
    } else {
        Some(format!("<{}>", raw.trim_matches(['<', '>'])))
    }
}

/// Parse one raw XOVER line into an [`OverviewRow`]
///
/// Returns `None` for lines that must be dropped:
/// - fewer than 8 tab-separated fields,
/// - an article number that does not parse,
/// - an empty message-id.
///
/// `bytes` and `lines` fields that fail to parse become `None` without
/// dropping the row, and any `Xref:` field among the trailing optional
/// headers is captured verbatim.
pub fn parse_overview_line(group: &str, line: &str) -> Option<OverviewRow> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 8 {
        trace!("Dropping short overview line ({} fields)", fields.len());
        return None;
    }

    let article_num = match fields[0].trim().parse::<u64>() {
        Ok(num) => num,
        Err(_) => {
            trace!("Dropping overview line with bad article number: {}", fields[0]);
            return None;
        }
    };

    let message_id = match normalize_message_id(fields[4]) {
        Some(id) => id,
        None => {
            trace!("Dropping overview line {} with empty message-id", article_num);
            return None;
        }
    };

    let date_raw = fields[3].to_string();

    Some(OverviewRow {
        article_num,
        group_name: group.to_string(),
        subject: fields[1].to_string(),
        from_addr: fields[2].to_string(),
        date_unix: parse_date_unix(&date_raw),
        date_raw,
        message_id,
        bytes_len: fields[6].trim().parse().ok(),
        line_count: fields[7].trim().parse().ok(),
        xref: fields[8..]
            .iter()
            .find(|f| f.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("xref:")))
            .map(|f| f.to_string())
            .unwrap_or_default(),
    })
}

/// Parse a batch of raw lines, tallying drops
pub fn parse_overview_lines(group: &str, lines: &[String]) -> (Vec<OverviewRow>, ParseTally) {
    let mut rows = Vec::with_capacity(lines.len());
    let mut tally = ParseTally::default();
    for line in lines {
        match parse_overview_line(group, line) {
            Some(row) => {
                rows.push(row);
                tally.parsed += 1;
            }
            None => tally.parse_errors += 1,
        }
    }
    (rows, tally)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP: &str = "alt.binaries.test";

    #[test]
    fn test_parse_standard_line() {
        let line = "12345\tTest Subject\tauthor@example.com\tMon, 01 Jan 2024 00:00:00 +0000\t<msg@id>\t<ref@id>\t1234\t50";
        let row = parse_overview_line(GROUP, line).unwrap();

        assert_eq!(row.article_num, 12345);
        assert_eq!(row.group_name, GROUP);
        assert_eq!(row.subject, "Test Subject");
        assert_eq!(row.from_addr, "author@example.com");
        assert_eq!(row.message_id, "<msg@id>");
        assert_eq!(row.bytes_len, Some(1234));
        assert_eq!(row.line_count, Some(50));
        assert_eq!(row.date_unix, Some(1_704_067_200));
        assert_eq!(row.xref, "");
    }

    #[test]
    fn test_short_line_dropped() {
        assert!(parse_overview_line(GROUP, "12345\tSubject\tFrom\tDate\t<m@x>\t\t42").is_none());
        assert!(parse_overview_line(GROUP, "").is_none());
    }

    #[test]
    fn test_bad_article_number_dropped() {
        let line = "not-a-number\tSubject\tFrom\tDate\t<m@x>\t\t42\t3";
        assert!(parse_overview_line(GROUP, line).is_none());
    }

    #[test]
    fn test_empty_message_id_dropped() {
        let line = "1\tSubject\tFrom\tDate\t\t\t42\t3";
        assert!(parse_overview_line(GROUP, line).is_none());
        let line = "1\tSubject\tFrom\tDate\t<>\t\t42\t3";
        assert!(parse_overview_line(GROUP, line).is_none());
    }

    #[test]
    fn test_message_id_bracket_normalization() {
        let line = "1\tSubject\tFrom\tDate\tm1@example\t\t42\t3";
        let row = parse_overview_line(GROUP, line).unwrap();
        assert_eq!(row.message_id, "<m1@example>");
    }

    #[test]
    fn test_unparseable_numerics_become_null() {
        let line = "1\tSubject\tFrom\tDate\t<m@x>\t\tlots\tmany";
        let row = parse_overview_line(GROUP, line).unwrap();
        assert_eq!(row.bytes_len, None);
        assert_eq!(row.line_count, None);
    }

    #[test]
    fn test_bad_date_preserved_raw() {
        let line = "1\tSubject\tFrom\tsome day eventually\t<m@x>\t\t42\t3";
        let row = parse_overview_line(GROUP, line).unwrap();
        assert_eq!(row.date_unix, None);
        assert_eq!(row.date_raw, "some day eventually");
    }

    #[test]
    fn test_xref_captured_verbatim() {
        let line =
            "1\tSubject\tFrom\tDate\t<m@x>\t\t42\t3\tXref: news.example alt.binaries.test:1";
        let row = parse_overview_line(GROUP, line).unwrap();
        assert_eq!(row.xref, "Xref: news.example alt.binaries.test:1");
    }

    #[test]
    fn test_xref_found_among_several_trailing_fields() {
        let line = "1\tSubject\tFrom\tDate\t<m@x>\t\t42\t3\tLines: 3\txref: srv grp:1";
        let row = parse_overview_line(GROUP, line).unwrap();
        assert_eq!(row.xref, "xref: srv grp:1");
    }

    #[test]
    fn test_parse_date_variants() {
        assert_eq!(
            parse_date_unix("Mon, 01 Jan 2024 00:00:00 +0000"),
            Some(1_704_067_200)
        );
        // Obsolete GMT zone form
        assert_eq!(
            parse_date_unix("Mon, 01 Jan 2024 00:00:00 GMT"),
            Some(1_704_067_200)
        );
        assert_eq!(parse_date_unix(""), None);
        assert_eq!(parse_date_unix("tomorrow"), None);
    }

    #[test]
    fn test_batch_tally() {
        let lines = vec![
            "1\tA\tF\tMon, 01 Jan 2024 00:00:00 +0000\t<a@x>\t\t1\t1".to_string(),
            "garbage".to_string(),
            "2\tB\tF\tMon, 01 Jan 2024 00:00:01 +0000\t<b@x>\t\t1\t1".to_string(),
        ];
        let (rows, tally) = parse_overview_lines(GROUP, &lines);
        assert_eq!(rows.len(), 2);
        assert_eq!(tally.parsed, 2);
        assert_eq!(tally.parse_errors, 1);
    }
}
