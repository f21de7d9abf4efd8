//! Subject line analysis for multipart reassembly
//!
//! Binary posts encode structure in free-form subjects: part markers like
//! `(3/25)`, quoted filenames, `yEnc` tokens, size annotations. [`analyze`]
//! recovers `(collection_key, file_key, part_index, part_total,
//! inferred_filename)` from one subject string. The function is pure; NZB
//! grouping depends on its equivalence classes, so behavior changes here
//! must come with new test cases.

use regex::Regex;
use std::sync::LazyLock;

/// Bracketed part markers: `(n/m)`, `[n/m]`, `{n/m}`
static PART_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[(\[{](\d+)/(\d+)[)\]}]").unwrap());

/// Word-form part markers: `part n of m`
static PART_WORDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bpart\s+(\d+)\s+of\s+(\d+)\b").unwrap());

/// Quoted tokens, the usual way posters carry filenames
static QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""([^"]+)""#).unwrap());

/// Bare filename-looking tokens
static FILENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._-]+\.[A-Za-z0-9]{2,4}").unwrap());

/// yEnc encoding tokens
static YENC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\byEnc\b").unwrap());

/// Trailing size annotation: `(123456)` at end of subject
static TRAILING_SIZE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(\d+\)\s*$").unwrap());

/// File-of-set numbering: `file012 of 099`
static FILE_OF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bfile\s*\d+\s+of\s+\d+\b").unwrap());

/// Multi-volume suffixes: `.partNN`, `.rNN`, `.vol000+NN`
static VOLUME_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(?:part\d+|r\d{2,3}|vol\d+\+\d+(?:\.par2)?)").unwrap());

/// Trailing file extension followed by a quote, whitespace, or end.
/// (The regex crate has no lookahead, so the boundary is captured and
/// restored in the replacement.)
static TRAILING_EXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\.[A-Za-z0-9]{2,4}(["\s]|$)"#).unwrap());

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Structure recovered from one subject line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectInfo {
    /// Normalized collection identifier (lowercased, markers stripped)
    pub collection_key: String,
    /// Identifies one file within a collection
    pub file_key: String,
    /// 1-based part number; 1 when no marker present
    pub part_index: u32,
    /// Total parts; 1 when no marker present
    pub part_total: u32,
    /// Filename recovered from the subject, if any
    pub inferred_filename: Option<String>,
}

/// Byte span and values of the part marker chosen for the part fields
struct MarkerMatch {
    start: usize,
    end: usize,
    index: u32,
    total: u32,
}

/// Pick the part marker that drives `part_index`/`part_total`.
///
/// The rightmost bracketed `(n/m)` wins (the file-part counter; a leftmost
/// file-of-set counter is discarded for the part fields). Word-form
/// `part n of m` is a fallback when no bracketed marker exists.
fn select_part_marker(subject: &str) -> Option<MarkerMatch> {
    let bracketed = PART_MARKER
        .captures_iter(subject)
        .filter_map(|c| {
            let index: u32 = c[1].parse().ok()?;
            let total: u32 = c[2].parse().ok()?;
            if index == 0 || total == 0 {
                return None;
            }
            let m = c.get(0)?;
            Some(MarkerMatch {
                start: m.start(),
                end: m.end(),
                index,
                total,
            })
        })
        .last();
    if bracketed.is_some() {
        return bracketed;
    }

    PART_WORDS
        .captures_iter(subject)
        .filter_map(|c| {
            let index: u32 = c[1].parse().ok()?;
            let total: u32 = c[2].parse().ok()?;
            if index == 0 || total == 0 {
                return None;
            }
            let m = c.get(0)?;
            Some(MarkerMatch {
                start: m.start(),
                end: m.end(),
                index,
                total,
            })
        })
        .last()
}

/// Infer a filename from the subject.
///
/// The longest quoted token wins; with no quotes, the rightmost
/// filename-looking token is used.
fn infer_filename(subject: &str) -> Option<String> {
    let longest_quoted = QUOTED
        .captures_iter(subject)
        .map(|c| c[1].to_string())
        .max_by_key(|s| s.len());
    if longest_quoted.is_some() {
        return longest_quoted;
    }

    FILENAME
        .find_iter(subject)
        .last()
        .map(|m| m.as_str().to_string())
}

/// Normalize a subject into its collection key.
///
/// Strips yEnc tokens, trailing size annotations, part markers, file-of-set
/// numbering, multi-volume suffixes and extensions, then collapses
/// whitespace and lowercases. An empty result falls back to the subject
/// verbatim.
pub fn collection_key(subject: &str) -> String {
    let s = YENC.replace_all(subject, "");
    let s = TRAILING_SIZE.replace_all(s.trim_end(), "");
    let s = PART_MARKER.replace_all(&s, "");
    let s = PART_WORDS.replace_all(&s, "");
    let s = FILE_OF.replace_all(&s, "");
    let s = VOLUME_SUFFIX.replace_all(&s, "");
    let s = TRAILING_EXT.replace_all(&s, "$1");
    let s = WHITESPACE_RUN.replace_all(&s, " ");
    let s = s.trim().to_lowercase();

    if s.is_empty() {
        subject.to_string()
    } else {
        s
    }
}

/// Analyze one subject line
pub fn analyze(subject: &str) -> SubjectInfo {
    let marker = select_part_marker(subject);
    let (part_index, part_total) = marker
        .as_ref()
        .map(|m| (m.index, m.total))
        .unwrap_or((1, 1));

    let inferred_filename = infer_filename(subject);

    let file_key = match &inferred_filename {
        Some(name) => name.clone(),
        None => {
            // Subject minus the chosen part marker
            let stripped = match &marker {
                Some(m) => format!("{}{}", &subject[..m.start], &subject[m.end..]),
                None => subject.to_string(),
            };
            WHITESPACE_RUN.replace_all(stripped.trim(), " ").to_string()
        }
    };

    SubjectInfo {
        collection_key: collection_key(subject),
        file_key,
        part_index,
        part_total,
        inferred_filename,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_marker_defaults_to_single_part() {
        let info = analyze("just a text post");
        assert_eq!(info.part_index, 1);
        assert_eq!(info.part_total, 1);
        assert_eq!(info.inferred_filename, None);
        assert_eq!(info.file_key, "just a text post");
    }

    #[test]
    fn test_bracketed_marker_parsed() {
        let info = analyze("My Post \"movie.mkv\" (3/25) yEnc (500000)");
        assert_eq!(info.part_index, 3);
        assert_eq!(info.part_total, 25);
        assert_eq!(info.inferred_filename.as_deref(), Some("movie.mkv"));
        assert_eq!(info.file_key, "movie.mkv");
    }

    #[test]
    fn test_rightmost_marker_wins() {
        // Leftmost [2/10] counts files in the set; rightmost (3/7) is the
        // part counter for this file
        let info = analyze("[2/10] archive.part02.rar (3/7)");
        assert_eq!(info.part_index, 3);
        assert_eq!(info.part_total, 7);
    }

    #[test]
    fn test_square_and_brace_markers() {
        assert_eq!(analyze("stuff [4/9]").part_index, 4);
        assert_eq!(analyze("stuff [4/9]").part_total, 9);
        assert_eq!(analyze("stuff {2/5}").part_index, 2);
    }

    #[test]
    fn test_word_form_marker_fallback() {
        let info = analyze("big post part 7 of 12");
        assert_eq!(info.part_index, 7);
        assert_eq!(info.part_total, 12);

        // Bracketed form outranks word form regardless of position
        let info = analyze("part 7 of 12 whatever (1/3)");
        assert_eq!(info.part_index, 1);
        assert_eq!(info.part_total, 3);
    }

    #[test]
    fn test_zero_marker_rejected() {
        let info = analyze("broken (0/5)");
        assert_eq!(info.part_index, 1);
        assert_eq!(info.part_total, 1);
    }

    #[test]
    fn test_longest_quoted_filename_wins() {
        let info = analyze("\"a.nfo\" plus \"some-long-name.mkv\" (1/2)");
        assert_eq!(
            info.inferred_filename.as_deref(),
            Some("some-long-name.mkv")
        );
    }

    #[test]
    fn test_unquoted_filename_rightmost() {
        let info = analyze("readme.txt versus payload.bin (1/2)");
        assert_eq!(info.inferred_filename.as_deref(), Some("payload.bin"));
    }

    #[test]
    fn test_collection_key_invariant_under_part_index() {
        assert_eq!(collection_key("Foo (1/10)"), collection_key("Foo (5/10)"));
        assert_eq!(
            collection_key("Set \"file.bin\" (1/3) yEnc"),
            collection_key("Set \"file.bin\" (2/3) yEnc")
        );
    }

    #[test]
    fn test_collection_key_normalization() {
        let key = collection_key("My Show \"ep01.mkv\" (3/25) yEnc (750000)");
        assert_eq!(key, "my show \"ep01\"");

        // Volume suffixes collapse to the same collection
        assert_eq!(
            collection_key("archive.part01.rar (1/5)"),
            collection_key("archive.part02.rar (1/5)")
        );
    }

    #[test]
    fn test_collection_key_strips_file_numbering() {
        assert_eq!(
            collection_key("big set file001 of 200 \"a.bin\" (1/9)"),
            collection_key("big set file002 of 200 \"a.bin\" (2/9)")
        );
    }

    #[test]
    fn test_collection_key_empty_falls_back_verbatim() {
        // Subject that normalizes away entirely keeps its original form
        assert_eq!(collection_key("(1/2)"), "(1/2)");
        assert_eq!(collection_key("yEnc"), "yEnc");
    }

    #[test]
    fn test_determinism() {
        let subject = "Random \"thing.rar\" [02/48] yEnc (1234)";
        assert_eq!(analyze(subject), analyze(subject));
    }

    #[test]
    fn test_file_key_without_filename_strips_marker() {
        let info = analyze("some post without quotes (2/4)");
        assert_eq!(info.file_key, "some post without quotes");
    }
}
