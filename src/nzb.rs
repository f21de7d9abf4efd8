//! NZB synthesis from indexed overview rows
//!
//! Rows are bucketed into files by `(collection_key, file_key, part_total)`
//! and files into collections by `(poster, collection_key)`. Completeness is
//! a file whose observed part set is exactly `{1..part_total}`. Emission is
//! deterministic: files ordered by `(min article_num, file_key)`, segments by
//! part number, one document for the whole set or one per collection.

use crate::overview::OverviewRow;
use crate::subject::{self, SubjectInfo};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use tracing::{debug, warn};

/// Assembly options
#[derive(Debug, Clone, Copy, Default)]
pub struct NzbOptions {
    /// Drop files whose part set is not exactly `{1..part_total}`
    pub require_complete_sets: bool,
}

/// One reassembled file: a set of parts sharing
/// `(collection_key, file_key, part_total)`
#[derive(Debug, Clone)]
pub struct FileSet {
    /// Normalized collection identifier
    pub collection_key: String,
    /// Identifies this file within the collection
    pub file_key: String,
    /// Total parts announced by the subject
    pub part_total: u32,
    /// Poster of the earliest part
    pub poster: String,
    /// Part index → overview row; first-seen row wins on duplicates
    pub parts: BTreeMap<u32, OverviewRow>,
}

impl FileSet {
    /// True when every part `1..=part_total` was observed
    pub fn is_complete(&self) -> bool {
        self.parts.len() as u32 == self.part_total
            && (1..=self.part_total).all(|n| self.parts.contains_key(&n))
    }

    /// Lowest article number across observed parts
    pub fn min_article_num(&self) -> u64 {
        self.parts
            .values()
            .map(|r| r.article_num)
            .min()
            .unwrap_or(u64::MAX)
    }

    /// The part with the lowest article number
    pub fn earliest_part(&self) -> Option<&OverviewRow> {
        self.parts.values().min_by_key(|r| r.article_num)
    }
}

/// Key identifying one file bucket
type FileKey = (String, String, u32);

/// Bucket rows into files.
///
/// Rows must arrive in ascending `article_num` (the store's query order).
/// Subjects that carry nothing but a part marker (continuation posts with
/// no base text) adopt the most recent file from the same poster with the
/// same `part_total`, which is how multi-part posts with truncated
/// continuation subjects reassemble.
pub fn bucket_files(rows: Vec<OverviewRow>) -> Vec<FileSet> {
    let mut order: Vec<FileKey> = Vec::new();
    let mut files: HashMap<FileKey, FileSet> = HashMap::new();
    // (poster, part_total) → key of the file a continuation should join
    let mut last_file_for: HashMap<(String, u32), FileKey> = HashMap::new();

    for row in rows {
        if row.message_id.is_empty() {
            continue;
        }

        let info: SubjectInfo = subject::analyze(&row.subject);

        if info.file_key.is_empty() {
            let adopt = last_file_for
                .get(&(row.from_addr.clone(), info.part_total))
                .cloned();
            if let Some(key) = adopt {
                if let Some(file) = files.get_mut(&key) {
                    file.parts.entry(info.part_index).or_insert(row);
                    continue;
                }
            }
        }

        let key: FileKey = (
            info.collection_key.clone(),
            info.file_key.clone(),
            info.part_total,
        );

        let file = files.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            FileSet {
                collection_key: info.collection_key.clone(),
                file_key: info.file_key.clone(),
                part_total: info.part_total,
                poster: row.from_addr.clone(),
                parts: BTreeMap::new(),
            }
        });

        last_file_for.insert((row.from_addr.clone(), info.part_total), key);
        file.parts.entry(info.part_index).or_insert(row);
    }

    order
        .into_iter()
        .filter_map(|key| files.remove(&key))
        .collect()
}

/// Bucket rows into files and apply the completeness policy
pub fn assemble(rows: Vec<OverviewRow>, options: NzbOptions) -> Vec<FileSet> {
    let files = bucket_files(rows);
    let total = files.len();

    let files: Vec<FileSet> = if options.require_complete_sets {
        files
            .into_iter()
            .filter(|f| {
                let complete = f.is_complete();
                if !complete {
                    let missing: Vec<u32> = (1..=f.part_total)
                        .filter(|n| !f.parts.contains_key(n))
                        .collect();
                    warn!(
                        "Dropping incomplete file '{}' ({}/{} parts, missing {:?})",
                        f.file_key,
                        f.parts.len(),
                        f.part_total,
                        missing
                    );
                }
                complete
            })
            .collect()
    } else {
        files
    };

    debug!("Assembled {} files ({} before completeness check)", files.len(), total);
    files
}

/// Emit one NZB document for a set of files
///
/// Files are written in ascending `(min article_num, file_key)` order; each
/// file's `date` and `subject` attributes come from its earliest part, and
/// segment message-ids are stripped of their angle brackets.
pub fn build_nzb_xml(files: &[FileSet], group_name: &str) -> String {
    let mut files: Vec<&FileSet> = files.iter().collect();
    files.sort_by(|a, b| {
        a.min_article_num()
            .cmp(&b.min_article_num())
            .then_with(|| a.file_key.cmp(&b.file_key))
    });

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    let mut nzb_elem = BytesStart::new("nzb");
    nzb_elem.push_attribute(("xmlns", "http://www.newzbin.com/DTD/2003/nzb"));
    // Writing into an in-memory cursor cannot fail
    writer.write_event(Event::Start(nzb_elem)).unwrap();

    for file in files {
        let earliest = match file.earliest_part() {
            Some(part) => part,
            None => continue,
        };

        let date = earliest.date_unix.unwrap_or(0);
        let mut file_elem = BytesStart::new("file");
        // push_attribute escapes &, <, >, " in attribute values
        file_elem.push_attribute(("poster", file.poster.as_str()));
        file_elem.push_attribute(("date", date.to_string().as_str()));
        file_elem.push_attribute(("subject", earliest.subject.as_str()));
        writer.write_event(Event::Start(file_elem)).unwrap();

        writer
            .write_event(Event::Start(BytesStart::new("groups")))
            .unwrap();
        writer
            .write_event(Event::Start(BytesStart::new("group")))
            .unwrap();
        writer
            .write_event(Event::Text(BytesText::new(group_name)))
            .unwrap();
        writer
            .write_event(Event::End(BytesEnd::new("group")))
            .unwrap();
        writer
            .write_event(Event::End(BytesEnd::new("groups")))
            .unwrap();

        writer
            .write_event(Event::Start(BytesStart::new("segments")))
            .unwrap();
        // BTreeMap iteration is already ascending by part number
        for (number, row) in &file.parts {
            let mut seg_elem = BytesStart::new("segment");
            seg_elem.push_attribute(("bytes", row.bytes_len.unwrap_or(0).to_string().as_str()));
            seg_elem.push_attribute(("number", number.to_string().as_str()));
            writer.write_event(Event::Start(seg_elem)).unwrap();
            writer
                .write_event(Event::Text(BytesText::new(strip_angle_brackets(
                    &row.message_id,
                ))))
                .unwrap();
            writer
                .write_event(Event::End(BytesEnd::new("segment")))
                .unwrap();
        }
        writer
            .write_event(Event::End(BytesEnd::new("segments")))
            .unwrap();

        writer.write_event(Event::End(BytesEnd::new("file"))).unwrap();
    }

    writer.write_event(Event::End(BytesEnd::new("nzb"))).unwrap();

    let body = writer.into_inner().into_inner();
    let body_str = String::from_utf8(body).unwrap();

    let mut result = String::new();
    result.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    result.push_str(
        "<!DOCTYPE nzb PUBLIC \"-//newzBin//DTD NZB 1.1//EN\" \"http://www.newzbin.com/DTD/nzb/nzb-1.1.dtd\">\n",
    );
    result.push_str(&body_str);
    result
}

/// Strip surrounding `<>` from a message-id for segment text
fn strip_angle_brackets(message_id: &str) -> &str {
    let id = message_id.trim();
    if id.starts_with('<') && id.ends_with('>') && id.len() >= 2 {
        &id[1..id.len() - 1]
    } else {
        id
    }
}

/// Replace characters outside `[A-Za-z0-9._-]` with `_`, capped at 180 chars
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(180)
        .collect()
}

/// Build one NZB per (poster, collection)
///
/// Returns `(filename, xml)` pairs in deterministic (poster, collection)
/// order. Filenames are `sanitize(poster)__sanitize(collection).nzb`;
/// collisions get `-2`, `-3`, … appended to the stem.
pub fn build_grouped_nzbs(
    rows: Vec<OverviewRow>,
    group_name: &str,
    options: NzbOptions,
) -> Vec<(String, String)> {
    let files = assemble(rows, options);

    // BTreeMap keyed by (poster, collection_key) for stable output order
    let mut collections: BTreeMap<(String, String), Vec<FileSet>> = BTreeMap::new();
    for file in files {
        collections
            .entry((file.poster.clone(), file.collection_key.clone()))
            .or_default()
            .push(file);
    }

    let mut results = Vec::with_capacity(collections.len());
    let mut name_counts: HashMap<String, u32> = HashMap::new();

    for ((poster, collection_key), files) in collections {
        if files.is_empty() {
            continue;
        }

        let stem = format!("{}__{}", sanitize(&poster), sanitize(&collection_key));
        let count = name_counts.entry(stem.clone()).or_insert(0);
        *count += 1;
        let filename = if *count > 1 {
            format!("{}-{}.nzb", stem, count)
        } else {
            format!("{}.nzb", stem)
        };

        let xml = build_nzb_xml(&files, group_name);
        results.push((filename, xml));
    }

    debug!("Built {} grouped NZB documents", results.len());
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(artnum: u64, subject: &str, from: &str, message_id: &str) -> OverviewRow {
        OverviewRow {
            article_num: artnum,
            group_name: "alt.binaries.test".to_string(),
            subject: subject.to_string(),
            from_addr: from.to_string(),
            date_raw: "Mon, 01 Jan 2024 00:00:00 +0000".to_string(),
            date_unix: Some(1_704_067_200),
            message_id: message_id.to_string(),
            bytes_len: Some(42),
            line_count: Some(3),
            xref: String::new(),
        }
    }

    #[test]
    fn test_bucket_multipart_file() {
        let rows = vec![
            row(1, "Post \"a.bin\" (1/3) yEnc", "Bob", "<p1@x>"),
            row(2, "Post \"a.bin\" (2/3) yEnc", "Bob", "<p2@x>"),
            row(3, "Post \"a.bin\" (3/3) yEnc", "Bob", "<p3@x>"),
        ];
        let files = bucket_files(rows);
        assert_eq!(files.len(), 1);
        assert!(files[0].is_complete());
        assert_eq!(files[0].parts.len(), 3);
        assert_eq!(files[0].poster, "Bob");
    }

    #[test]
    fn test_continuation_subjects_adopt_previous_file() {
        let rows = vec![
            row(1, "Set \"file.bin\" (1/3) yEnc", "Bob", "<p1@x>"),
            row(2, "(2/3)", "Bob", "<p2@x>"),
            row(3, "(3/3)", "Bob", "<p3@x>"),
        ];
        let files = bucket_files(rows);
        assert_eq!(files.len(), 1);
        assert!(files[0].is_complete());
        assert_eq!(
            files[0].parts.keys().copied().collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_continuation_does_not_cross_posters() {
        let rows = vec![
            row(1, "Set \"file.bin\" (1/2) yEnc", "Bob", "<p1@x>"),
            row(2, "(2/2)", "Eve", "<p2@x>"),
        ];
        let files = bucket_files(rows);
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_incomplete_file_dropped_when_required() {
        let rows = vec![
            row(1, "Set \"file.bin\" (1/3) yEnc", "Bob", "<p1@x>"),
            row(3, "(3/3)", "Bob", "<p3@x>"),
        ];
        let files = assemble(
            rows,
            NzbOptions {
                require_complete_sets: true,
            },
        );
        assert!(files.is_empty());
    }

    #[test]
    fn test_incomplete_file_kept_when_not_required() {
        let rows = vec![row(1, "Set \"file.bin\" (1/3) yEnc", "Bob", "<p1@x>")];
        let files = assemble(rows, NzbOptions::default());
        assert_eq!(files.len(), 1);
        assert!(!files[0].is_complete());
    }

    #[test]
    fn test_duplicate_part_first_article_wins() {
        let rows = vec![
            row(1, "Post \"a.bin\" (1/1) yEnc", "Bob", "<first@x>"),
            row(2, "Post \"a.bin\" (1/1) yEnc", "Bob", "<second@x>"),
        ];
        let files = bucket_files(rows);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].parts[&1].message_id, "<first@x>");
    }

    #[test]
    fn test_xml_shape() {
        let rows = vec![
            row(1, "Post \"a.bin\" (1/2) yEnc", "Bob <bob@x>", "<p1@x>"),
            row(2, "Post \"a.bin\" (2/2) yEnc", "Bob <bob@x>", "<p2@x>"),
        ];
        let files = assemble(rows, NzbOptions::default());
        let xml = build_nzb_xml(&files, "alt.binaries.test");

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n"));
        assert!(xml.contains(
            "<!DOCTYPE nzb PUBLIC \"-//newzBin//DTD NZB 1.1//EN\" \"http://www.newzbin.com/DTD/nzb/nzb-1.1.dtd\">"
        ));
        assert!(xml.contains("<nzb xmlns=\"http://www.newzbin.com/DTD/2003/nzb\">"));
        // Poster attribute is escaped
        assert!(xml.contains("poster=\"Bob &lt;bob@x&gt;\""));
        assert!(xml.contains("date=\"1704067200\""));
        // Message-ids lose their angle brackets
        assert!(xml.contains(">p1@x</segment>"));
        assert!(!xml.contains(">&lt;p1@x&gt;<"));
        assert!(xml.contains("number=\"1\""));
        assert!(xml.contains("number=\"2\""));
        assert!(xml.contains("<group>alt.binaries.test</group>"));
    }

    #[test]
    fn test_file_order_by_min_article_num() {
        let rows = vec![
            row(5, "Later \"b.bin\" (1/1) yEnc", "Bob", "<b@x>"),
            row(1, "Early \"a.bin\" (1/1) yEnc", "Bob", "<a@x>"),
        ];
        let files = assemble(rows, NzbOptions::default());
        let xml = build_nzb_xml(&files, "g");
        let a_pos = xml.find("a@x").unwrap();
        let b_pos = xml.find("b@x").unwrap();
        assert!(a_pos < b_pos);
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("Bob <bob@x.com>"), "Bob__bob_x.com_");
        assert_eq!(sanitize("my collection"), "my_collection");
        assert_eq!(sanitize("safe-name_1.0"), "safe-name_1.0");
        let long = "x".repeat(200);
        assert_eq!(sanitize(&long).len(), 180);
    }

    #[test]
    fn test_grouped_nzbs_one_per_collection() {
        let rows = vec![
            row(1, "Alpha \"a.bin\" (1/1) yEnc", "A <a@x>", "<a1@x>"),
            row(2, "Beta \"b.bin\" (1/1) yEnc", "B <b@x>", "<b1@x>"),
        ];
        let nzbs = build_grouped_nzbs(
            rows,
            "g",
            NzbOptions {
                require_complete_sets: true,
            },
        );
        assert_eq!(nzbs.len(), 2);
        assert!(nzbs[0].0.ends_with(".nzb"));
        assert_ne!(nzbs[0].0, nzbs[1].0);
        // Deterministic naming from sanitized poster + collection,
        // ordered by (poster, collection)
        assert!(nzbs[0].0.starts_with("A__a_x_"), "got {}", nzbs[0].0);
        assert!(nzbs[1].0.starts_with("B__b_x_"), "got {}", nzbs[1].0);
    }

    #[test]
    fn test_grouped_nzb_filename_collision_suffix() {
        // Same poster, distinct collections that sanitize to the same stem
        let rows = vec![
            row(1, "col a \"x.bin\" (1/1) yEnc", "P <p@x>", "<x@x>"),
            row(2, "col?a \"x.bin\" (1/1) yEnc", "P <p@x>", "<y@x>"),
        ];
        let nzbs = build_grouped_nzbs(rows, "g", NzbOptions::default());
        assert_eq!(nzbs.len(), 2);
        let names: Vec<&str> = nzbs.iter().map(|(n, _)| n.as_str()).collect();
        assert_ne!(names[0], names[1]);
        assert!(names.iter().any(|n| n.ends_with("-2.nzb")));
    }

    #[test]
    fn test_strip_angle_brackets() {
        assert_eq!(strip_angle_brackets("<m1@x>"), "m1@x");
        assert_eq!(strip_angle_brackets("m1@x"), "m1@x");
        assert_eq!(strip_angle_brackets("<>"), "");
    }
}
