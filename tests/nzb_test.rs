//! NZB assembly and emission scenarios

use quick_xml::events::Event;
use quick_xml::Reader;
use usenet_index::nzb::{assemble, build_grouped_nzbs, build_nzb_xml, NzbOptions};
use usenet_index::overview::OverviewRow;

const GROUP: &str = "alt.binaries.test";

fn row(artnum: u64, subject: &str, from: &str, message_id: &str) -> OverviewRow {
    OverviewRow {
        article_num: artnum,
        group_name: GROUP.to_string(),
        subject: subject.to_string(),
        from_addr: from.to_string(),
        date_raw: "Mon, 01 Jan 2024 00:00:00 +0000".to_string(),
        date_unix: Some(1_704_067_200 + artnum as i64),
        message_id: message_id.to_string(),
        bytes_len: Some(768_000),
        line_count: Some(5000),
        xref: String::new(),
    }
}

const COMPLETE: NzbOptions = NzbOptions {
    require_complete_sets: true,
};

#[test]
fn test_multipart_completeness_scenario() {
    // Parts 1-3 with continuation subjects reassemble into one file
    let rows = vec![
        row(1, "Set \"file.bin\" (1/3) yEnc", "Bob", "<p1@x>"),
        row(2, "(2/3)", "Bob", "<p2@x>"),
        row(3, "(3/3)", "Bob", "<p3@x>"),
    ];

    let files = assemble(rows, COMPLETE);
    assert_eq!(files.len(), 1);

    let xml = build_nzb_xml(&files, GROUP);
    let segments = collect_segments(&xml);
    assert_eq!(segments.len(), 3);
    assert_eq!(
        segments.iter().map(|s| s.number).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(segments[0].message_id, "p1@x");
    assert_eq!(segments[2].message_id, "p3@x");
}

#[test]
fn test_multipart_incomplete_dropped() {
    // Only parts 1 and 3 present: the file is dropped
    let rows = vec![
        row(1, "Set \"file.bin\" (1/3) yEnc", "Bob", "<p1@x>"),
        row(3, "(3/3)", "Bob", "<p3@x>"),
    ];

    let files = assemble(rows, COMPLETE);
    assert!(files.is_empty());
}

#[test]
fn test_complete_sets_have_exact_segment_range() {
    // With completeness required, every emitted <file> has exactly
    // part_total segments numbered 1..part_total
    let rows = vec![
        row(1, "A \"a.bin\" (1/2) yEnc", "Bob", "<a1@x>"),
        row(2, "A \"a.bin\" (2/2) yEnc", "Bob", "<a2@x>"),
        row(3, "B \"b.bin\" (1/3) yEnc", "Bob", "<b1@x>"),
        row(4, "B \"b.bin\" (3/3) yEnc", "Bob", "<b3@x>"),
    ];

    let files = assemble(rows, COMPLETE);
    assert_eq!(files.len(), 1);
    let file = &files[0];
    assert_eq!(file.part_total, 2);
    let numbers: Vec<u32> = file.parts.keys().copied().collect();
    assert_eq!(numbers, vec![1, 2]);
}

#[test]
fn test_grouped_nzb_scenario() {
    // Two collections by posters A and B, one complete file each
    let rows = vec![
        row(1, "First Set \"one.bin\" (1/2) yEnc", "A", "<a1@x>"),
        row(2, "First Set \"one.bin\" (2/2) yEnc", "A", "<a2@x>"),
        row(3, "Second Set \"two.bin\" (1/2) yEnc", "B", "<b1@x>"),
        row(4, "Second Set \"two.bin\" (2/2) yEnc", "B", "<b2@x>"),
    ];

    let documents = build_grouped_nzbs(rows.clone(), GROUP, COMPLETE);
    assert_eq!(documents.len(), 2);

    // Filenames are deterministic
    let again = build_grouped_nzbs(rows, GROUP, COMPLETE);
    assert_eq!(
        documents.iter().map(|(n, _)| n).collect::<Vec<_>>(),
        again.iter().map(|(n, _)| n).collect::<Vec<_>>()
    );

    for (name, xml) in &documents {
        assert!(name.ends_with(".nzb"));
        assert!(name.contains("__"));
        assert!(name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')));
        assert_eq!(count_elements(xml, "file"), 1);
        assert_eq!(count_elements(xml, "segment"), 2);
    }
}

#[test]
fn test_single_document_multiple_files_ordered() {
    let rows = vec![
        row(10, "Late \"z.bin\" (1/1) yEnc", "P", "<z@x>"),
        row(1, "Early \"a.bin\" (1/1) yEnc", "P", "<a@x>"),
    ];

    let files = assemble(rows, NzbOptions::default());
    let xml = build_nzb_xml(&files, GROUP);

    // Emission order is by min(article_num)
    assert!(xml.find("a@x").unwrap() < xml.find("z@x").unwrap());
    assert_eq!(count_elements(&xml, "file"), 2);
}

#[test]
fn test_file_attributes_from_earliest_part() {
    let rows = vec![
        row(5, "Set \"f.bin\" (2/2) yEnc", "Bob", "<p2@x>"),
        row(3, "Set \"f.bin\" (1/2) yEnc", "Bob", "<p1@x>"),
    ];

    let files = assemble(rows, NzbOptions::default());
    let xml = build_nzb_xml(&files, GROUP);

    // date and subject come from the part with the lowest article number
    assert!(xml.contains(&format!("date=\"{}\"", 1_704_067_200 + 3)));
    assert!(xml.contains("subject=\"Set &quot;f.bin&quot; (1/2) yEnc\""));
}

#[test]
fn test_xml_prolog_and_doctype() {
    let rows = vec![row(1, "Post \"a.bin\" (1/1) yEnc", "P", "<a@x>")];
    let files = assemble(rows, NzbOptions::default());
    let xml = build_nzb_xml(&files, GROUP);

    let mut lines = xml.lines();
    assert_eq!(
        lines.next().unwrap(),
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>"
    );
    assert_eq!(
        lines.next().unwrap(),
        "<!DOCTYPE nzb PUBLIC \"-//newzBin//DTD NZB 1.1//EN\" \"http://www.newzbin.com/DTD/nzb/nzb-1.1.dtd\">"
    );
    assert!(lines
        .next()
        .unwrap()
        .starts_with("<nzb xmlns=\"http://www.newzbin.com/DTD/2003/nzb\">"));
}

#[test]
fn test_attribute_escaping() {
    let rows = vec![row(
        1,
        "Tricky <subject> & \"quotes\" (1/1)",
        "Poster <p@x> & Co",
        "<esc@x>",
    )];
    let files = assemble(rows, NzbOptions::default());
    let xml = build_nzb_xml(&files, GROUP);

    assert!(xml.contains("poster=\"Poster &lt;p@x&gt; &amp; Co\""));
    assert!(xml.contains("&quot;quotes&quot;"));
    // The document still parses cleanly
    assert!(roundtrip_structure(&xml).is_ok());
}

#[test]
fn test_document_roundtrips_through_xml_parser() {
    let rows = vec![
        row(1, "Set \"file.bin\" (1/3) yEnc", "Bob & Alice <ba@x>", "<p1@x>"),
        row(2, "(2/3)", "Bob & Alice <ba@x>", "<p2@x>"),
        row(3, "(3/3)", "Bob & Alice <ba@x>", "<p3@x>"),
    ];
    let files = assemble(rows, COMPLETE);
    let xml = build_nzb_xml(&files, GROUP);

    let structure = roundtrip_structure(&xml).unwrap();
    // NZB 1.1 structure: nzb > file > (groups > group+, segments > segment+)
    assert_eq!(structure.files, 1);
    assert_eq!(structure.groups, 1);
    assert_eq!(structure.segments, 3);
}

struct Segment {
    number: u32,
    message_id: String,
}

/// Pull (number, message-id) pairs out of an NZB document in order
fn collect_segments(xml: &str) -> Vec<Segment> {
    let mut reader = Reader::from_str(xml);
    let mut segments = Vec::new();
    let mut pending_number: Option<u32> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"segment" => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"number" {
                        pending_number =
                            String::from_utf8_lossy(&attr.value).parse::<u32>().ok();
                    }
                }
            }
            Ok(Event::Text(ref t)) => {
                if let Some(number) = pending_number.take() {
                    segments.push(Segment {
                        number,
                        message_id: t.unescape().unwrap().trim().to_string(),
                    });
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => panic!("XML parse error: {e}"),
        }
        buf.clear();
    }
    segments
}

struct Structure {
    files: usize,
    groups: usize,
    segments: usize,
}

/// Parse the document and count structural elements; Err on malformed XML
fn roundtrip_structure(xml: &str) -> Result<Structure, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut structure = Structure {
        files: 0,
        groups: 0,
        segments: 0,
    };
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => match e.name().as_ref() {
                b"file" => structure.files += 1,
                b"group" => structure.groups += 1,
                b"segment" => structure.segments += 1,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(structure)
}

fn count_elements(xml: &str, name: &str) -> usize {
    let structure = roundtrip_structure(xml).unwrap();
    match name {
        "file" => structure.files,
        "group" => structure.groups,
        "segment" => structure.segments,
        _ => 0,
    }
}
