//! End-to-end scenarios for the dump editor: scripted edits in, exact bytes
//! out.

use rdumper::dump_editor::DumpEditor;
use rdumper::editor::Editor;
use rdumper::replay::replay_range;
use rdumper::session::{
    add_file_with_text, drive, md5_hex, EditCommand, PropEntry, RecordedHistoryBuilder,
    RecordedSession,
};
use rdumper::svndiff::DeltaWindow;

/// Runs one edit over the given body commands and returns the raw stream.
fn dump_edit(commands: Vec<EditCommand>) -> Vec<u8> {
    let mut editor = DumpEditor::new(Vec::new(), 1).unwrap();
    editor.open_root(None).unwrap();
    drive(&mut editor, &commands).unwrap();
    editor.close_edit().unwrap();
    editor.into_stream()
}

fn dump_edit_str(commands: Vec<EditCommand>) -> String {
    String::from_utf8(dump_edit(commands)).unwrap()
}

/// The svndiff v1 stream our encoder produces for a single new-data-only
/// window carrying `text`.
fn svndiff_for(text: &[u8]) -> Vec<u8> {
    let mut expected = b"SVN\x01".to_vec();
    expected.extend_from_slice(&[0, 0, text.len() as u8, 2, text.len() as u8 + 1]);
    expected.extend_from_slice(&[1, 0x80 | text.len() as u8]); // one new-data op
    expected.push(text.len() as u8);
    expected.extend_from_slice(text);
    expected
}

/// Walks a whole stream checking the framing invariant: every record that
/// advertises `Content-length: n` has exactly n body bytes between the blank
/// header terminator and the record terminator, and every node record ends
/// with exactly two newlines.
fn verify_record_framing(data: &[u8]) {
    fn next_line<'a>(data: &'a [u8], pos: &mut usize) -> &'a [u8] {
        let start = *pos;
        let nl = data[start..]
            .iter()
            .position(|&b| b == b'\n')
            .expect("unterminated line")
            + start;
        *pos = nl + 1;
        &data[start..nl]
    }

    let mut pos = 0;
    while pos < data.len() {
        let line = next_line(data, &mut pos);
        if line.is_empty() {
            continue; // separators between records
        }
        let header = std::str::from_utf8(line).unwrap();
        let is_node = header.starts_with("Node-path: ");
        if !is_node && !header.starts_with("Revision-number: ") {
            assert!(
                header.starts_with("SVN-fs-dump-format-version: "),
                "unexpected line {header:?}"
            );
            continue;
        }
        let mut content_len: Option<usize> = None;
        loop {
            let l = next_line(data, &mut pos);
            if l.is_empty() {
                break;
            }
            let l = std::str::from_utf8(l).unwrap();
            let (name, value) = l.split_once(": ").expect("malformed header");
            if name == "Content-length" {
                content_len = Some(value.parse().unwrap());
            }
        }
        match content_len {
            Some(n) => {
                assert!(pos + n <= data.len(), "body runs off the end of the stream");
                pos += n;
                if is_node {
                    assert_eq!(
                        &data[pos..pos + 2],
                        b"\n\n",
                        "node record body not followed by the record terminator"
                    );
                    pos += 2;
                } else {
                    // revision records end with a single separating newline
                    assert_eq!(data[pos], b'\n');
                    pos += 1;
                }
            }
            None => {
                assert!(is_node, "revision records always carry a Content-length");
                // A bodyless record: the blank line above was half of the
                // two-newline terminator.
                assert_eq!(data[pos], b'\n', "bodyless record missing its terminator");
                pos += 1;
            }
        }
    }
}

// S1: a root-only edit produces no node records and bumps the revision.
#[test]
fn empty_edit_produces_no_node_records() {
    let history = RecordedHistoryBuilder::new(1)
        .revision(vec![PropEntry::new("svn:log", b"first")], vec![])
        .build();
    let mut session = RecordedSession::new(history);
    let mut editor = DumpEditor::new(Vec::new(), 1).unwrap();
    replay_range(&mut session, &mut editor, 1, 1, false).unwrap();
    assert_eq!(editor.current_rev(), 2);

    let out = String::from_utf8(editor.into_stream()).unwrap();
    assert_eq!(
        out,
        "SVN-fs-dump-format-version: 3\n\n\
         Revision-number: 1\nProp-content-length: 32\nContent-length: 32\n\n\
         K 7\nsvn:log\nV 5\nfirst\nPROPS-END\n\n"
    );
    verify_record_framing(out.as_bytes());
}

// S2: added file with one property and a text delta; header order and both
// body lengths are fixed by the format.
#[test]
fn added_file_with_prop_and_text() {
    let text = b"data";
    let out = dump_edit(vec![
        EditCommand::AddFile {
            path: "a.txt".to_string(),
            copyfrom: None,
        },
        EditCommand::ChangeFileProp {
            name: "svn:mime-type".to_string(),
            value: Some(b"text/plain".to_vec()),
        },
        EditCommand::ApplyTextDelta {
            base_md5: None,
            windows: vec![DeltaWindow::from_new_data(text)],
        },
        EditCommand::CloseFile {
            text_md5: Some(md5_hex(text)),
        },
    ]);

    let props = b"K 13\nsvn:mime-type\nV 10\ntext/plain\nPROPS-END\n";
    let delta = svndiff_for(text);
    assert_eq!(props.len(), 45);
    assert_eq!(delta.len(), 16);

    let mut expected = format!(
        "Node-path: a.txt\nNode-kind: file\nNode-action: add\n\
         Prop-delta: true\nProp-content-length: {}\n\
         Text-delta: true\nText-content-length: {}\n\
         Text-content-md5: 8d777f385d3dfec8815d20f7496026dc\n\
         Content-length: {}\n\n",
        props.len(),
        delta.len(),
        props.len() + delta.len()
    )
    .into_bytes();
    expected.extend_from_slice(props);
    expected.extend_from_slice(&delta);
    expected.extend_from_slice(b"\n\n");

    assert_eq!(out, expected);
    verify_record_framing(&out);
}

// S3: replacing a directory with a copy coalesces into two records.
#[test]
fn replace_directory_with_copy() {
    let out = dump_edit_str(vec![
        EditCommand::DeleteEntry {
            path: "dir".to_string(),
        },
        EditCommand::AddDirectory {
            path: "dir".to_string(),
            copyfrom: Some(("old_dir".to_string(), 7)),
        },
        EditCommand::CloseDirectory,
    ]);
    assert_eq!(
        out,
        "Node-path: dir\nNode-kind: dir\nNode-action: delete\n\n\n\
         Node-path: dir\nNode-kind: dir\nNode-action: add\n\
         Node-copyfrom-rev: 7\nNode-copyfrom-path: old_dir\n\n\n"
    );
    verify_record_framing(out.as_bytes());
}

// S4: a delete followed by an add-with-history of the same path never emits
// a standalone delete; the add upgrades to a replace (two records).
#[test]
fn delete_then_copy_add_upgrades_to_replace() {
    let out = dump_edit_str(vec![
        EditCommand::OpenDirectory {
            path: "x".to_string(),
        },
        EditCommand::DeleteEntry {
            path: "x/a".to_string(),
        },
        EditCommand::AddFile {
            path: "x/a".to_string(),
            copyfrom: Some(("y/a".to_string(), 3)),
        },
        EditCommand::CloseFile { text_md5: None },
        EditCommand::CloseDirectory,
    ]);
    assert_eq!(
        out,
        "Node-path: x/a\nNode-kind: file\nNode-action: delete\n\n\n\
         Node-path: x/a\nNode-kind: file\nNode-action: add\n\
         Node-copyfrom-rev: 3\nNode-copyfrom-path: y/a\n\n\n"
    );
    assert_eq!(out.matches("Node-action: delete").count(), 1);
    verify_record_framing(out.as_bytes());
}

// S5: an added empty directory is a record with no body and no
// Content-length, ending in exactly two newlines.
#[test]
fn added_empty_directory() {
    let out = dump_edit_str(vec![
        EditCommand::AddDirectory {
            path: "d".to_string(),
            copyfrom: None,
        },
        EditCommand::CloseDirectory,
    ]);
    assert_eq!(out, "Node-path: d\nNode-kind: dir\nNode-action: add\n\n\n");
    verify_record_framing(out.as_bytes());
}

#[test]
fn added_directory_with_props_gets_one_self_contained_block() {
    let out = dump_edit_str(vec![
        EditCommand::AddDirectory {
            path: "d".to_string(),
            copyfrom: None,
        },
        EditCommand::ChangeDirProp {
            name: "color".to_string(),
            value: Some(b"red".to_vec()),
        },
        EditCommand::CloseDirectory,
    ]);
    assert_eq!(
        out,
        "Node-path: d\nNode-kind: dir\nNode-action: add\n\
         Prop-delta: true\nProp-content-length: 28\nContent-length: 28\n\n\
         K 5\ncolor\nV 3\nred\nPROPS-END\n\n\n"
    );
    verify_record_framing(out.as_bytes());
}

// A change-dir-prop before any structural event on an opened directory
// emits a change record with a self-contained property block.
#[test]
fn opened_directory_prop_change_emits_change_record() {
    let out = dump_edit_str(vec![
        EditCommand::OpenDirectory {
            path: "d".to_string(),
        },
        EditCommand::ChangeDirProp {
            name: "color".to_string(),
            value: None,
        },
        EditCommand::CloseDirectory,
    ]);
    assert_eq!(
        out,
        "Node-path: d\nNode-kind: dir\nNode-action: change\n\
         Prop-delta: true\nProp-content-length: 20\nContent-length: 20\n\n\
         D 5\ncolor\nPROPS-END\n\n\n"
    );
    verify_record_framing(out.as_bytes());
}

// A directory record stays open across its own property changes but is
// settled before any child's record begins.
#[test]
fn pending_directory_record_is_settled_before_children() {
    let out = dump_edit_str(vec![
        EditCommand::AddDirectory {
            path: "d".to_string(),
            copyfrom: None,
        },
        EditCommand::ChangeDirProp {
            name: "p".to_string(),
            value: Some(b"1".to_vec()),
        },
        EditCommand::AddFile {
            path: "d/f".to_string(),
            copyfrom: None,
        },
        EditCommand::CloseFile { text_md5: None },
        EditCommand::CloseDirectory,
    ]);
    assert_eq!(
        out,
        "Node-path: d\nNode-kind: dir\nNode-action: add\n\
         Prop-delta: true\nProp-content-length: 22\nContent-length: 22\n\n\
         K 1\np\nV 1\n1\nPROPS-END\n\n\n\
         Node-path: d/f\nNode-kind: file\nNode-action: add\n\n\n"
    );
    verify_record_framing(out.as_bytes());
}

// Deletions that no add upgraded are swept out when their directory closes.
#[test]
fn unclaimed_deletions_are_swept_at_close_directory() {
    let out = dump_edit_str(vec![
        EditCommand::OpenDirectory {
            path: "x".to_string(),
        },
        EditCommand::DeleteEntry {
            path: "x/b".to_string(),
        },
        EditCommand::DeleteEntry {
            path: "x/a".to_string(),
        },
        EditCommand::CloseDirectory,
    ]);
    // Swept in the deletion set's (sorted) iteration order.
    assert_eq!(
        out,
        "Node-path: x/a\nNode-action: delete\n\n\n\
         Node-path: x/b\nNode-action: delete\n\n\n"
    );
    verify_record_framing(out.as_bytes());
}

// Replace without history stays one record with the explicit action.
#[test]
fn replace_without_copy_is_a_single_record() {
    let out = dump_edit_str(vec![
        EditCommand::OpenDirectory {
            path: "x".to_string(),
        },
        EditCommand::DeleteEntry {
            path: "x/f".to_string(),
        },
        EditCommand::AddFile {
            path: "x/f".to_string(),
            copyfrom: None,
        },
        EditCommand::CloseFile { text_md5: None },
        EditCommand::CloseDirectory,
    ]);
    assert_eq!(
        out,
        "Node-path: x/f\nNode-kind: file\nNode-action: replace\n\n\n"
    );
    verify_record_framing(out.as_bytes());
}

// An opened file with neither props nor text is a bare change record.
#[test]
fn opened_file_with_no_changes_is_a_bare_change_record() {
    let out = dump_edit_str(vec![
        EditCommand::OpenFile {
            path: "f".to_string(),
        },
        EditCommand::CloseFile { text_md5: None },
    ]);
    assert_eq!(out, "Node-path: f\nNode-kind: file\nNode-action: change\n\n\n");
    verify_record_framing(out.as_bytes());
}

// Props-only file change: the Content-length is the property block length
// alone.
#[test]
fn props_only_file_change_counts_only_the_props() {
    let out = dump_edit_str(vec![
        EditCommand::OpenFile {
            path: "f".to_string(),
        },
        EditCommand::ChangeFileProp {
            name: "k".to_string(),
            value: Some(b"v".to_vec()),
        },
        EditCommand::CloseFile { text_md5: None },
    ]);
    assert_eq!(
        out,
        "Node-path: f\nNode-kind: file\nNode-action: change\n\
         Prop-delta: true\nProp-content-length: 22\nContent-length: 22\n\n\
         K 1\nk\nV 1\nv\nPROPS-END\n\n\n"
    );
    verify_record_framing(out.as_bytes());
}

// Non-regular properties vanish without a trace, even on files that have
// other content.
#[test]
fn non_regular_properties_are_dropped() {
    let out = dump_edit_str(vec![
        EditCommand::OpenFile {
            path: "f".to_string(),
        },
        EditCommand::ChangeFileProp {
            name: "svn:entry:committed-date".to_string(),
            value: Some(b"yesterday".to_vec()),
        },
        EditCommand::CloseFile { text_md5: None },
    ]);
    assert_eq!(out, "Node-path: f\nNode-kind: file\nNode-action: change\n\n\n");
}

// The number of delete records equals the unclaimed deletions plus the
// delete half of every copy-replace.
#[test]
fn delete_record_accounting() {
    let out = dump_edit_str(vec![
        EditCommand::OpenDirectory {
            path: "x".to_string(),
        },
        EditCommand::DeleteEntry {
            path: "x/kept".to_string(),
        },
        EditCommand::DeleteEntry {
            path: "x/replaced".to_string(),
        },
        EditCommand::AddDirectory {
            path: "x/replaced".to_string(),
            copyfrom: Some(("elsewhere".to_string(), 2)),
        },
        EditCommand::CloseDirectory,
        EditCommand::CloseDirectory,
    ]);
    // One unclaimed deletion + one copy-replace = two delete records.
    assert_eq!(out.matches("Node-action: delete\n").count(), 2);
    assert_eq!(out.matches("Node-action: add\n").count(), 1);
    verify_record_framing(out.as_bytes());
}

// A multi-revision replay through the driver: magic once, one revision
// record per revision, node records in between, everything framed.
#[test]
fn multi_revision_replay() {
    let history = RecordedHistoryBuilder::new(1)
        .revision(
            vec![PropEntry::new("svn:log", b"add a file")],
            add_file_with_text("a.txt", b"hello\n"),
        )
        .revision(
            vec![PropEntry::new("svn:log", b"remove it")],
            vec![EditCommand::DeleteEntry {
                path: "a.txt".to_string(),
            }],
        )
        .build();
    let mut session = RecordedSession::new(history);
    let mut editor = DumpEditor::new(Vec::new(), 1).unwrap();
    replay_range(&mut session, &mut editor, 1, 2, false).unwrap();
    assert_eq!(editor.current_rev(), 3);

    let out = editor.into_stream();
    verify_record_framing(&out);

    let text = String::from_utf8_lossy(&out);
    assert!(text.starts_with("SVN-fs-dump-format-version: 3\n\n"));
    assert_eq!(text.matches("Revision-number: ").count(), 2);
    assert!(text.contains("Node-path: a.txt\nNode-kind: file\nNode-action: add\n"));
    assert!(text.contains(&format!("Text-content-md5: {}\n", md5_hex(b"hello\n"))));
    assert!(text.contains("Node-path: a.txt\nNode-action: delete\n"));
    // The magic line appears exactly once.
    assert_eq!(text.matches("SVN-fs-dump-format-version").count(), 1);
}
