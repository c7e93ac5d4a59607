use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::rc::Rc;

use log::{debug, trace};
use tempdir::TempDir;

use crate::delta::{self, DeltaSpool};
use crate::dumpfile::{DumpWriter, NodeAction, NodeKind};
use crate::editor::{Editor, Revnum, WindowHandler};
use crate::error::DumpError;
use crate::props::{is_regular_prop, PropBuffer};

/// Translates the edit-driver callbacks for one revision at a time into node
/// records on the output stream. At most one of these exists per stream.
///
/// The hard part of the translation is that a callback rarely carries enough
/// information to finish a record: properties arrive after the node header,
/// text deltas later still, and lengths only become known after buffering.
/// The editor therefore keeps one record "open" at a time and settles it at
/// the latest possible moment (see `EditState::dump_pending` and
/// `close_file`).
pub struct DumpEditor<W: Write> {
    writer: DumpWriter<W>,
    current_rev: Revnum,
    scratch_dir: TempDir,
    next_spool_seq: u64,
    // Present between open_root and close_edit/abort_edit.
    state: Option<EditState>,
}

/// Per-edit state shared across callbacks.
struct EditState {
    dirs: Vec<DirFrame>,
    props: PropBuffer,
    is_copy: bool,
    /// The open file record still owes a property block; `close_file` drains it.
    must_dump_props: bool,
    /// The open file record still owes its text; `close_file` splices it.
    must_dump_text: bool,
    /// A directory record is open, waiting for properties that may yet
    /// arrive; the next structural callback settles it.
    dump_props_pending: bool,
    /// Path of the record currently being assembled, if any.
    current_node_path: Option<String>,
    delta: Option<Rc<RefCell<DeltaSpool>>>,
}

/// One open directory on the edit stack.
struct DirFrame {
    /// Absolute path under the repository root; the leading `/` is kept
    /// internally and stripped on emit.
    path: String,
    /// Comparison source inherited through copied subtrees. Carried for the
    /// driver's benefit (it decides what deltas are against); never emitted.
    cmp_path: Option<String>,
    cmp_rev: Option<Revnum>,
    added: bool,
    /// A node record for this directory has been emitted in this revision.
    /// Flips false->true at most once; later property changes reuse the
    /// open record instead of emitting a second header.
    written_out: bool,
    /// Children scheduled for deletion. Kept until an add upgrades one to a
    /// replace, or the directory closes and the rest are swept out as
    /// stand-alone delete records.
    deleted_entries: BTreeSet<String>,
}

impl<W: Write> DumpEditor<W> {
    pub fn new(out: W, from_rev: Revnum) -> Result<DumpEditor<W>, DumpError> {
        Ok(DumpEditor {
            writer: DumpWriter::new(out),
            current_rev: from_rev,
            scratch_dir: TempDir::new("rdumper")?,
            next_spool_seq: 0,
            state: None,
        })
    }

    /// The revision the next edit will describe.
    pub fn current_rev(&self) -> Revnum {
        self.current_rev
    }

    /// The underlying record writer. Revision records and the stream magic
    /// are the replay driver's to emit, and it does so through here so that
    /// everything lands on the one stream in order.
    pub fn writer_mut(&mut self) -> &mut DumpWriter<W> {
        &mut self.writer
    }

    /// Consumes the editor and hands back the output stream.
    pub fn into_stream(self) -> W {
        self.writer.into_inner()
    }
}

/// Free function rather than a method so that callers can keep borrowing
/// `self.writer` alongside the returned state.
fn edit_state(state: &mut Option<EditState>) -> &mut EditState {
    state
        .as_mut()
        .expect("editor callback outside open_root..close_edit")
}

impl EditState {
    fn new() -> EditState {
        EditState {
            dirs: Vec::new(),
            props: PropBuffer::new(),
            is_copy: false,
            must_dump_props: false,
            must_dump_text: false,
            dump_props_pending: false,
            current_node_path: None,
            delta: None,
        }
    }

    fn top(&mut self) -> &mut DirFrame {
        self.dirs.last_mut().expect("no open directory")
    }

    /// Settles the open directory record, if there is one. With properties
    /// buffered this writes the property headers, the block and the record
    /// terminator; with nothing buffered the record had no body at all and
    /// just gets its terminator.
    fn dump_pending<W: Write>(&mut self, writer: &mut DumpWriter<W>) -> Result<(), DumpError> {
        if !self.dump_props_pending {
            return Ok(());
        }
        if !self.props.is_empty() {
            let block = self.props.serialize();
            writer.emit_prop_headers(block.len())?;
            writer.emit_content_length(block.len() as u64)?;
            writer.write_bytes(&block)?;
            self.props.clear();
        }
        writer.terminator()?;
        self.dump_props_pending = false;
        self.current_node_path = None;
        Ok(())
    }

    /// The central emission procedure: headers for one node record, with the
    /// action-dependent tail. A replace-with-history turns into two records
    /// here (delete, then add carrying the copy source); a plain delete is a
    /// complete record on its own.
    fn dump_node<W: Write>(
        &mut self,
        writer: &mut DumpWriter<W>,
        path: &str,
        kind: Option<NodeKind>,
        action: NodeAction,
        copyfrom: Option<(&str, Revnum)>,
    ) -> Result<(), DumpError> {
        trace!("node record: {} {:?} {:?}", path, action, kind);
        writer.emit_header(path, kind)?;
        self.current_node_path = Some(path.to_string());
        match action {
            NodeAction::Change => {
                writer.emit_action(NodeAction::Change)?;
            }
            NodeAction::Delete => {
                writer.emit_action(NodeAction::Delete)?;
                writer.terminator()?;
                // Nothing more belongs to this record.
                self.must_dump_props = false;
                self.current_node_path = None;
            }
            NodeAction::Add => {
                writer.emit_action(NodeAction::Add)?;
                match copyfrom {
                    None => {
                        self.dump_props_pending = true;
                    }
                    Some((cp_path, cp_rev)) => {
                        writer.emit_copyfrom(cp_rev, cp_path)?;
                        if kind == Some(NodeKind::Dir) {
                            // No close_file will ever run for a directory, so
                            // the record ends here. No other path terminates
                            // it again.
                            writer.terminator()?;
                            self.current_node_path = None;
                        }
                        self.is_copy = false;
                    }
                }
            }
            NodeAction::Replace => match copyfrom {
                None => {
                    writer.emit_action(NodeAction::Replace)?;
                    self.dump_props_pending = true;
                }
                Some(_) => {
                    // A copy on top of a deletion is two records: the
                    // explicit delete, then an add-with-history.
                    writer.emit_action(NodeAction::Delete)?;
                    writer.terminator()?;
                    self.dump_node(writer, path, kind, NodeAction::Add, copyfrom)?;
                    self.must_dump_props = false;
                    self.is_copy = false;
                }
            },
        }
        Ok(())
    }
}

impl<W: Write> Editor for DumpEditor<W> {
    fn open_root(&mut self, base_rev: Option<Revnum>) -> Result<(), DumpError> {
        assert!(self.state.is_none(), "open_root while an edit is in progress");
        trace!("open_root (base {:?})", base_rev);
        let mut state = EditState::new();
        state.dirs.push(DirFrame {
            path: "/".to_string(),
            cmp_path: None,
            cmp_rev: None,
            added: false,
            written_out: false,
            deleted_entries: BTreeSet::new(),
        });
        self.state = Some(state);
        Ok(())
    }

    fn delete_entry(&mut self, path: &str, rev: Option<Revnum>) -> Result<(), DumpError> {
        trace!("delete_entry {} (rev {:?})", path, rev);
        let state = edit_state(&mut self.state);
        state.dump_pending(&mut self.writer)?;
        // Not emitted yet: a following add may upgrade this to a replace.
        let path = abs_path(path);
        state.top().deleted_entries.insert(path);
        Ok(())
    }

    fn add_directory(
        &mut self,
        path: &str,
        copyfrom: Option<(&str, Revnum)>,
    ) -> Result<(), DumpError> {
        trace!("add_directory {} (copyfrom {:?})", path, copyfrom);
        let state = edit_state(&mut self.state);
        state.dump_pending(&mut self.writer)?;
        let path = abs_path(path);

        let replacing = state.top().deleted_entries.remove(&path);
        let action = if replacing {
            NodeAction::Replace
        } else {
            NodeAction::Add
        };
        state.is_copy = copyfrom.is_some();
        state.dump_node(&mut self.writer, &path, Some(NodeKind::Dir), action, copyfrom)?;
        debug_assert!(!state.is_copy);

        state.dirs.push(DirFrame {
            path,
            cmp_path: copyfrom.map(|(p, _)| abs_path(p)),
            cmp_rev: copyfrom.map(|(_, r)| r),
            added: true,
            written_out: true,
            deleted_entries: BTreeSet::new(),
        });
        Ok(())
    }

    fn open_directory(&mut self, path: &str, base_rev: Option<Revnum>) -> Result<(), DumpError> {
        trace!("open_directory {} (base {:?})", path, base_rev);
        let state = edit_state(&mut self.state);
        state.dump_pending(&mut self.writer)?;
        let path = abs_path(path);

        // A directory inside a copied subtree compares against the matching
        // path under the copy source.
        let parent = state.top();
        let (cmp_path, cmp_rev) = match (&parent.cmp_path, parent.cmp_rev) {
            (Some(pp), Some(pr)) => (Some(format!("{}/{}", pp, basename(&path))), Some(pr)),
            _ => (None, None),
        };
        state.dirs.push(DirFrame {
            path,
            cmp_path,
            cmp_rev,
            added: false,
            written_out: false,
            deleted_entries: BTreeSet::new(),
        });
        Ok(())
    }

    fn close_directory(&mut self) -> Result<(), DumpError> {
        let state = edit_state(&mut self.state);
        state.dump_pending(&mut self.writer)?;
        let frame = state.dirs.pop().expect("close_directory with no open directory");
        trace!(
            "close_directory {} ({})",
            frame.path,
            if frame.added { "added" } else { "opened" }
        );
        // Deletions nothing upgraded to a replace become records of their own.
        for path in &frame.deleted_entries {
            state.dump_node(&mut self.writer, path, None, NodeAction::Delete, None)?;
        }
        Ok(())
    }

    fn change_dir_prop(&mut self, name: &str, value: Option<&[u8]>) -> Result<(), DumpError> {
        if !is_regular_prop(name) {
            trace!("dropping non-regular dir property {}", name);
            return Ok(());
        }
        let state = edit_state(&mut self.state);
        let dir_path = state.top().path.clone();
        // Settle someone else's open record, but keep accumulating into this
        // directory's own.
        if state.dump_props_pending && state.current_node_path.as_deref() != Some(dir_path.as_str()) {
            state.dump_pending(&mut self.writer)?;
        }
        match value {
            Some(value) => state.props.set(name, value),
            None => state.props.delete(name),
        }
        // A property change is what distinguishes a directory opened merely
        // to reach its children from one that changed itself.
        if !state.top().written_out {
            state.dump_node(
                &mut self.writer,
                &dir_path,
                Some(NodeKind::Dir),
                NodeAction::Change,
                None,
            )?;
            state.top().written_out = true;
        }
        state.dump_props_pending = true;
        Ok(())
    }

    fn add_file(&mut self, path: &str, copyfrom: Option<(&str, Revnum)>) -> Result<(), DumpError> {
        trace!("add_file {} (copyfrom {:?})", path, copyfrom);
        let state = edit_state(&mut self.state);
        state.dump_pending(&mut self.writer)?;
        let path = abs_path(path);

        let replacing = state.top().deleted_entries.remove(&path);
        let action = if replacing {
            NodeAction::Replace
        } else {
            NodeAction::Add
        };
        state.is_copy = copyfrom.is_some();
        // The record stays open: its property/text body arrives through the
        // file callbacks and close_file finishes it.
        state.dump_node(&mut self.writer, &path, Some(NodeKind::File), action, copyfrom)?;
        debug_assert!(!state.is_copy);
        Ok(())
    }

    fn open_file(&mut self, path: &str, base_rev: Option<Revnum>) -> Result<(), DumpError> {
        trace!("open_file {} (base {:?})", path, base_rev);
        let state = edit_state(&mut self.state);
        state.dump_pending(&mut self.writer)?;
        let path = abs_path(path);

        let parent = state.top();
        if let (Some(pp), Some(pr)) = (&parent.cmp_path, parent.cmp_rev) {
            trace!("file {} compares against {}/{}@{}", path, pp, basename(&path), pr);
        }
        state.dump_node(
            &mut self.writer,
            &path,
            Some(NodeKind::File),
            NodeAction::Change,
            None,
        )?;
        Ok(())
    }

    fn change_file_prop(&mut self, name: &str, value: Option<&[u8]>) -> Result<(), DumpError> {
        if !is_regular_prop(name) {
            trace!("dropping non-regular file property {}", name);
            return Ok(());
        }
        let state = edit_state(&mut self.state);
        match value {
            Some(value) => state.props.set(name, value),
            None => state.props.delete(name),
        }
        state.must_dump_props = true;
        Ok(())
    }

    fn apply_textdelta(
        &mut self,
        base_md5: Option<&str>,
    ) -> Result<Box<dyn WindowHandler>, DumpError> {
        trace!("apply_textdelta (base md5 {:?})", base_md5);
        let (handler, spool) = delta::begin(self.scratch_dir.path(), self.next_spool_seq)?;
        self.next_spool_seq += 1;
        let state = edit_state(&mut self.state);
        state.delta = Some(spool);
        state.must_dump_text = true;
        Ok(Box::new(handler))
    }

    fn close_file(&mut self, text_md5: Option<&str>) -> Result<(), DumpError> {
        let state = edit_state(&mut self.state);

        let prop_block = if state.must_dump_props {
            Some(state.props.serialize())
        } else {
            None
        };
        let text = if state.must_dump_text {
            let spool = state
                .delta
                .take()
                .expect("close_file owes text but apply_textdelta never ran");
            let spool = spool.borrow();
            assert!(
                spool.finished,
                "close_file before the delta's end-of-stream sentinel"
            );
            Some((spool.path.clone(), spool.size))
        } else {
            None
        };

        if let Some(block) = &prop_block {
            self.writer.emit_prop_headers(block.len())?;
        }
        if let Some((_, size)) = &text {
            self.writer.emit_text_headers(*size, text_md5)?;
        }
        // Only the terms actually present count toward the body length; a
        // record with neither has no Content-length at all.
        let prop_len = prop_block.as_ref().map_or(0, |b| b.len() as u64);
        let text_len = text.as_ref().map_or(0, |(_, size)| *size);
        if prop_block.is_some() || text.is_some() {
            self.writer.emit_content_length(prop_len + text_len)?;
        }
        if let Some(block) = &prop_block {
            self.writer.write_bytes(block)?;
        }
        if let Some((path, size)) = &text {
            let copied = self.writer.splice_file(path)?;
            debug_assert_eq!(copied, *size);
            fs::remove_file(path)?;
        }
        self.writer.terminator()?;

        state.props.clear();
        state.must_dump_props = false;
        state.must_dump_text = false;
        state.dump_props_pending = false;
        state.current_node_path = None;
        Ok(())
    }

    fn close_edit(&mut self) -> Result<(), DumpError> {
        let mut state = self
            .state
            .take()
            .expect("close_edit outside open_root..close_edit");
        state.dump_pending(&mut self.writer)?;
        // Sweep directories the driver leaves open at the end of the edit
        // (canonically just the root).
        while let Some(frame) = state.dirs.pop() {
            for path in &frame.deleted_entries {
                state.dump_node(&mut self.writer, path, None, NodeAction::Delete, None)?;
            }
        }
        self.writer.flush()?;
        debug!("finished dumping revision {}", self.current_rev);
        self.current_rev += 1;
        Ok(())
    }

    fn abort_edit(&mut self) -> Result<(), DumpError> {
        debug!("edit for revision {} aborted", self.current_rev);
        if let Some(state) = self.state.take() {
            if let Some(spool) = state.delta {
                let spool = spool.borrow();
                let _ = fs::remove_file(&spool.path);
            }
        }
        Ok(())
    }
}

fn abs_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
