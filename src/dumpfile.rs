use std::fmt::{self, Display};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::error::DumpError;

/// The version stamp at the top of every stream we produce.
pub const DUMPFILE_MAGIC: &str = "SVN-fs-dump-format-version: 3\n";

/// What a node record describes. Deletes carry no kind at all, which is why
/// emitters take `Option<NodeKind>` rather than a `NodeKind` with an "unknown"
/// member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
}
impl Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::File => write!(f, "file"),
            NodeKind::Dir => write!(f, "dir"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction {
    Add,
    Change,
    Delete,
    Replace,
}
impl Display for NodeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeAction::Add => write!(f, "add"),
            NodeAction::Change => write!(f, "change"),
            NodeAction::Delete => write!(f, "delete"),
            NodeAction::Replace => write!(f, "replace"),
        }
    }
}

/// Emits dumpfile headers and record pieces byte-for-byte onto the output
/// stream. This type holds no record state of its own - callers (the editor
/// for node records, the replay driver for the stream magic and revision
/// records) are responsible for sequencing the calls into well-formed records.
///
/// All line endings are single `\n` and all numbers are unpadded ASCII
/// decimal. Paths are written with any leading `/` stripped.
pub struct DumpWriter<W: Write> {
    out: W,
}

impl<W: Write> DumpWriter<W> {
    pub fn new(out: W) -> DumpWriter<W> {
        DumpWriter { out }
    }

    /// The top-of-stream version line, followed by the blank line that
    /// separates it from the first revision record.
    pub fn write_magic(&mut self) -> Result<(), DumpError> {
        self.out.write_all(DUMPFILE_MAGIC.as_bytes())?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    /// A whole revision record: number, the two length headers, the blank
    /// header terminator, the property block, and the separating newline.
    /// Revision records are the driver's to emit, not the editor's.
    pub fn write_revision_record(&mut self, rev: u64, props: &[u8]) -> Result<(), DumpError> {
        write!(self.out, "Revision-number: {}\n", rev)?;
        write!(self.out, "Prop-content-length: {}\n", props.len())?;
        write!(self.out, "Content-length: {}\n\n", props.len())?;
        self.out.write_all(props)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    /// `Node-path`, and `Node-kind` when the kind is known (deletes have none).
    pub fn emit_header(&mut self, path: &str, kind: Option<NodeKind>) -> Result<(), DumpError> {
        write!(self.out, "Node-path: {}\n", strip_leading_slash(path))?;
        if let Some(kind) = kind {
            write!(self.out, "Node-kind: {}\n", kind)?;
        }
        Ok(())
    }

    pub fn emit_action(&mut self, action: NodeAction) -> Result<(), DumpError> {
        write!(self.out, "Node-action: {}\n", action)?;
        Ok(())
    }

    /// The two copy-source headers of an add-with-history record.
    pub fn emit_copyfrom(&mut self, rev: u64, path: &str) -> Result<(), DumpError> {
        write!(self.out, "Node-copyfrom-rev: {}\n", rev)?;
        write!(self.out, "Node-copyfrom-path: {}\n", strip_leading_slash(path))?;
        Ok(())
    }

    pub fn emit_prop_headers(&mut self, prop_len: usize) -> Result<(), DumpError> {
        self.out.write_all(b"Prop-delta: true\n")?;
        write!(self.out, "Prop-content-length: {}\n", prop_len)?;
        Ok(())
    }

    pub fn emit_text_headers(&mut self, size: u64, md5: Option<&str>) -> Result<(), DumpError> {
        self.out.write_all(b"Text-delta: true\n")?;
        write!(self.out, "Text-content-length: {}\n", size)?;
        if let Some(md5) = md5 {
            write!(self.out, "Text-content-md5: {}\n", md5)?;
        }
        Ok(())
    }

    /// The last header of a record that has a body, plus the blank line
    /// terminating the header block.
    pub fn emit_content_length(&mut self, len: u64) -> Result<(), DumpError> {
        write!(self.out, "Content-length: {}\n\n", len)?;
        Ok(())
    }

    /// Raw body bytes (the serialized property block).
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), DumpError> {
        self.out.write_all(bytes)?;
        Ok(())
    }

    /// Copies the named file into the stream. Used to splice a buffered text
    /// delta, whose size had to be learned by spooling it to disk first.
    pub fn splice_file(&mut self, path: &Path) -> Result<u64, DumpError> {
        let mut f = File::open(path)?;
        Ok(io::copy(&mut f, &mut self.out)?)
    }

    /// Exactly two newlines, ending the record.
    pub fn terminator(&mut self) -> Result<(), DumpError> {
        self.out.write_all(b"\n\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), DumpError> {
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn strip_leading_slash(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}
