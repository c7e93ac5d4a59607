use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::{debug, trace};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::editor::{Editor, Revnum};
use crate::error::DumpError;
use crate::svndiff::DeltaWindow;

/// Everything the dumper needs from the remote side, behind one narrow
/// interface. Transports (network protocols, authentication) live entirely
/// on the other side of this trait.
pub trait Session {
    fn latest_revnum(&mut self) -> Result<Revnum, DumpError>;

    /// The revision's own properties (`svn:author`, `svn:date`, `svn:log`,
    /// ...), for the driver to put in the revision record.
    fn revision_properties(&mut self, rev: Revnum) -> Result<Vec<PropEntry>, DumpError>;

    /// Drives one whole edit for `rev` through the editor: `open_root`, the
    /// body callbacks in the canonical grammar, then `close_edit` (or
    /// `abort_edit` if a callback fails).
    fn replay(&mut self, rev: Revnum, editor: &mut dyn Editor) -> Result<(), DumpError>;
}

/// Splits an absolute, scheme-qualified URL into (scheme, rest). Anything
/// else is not a URL for our purposes.
pub fn split_url(url: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = url.split_once("://")?;
    if scheme.is_empty()
        || !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
    {
        return None;
    }
    Some((scheme, rest))
}

/// Opens a session for the given URL. The network transports are external
/// collaborators this crate does not carry, so every scheme currently
/// reports as unsupported; recorded sessions (below) are the transport that
/// does ship.
pub fn connect(url: &str) -> Result<Box<dyn Session>, DumpError> {
    let (scheme, _) = split_url(url).expect("caller validates the URL shape");
    debug!("no transport registered for scheme '{}'", scheme);
    Err(DumpError::UnsupportedScheme(scheme.to_string()))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PropEntry {
    pub name: String,
    #[serde(with = "serde_bytes")] // Make serde fast
    pub value: Vec<u8>,
}

impl PropEntry {
    pub fn new(name: &str, value: &[u8]) -> PropEntry {
        PropEntry {
            name: name.to_string(),
            value: value.to_vec(),
        }
    }
}

/// One editor callback, in recordable form. A revision's command list covers
/// the edit body only - `open_root`/`close_edit` framing is implied.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum EditCommand {
    DeleteEntry {
        path: String,
    },
    AddDirectory {
        path: String,
        copyfrom: Option<(String, Revnum)>,
    },
    OpenDirectory {
        path: String,
    },
    CloseDirectory,
    ChangeDirProp {
        name: String,
        #[serde(with = "serde_bytes")]
        value: Option<Vec<u8>>,
    },
    AddFile {
        path: String,
        copyfrom: Option<(String, Revnum)>,
    },
    OpenFile {
        path: String,
    },
    ChangeFileProp {
        name: String,
        #[serde(with = "serde_bytes")]
        value: Option<Vec<u8>>,
    },
    ApplyTextDelta {
        base_md5: Option<String>,
        windows: Vec<DeltaWindow>,
    },
    CloseFile {
        text_md5: Option<String>,
    },
}

/// Replays a list of recorded commands into an editor. This is the whole of
/// the driver's body grammar, so tests and recorded sessions share one
/// implementation.
pub fn drive(editor: &mut dyn Editor, commands: &[EditCommand]) -> Result<(), DumpError> {
    for command in commands {
        match command {
            EditCommand::DeleteEntry { path } => editor.delete_entry(path, None)?,
            EditCommand::AddDirectory { path, copyfrom } => {
                editor.add_directory(path, copyfrom.as_ref().map(|(p, r)| (p.as_str(), *r)))?
            }
            EditCommand::OpenDirectory { path } => editor.open_directory(path, None)?,
            EditCommand::CloseDirectory => editor.close_directory()?,
            EditCommand::ChangeDirProp { name, value } => {
                editor.change_dir_prop(name, value.as_deref())?
            }
            EditCommand::AddFile { path, copyfrom } => {
                editor.add_file(path, copyfrom.as_ref().map(|(p, r)| (p.as_str(), *r)))?
            }
            EditCommand::OpenFile { path } => editor.open_file(path, None)?,
            EditCommand::ChangeFileProp { name, value } => {
                editor.change_file_prop(name, value.as_deref())?
            }
            EditCommand::ApplyTextDelta { base_md5, windows } => {
                let mut handler = editor.apply_textdelta(base_md5.as_deref())?;
                for window in windows {
                    handler.window(Some(window))?;
                }
                handler.window(None)?;
            }
            EditCommand::CloseFile { text_md5 } => editor.close_file(text_md5.as_deref())?,
        }
    }
    Ok(())
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RecordedRevision {
    pub revnum: Revnum,
    pub props: Vec<PropEntry>,
    pub commands: Vec<EditCommand>,
}

/// A whole recorded replay: the edit streams of a revision range, in a form
/// that can be saved to disk and played back later. This doubles as the test
/// transport and as a way to re-run a capture against a fresh output stream.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RecordedHistory {
    pub revisions: Vec<RecordedRevision>,
}

impl RecordedHistory {
    pub fn load(path: &Path) -> Result<RecordedHistory, DumpError> {
        let file = File::open(path)?;
        Ok(bincode::deserialize_from(BufReader::new(file))?)
    }

    pub fn save(&self, path: &Path) -> Result<(), DumpError> {
        let file = File::create(path)?;
        Ok(bincode::serialize_into(BufWriter::new(file), self)?)
    }
}

/// A `Session` backed by a `RecordedHistory` instead of a live server.
pub struct RecordedSession {
    history: RecordedHistory,
}

impl RecordedSession {
    pub fn new(history: RecordedHistory) -> RecordedSession {
        RecordedSession { history }
    }

    pub fn open(path: &Path) -> Result<RecordedSession, DumpError> {
        debug!("replaying recorded history from {}", path.display());
        Ok(RecordedSession::new(RecordedHistory::load(path)?))
    }

    fn find(&self, rev: Revnum) -> Option<&RecordedRevision> {
        self.history.revisions.iter().find(|r| r.revnum == rev)
    }
}

impl Session for RecordedSession {
    fn latest_revnum(&mut self) -> Result<Revnum, DumpError> {
        Ok(self
            .history
            .revisions
            .iter()
            .map(|r| r.revnum)
            .max()
            .unwrap_or(0))
    }

    fn revision_properties(&mut self, rev: Revnum) -> Result<Vec<PropEntry>, DumpError> {
        Ok(self.find(rev).map(|r| r.props.clone()).unwrap_or_default())
    }

    fn replay(&mut self, rev: Revnum, editor: &mut dyn Editor) -> Result<(), DumpError> {
        // An unrecorded revision replays as an empty edit; the revision
        // record for it still appears, like a revision that changed nothing.
        let commands = self.find(rev).map(|r| r.commands.clone()).unwrap_or_default();
        trace!("replaying revision {} ({} commands)", rev, commands.len());
        editor.open_root(rev.checked_sub(1))?;
        match drive(editor, &commands) {
            Ok(()) => editor.close_edit(),
            Err(e) => {
                let _ = editor.abort_edit();
                Err(e)
            }
        }
    }
}

/// Builds recorded histories programmatically; used by tests and for
/// generating fixtures.
pub struct RecordedHistoryBuilder {
    history: RecordedHistory,
    next_rev: Revnum,
}

impl RecordedHistoryBuilder {
    pub fn new(start_rev: Revnum) -> RecordedHistoryBuilder {
        RecordedHistoryBuilder {
            history: RecordedHistory::default(),
            next_rev: start_rev,
        }
    }

    pub fn revision(
        mut self,
        props: Vec<PropEntry>,
        commands: Vec<EditCommand>,
    ) -> RecordedHistoryBuilder {
        self.history.revisions.push(RecordedRevision {
            revnum: self.next_rev,
            props,
            commands,
        });
        self.next_rev += 1;
        self
    }

    pub fn build(self) -> RecordedHistory {
        self.history
    }
}

pub fn md5_hex(data: &[u8]) -> String {
    let digest = Md5::digest(data);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// The commands that create a file whose whole text is delivered as one
/// self-contained window, checksummed - the common case when synthesizing
/// histories.
pub fn add_file_with_text(path: &str, text: &[u8]) -> Vec<EditCommand> {
    vec![
        EditCommand::AddFile {
            path: path.to_string(),
            copyfrom: None,
        },
        EditCommand::ApplyTextDelta {
            base_md5: None,
            windows: vec![DeltaWindow::from_new_data(text)],
        },
        EditCommand::CloseFile {
            text_md5: Some(md5_hex(text)),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_splitting() {
        assert_eq!(split_url("svn://host/repo"), Some(("svn", "host/repo")));
        assert_eq!(split_url("svn+ssh://host/repo"), Some(("svn+ssh", "host/repo")));
        assert_eq!(split_url("https://host/repo"), Some(("https", "host/repo")));
        assert_eq!(split_url("host/repo"), None);
        assert_eq!(split_url("://host"), None);
        assert_eq!(split_url("bad scheme://host"), None);
    }

    #[test]
    fn md5_hex_known_values() {
        // Well-known digests.
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn recorded_history_round_trips_through_bincode() {
        let history = RecordedHistoryBuilder::new(1)
            .revision(
                vec![PropEntry::new("svn:log", b"first")],
                add_file_with_text("a.txt", b"data"),
            )
            .build();
        let bytes = bincode::serialize(&history).unwrap();
        let back: RecordedHistory = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.revisions.len(), 1);
        assert_eq!(back.revisions[0].revnum, 1);
        assert_eq!(back.revisions[0].props, history.revisions[0].props);
        assert_eq!(back.revisions[0].commands.len(), 3);
    }

    #[test]
    fn latest_revnum_is_the_highest_recorded() {
        let mut session = RecordedSession::new(
            RecordedHistoryBuilder::new(3)
                .revision(vec![], vec![])
                .revision(vec![], vec![])
                .build(),
        );
        assert_eq!(session.latest_revnum().unwrap(), 4);
    }
}
