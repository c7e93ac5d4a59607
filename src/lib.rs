//! Dumps the history of a remote repository to a byte stream in the portable
//! SVN dumpfile v3 format, the same stream a local `svnadmin dump` would
//! produce - but driven entirely through the remote "delta editor" replay
//! interface, so no local repository access is needed.
//!
//! The heart of the crate is [`dump_editor::DumpEditor`], a stateful
//! translator from edit-driver callbacks to dumpfile node records. Around it:
//! property-block serialization ([`props`]), svndiff v1 encoding and delta
//! spooling ([`svndiff`], [`delta`]), the byte-exact record writer
//! ([`dumpfile`]), and the driver side ([`session`], [`replay`]) that stamps
//! revision records and replays edits through the editor.

pub mod debug_editor;
pub mod delta;
pub mod dump_editor;
pub mod dumpfile;
pub mod editor;
pub mod error;
pub mod props;
pub mod replay;
pub mod session;
pub mod svndiff;

pub use error::DumpError;
