use crate::error::DumpError;
use crate::svndiff::DeltaWindow;

pub type Revnum = u64;

/// Consumes the streamed windows of one file's text delta. Returned by
/// [`Editor::apply_textdelta`]; the driver invokes it once per window and a
/// final time with `None` as the end-of-stream sentinel.
pub trait WindowHandler {
    fn window(&mut self, window: Option<&DeltaWindow>) -> Result<(), DumpError>;
}

/// The edit-driver callback contract: a server-driven walk of one revision's
/// tree edit, leaves-first, with explicit open/close framing.
///
/// The driver must deliver callbacks in the canonical grammar:
///
/// ```text
/// EDIT      := open_root DIR_BODY close_edit
/// DIR_BODY  := { change_dir_prop | open_directory DIR_BODY close_directory
///              | add_directory DIR_BODY close_directory
///              | open_file FILE_BODY close_file
///              | add_file FILE_BODY close_file
///              | delete_entry }
/// FILE_BODY := { change_file_prop | apply_textdelta (window)* }
/// ```
///
/// Implementations may panic on out-of-grammar sequences - those are bugs in
/// the driver, not runtime conditions.
pub trait Editor {
    fn open_root(&mut self, base_rev: Option<Revnum>) -> Result<(), DumpError>;

    /// Schedules `path` (a child of the currently open directory) for
    /// deletion. `rev` is the revision the driver believes it is deleting.
    fn delete_entry(&mut self, path: &str, rev: Option<Revnum>) -> Result<(), DumpError>;

    fn add_directory(
        &mut self,
        path: &str,
        copyfrom: Option<(&str, Revnum)>,
    ) -> Result<(), DumpError>;

    fn open_directory(&mut self, path: &str, base_rev: Option<Revnum>) -> Result<(), DumpError>;

    fn close_directory(&mut self) -> Result<(), DumpError>;

    /// `value` of `None` means the property is being deleted.
    fn change_dir_prop(&mut self, name: &str, value: Option<&[u8]>) -> Result<(), DumpError>;

    fn add_file(&mut self, path: &str, copyfrom: Option<(&str, Revnum)>)
        -> Result<(), DumpError>;

    fn open_file(&mut self, path: &str, base_rev: Option<Revnum>) -> Result<(), DumpError>;

    fn change_file_prop(&mut self, name: &str, value: Option<&[u8]>) -> Result<(), DumpError>;

    /// Announces that the currently open file's text follows as a stream of
    /// delta windows, delivered through the returned handler.
    fn apply_textdelta(
        &mut self,
        base_md5: Option<&str>,
    ) -> Result<Box<dyn WindowHandler>, DumpError>;

    /// `text_md5` is the checksum of the file's full resulting text, when the
    /// driver knows it.
    fn close_file(&mut self, text_md5: Option<&str>) -> Result<(), DumpError>;

    fn close_edit(&mut self) -> Result<(), DumpError>;

    /// The driver is abandoning the edit; release per-edit resources. Output
    /// already written stays as-is.
    fn abort_edit(&mut self) -> Result<(), DumpError>;
}
