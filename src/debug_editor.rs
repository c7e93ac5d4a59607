use log::{debug, trace};

use crate::editor::{Editor, Revnum, WindowHandler};
use crate::error::DumpError;
use crate::svndiff::DeltaWindow;

/// Wraps another editor and narrates every callback at debug level before
/// forwarding it. Selected by `--verbose`; the narration goes to the logger
/// (stderr), never to the dump stream.
pub struct DebugEditor<'a> {
    inner: &'a mut dyn Editor,
}

impl<'a> DebugEditor<'a> {
    pub fn new(inner: &'a mut dyn Editor) -> DebugEditor<'a> {
        DebugEditor { inner }
    }
}

impl Editor for DebugEditor<'_> {
    fn open_root(&mut self, base_rev: Option<Revnum>) -> Result<(), DumpError> {
        debug!("open_root: base {:?}", base_rev);
        self.inner.open_root(base_rev)
    }

    fn delete_entry(&mut self, path: &str, rev: Option<Revnum>) -> Result<(), DumpError> {
        debug!("delete_entry: {} @{:?}", path, rev);
        self.inner.delete_entry(path, rev)
    }

    fn add_directory(
        &mut self,
        path: &str,
        copyfrom: Option<(&str, Revnum)>,
    ) -> Result<(), DumpError> {
        match copyfrom {
            Some((cp, cr)) => debug!("add_directory: {} (copied from {}@{})", path, cp, cr),
            None => debug!("add_directory: {}", path),
        }
        self.inner.add_directory(path, copyfrom)
    }

    fn open_directory(&mut self, path: &str, base_rev: Option<Revnum>) -> Result<(), DumpError> {
        debug!("open_directory: {}", path);
        self.inner.open_directory(path, base_rev)
    }

    fn close_directory(&mut self) -> Result<(), DumpError> {
        debug!("close_directory");
        self.inner.close_directory()
    }

    fn change_dir_prop(&mut self, name: &str, value: Option<&[u8]>) -> Result<(), DumpError> {
        match value {
            Some(v) => debug!("change_dir_prop: {} ({} bytes)", name, v.len()),
            None => debug!("change_dir_prop: {} (deleted)", name),
        }
        self.inner.change_dir_prop(name, value)
    }

    fn add_file(&mut self, path: &str, copyfrom: Option<(&str, Revnum)>) -> Result<(), DumpError> {
        match copyfrom {
            Some((cp, cr)) => debug!("add_file: {} (copied from {}@{})", path, cp, cr),
            None => debug!("add_file: {}", path),
        }
        self.inner.add_file(path, copyfrom)
    }

    fn open_file(&mut self, path: &str, base_rev: Option<Revnum>) -> Result<(), DumpError> {
        debug!("open_file: {}", path);
        self.inner.open_file(path, base_rev)
    }

    fn change_file_prop(&mut self, name: &str, value: Option<&[u8]>) -> Result<(), DumpError> {
        match value {
            Some(v) => debug!("change_file_prop: {} ({} bytes)", name, v.len()),
            None => debug!("change_file_prop: {} (deleted)", name),
        }
        self.inner.change_file_prop(name, value)
    }

    fn apply_textdelta(
        &mut self,
        base_md5: Option<&str>,
    ) -> Result<Box<dyn WindowHandler>, DumpError> {
        debug!("apply_textdelta: base md5 {:?}", base_md5);
        let inner = self.inner.apply_textdelta(base_md5)?;
        Ok(Box::new(DebugWindowHandler { inner, windows: 0 }))
    }

    fn close_file(&mut self, text_md5: Option<&str>) -> Result<(), DumpError> {
        debug!("close_file: text md5 {:?}", text_md5);
        self.inner.close_file(text_md5)
    }

    fn close_edit(&mut self) -> Result<(), DumpError> {
        debug!("close_edit");
        self.inner.close_edit()
    }

    fn abort_edit(&mut self) -> Result<(), DumpError> {
        debug!("abort_edit");
        self.inner.abort_edit()
    }
}

struct DebugWindowHandler {
    inner: Box<dyn WindowHandler>,
    windows: u64,
}

impl WindowHandler for DebugWindowHandler {
    fn window(&mut self, window: Option<&DeltaWindow>) -> Result<(), DumpError> {
        match window {
            Some(w) => {
                self.windows += 1;
                trace!(
                    "  window {}: sview {}+{}, tview {}, {} ops, {} new bytes",
                    self.windows,
                    w.sview_offset,
                    w.sview_len,
                    w.tview_len,
                    w.ops.len(),
                    w.new_data.len()
                );
            }
            None => debug!("  text delta done after {} windows", self.windows),
        }
        self.inner.window(window)
    }
}
