use std::cell::RefCell;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::trace;

use crate::editor::WindowHandler;
use crate::error::DumpError;
use crate::svndiff::{DeltaWindow, SvndiffWriter};

/// Where one file's buffered text delta ended up. Shared between the window
/// handler that fills it in and the editor that splices it into the record:
/// the delta's size can only be known once the last window has been encoded,
/// but it has to appear in headers emitted before the delta bytes.
#[derive(Debug)]
pub struct DeltaSpool {
    pub path: PathBuf,
    pub size: u64,
    pub finished: bool,
}

/// Opens a unique scratch file under `scratch_dir` and returns the handler
/// that will stream delta windows into it as svndiff v1, together with the
/// shared spool record. `seq` makes the file name unique within the editor's
/// scratch directory, so collisions are impossible.
pub fn begin(
    scratch_dir: &Path,
    seq: u64,
) -> Result<(SpoolHandler, Rc<RefCell<DeltaSpool>>), DumpError> {
    let path = scratch_dir.join(format!("textdelta-{}.svndiff", seq));
    let file = File::create(&path).map_err(|source| DumpError::Scratch {
        dir: scratch_dir.to_path_buf(),
        source,
    })?;
    trace!("spooling text delta to {}", path.display());

    let spool = Rc::new(RefCell::new(DeltaSpool {
        path: path.clone(),
        size: 0,
        finished: false,
    }));
    let handler = SpoolHandler {
        writer: Some(SvndiffWriter::new(BufWriter::new(file))?),
        path,
        spool: Rc::clone(&spool),
    };
    Ok((handler, spool))
}

/// The window-consumer value handed back to the driver by `apply_textdelta`.
pub struct SpoolHandler {
    // Becomes None once the sentinel window has been seen.
    writer: Option<SvndiffWriter<BufWriter<File>>>,
    path: PathBuf,
    spool: Rc<RefCell<DeltaSpool>>,
}

impl WindowHandler for SpoolHandler {
    fn window(&mut self, window: Option<&DeltaWindow>) -> Result<(), DumpError> {
        match window {
            Some(window) => {
                let writer = self
                    .writer
                    .as_mut()
                    .expect("delta window delivered after the end-of-stream sentinel");
                writer.write_window(window)
            }
            None => {
                let writer = self
                    .writer
                    .take()
                    .expect("end-of-stream sentinel delivered twice");
                drop(writer.finish()?);
                let size = fs::metadata(&self.path)?.len();
                let mut spool = self.spool.borrow_mut();
                spool.size = size;
                spool.finished = true;
                trace!("text delta complete, {} bytes", size);
                Ok(())
            }
        }
    }
}

impl Drop for SpoolHandler {
    fn drop(&mut self) {
        // A handler dropped before the sentinel means the delta was cut short;
        // don't leave the partial file behind.
        if !self.spool.borrow().finished {
            let _ = fs::remove_file(&self.path);
        }
    }
}
