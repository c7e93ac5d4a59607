use std::io::Write;

use log::info;

use crate::debug_editor::DebugEditor;
use crate::dump_editor::DumpEditor;
use crate::editor::Revnum;
use crate::error::DumpError;
use crate::props::PropBuffer;
use crate::session::Session;

/// Fills in the defaults of a requested revision range: a missing lower bound
/// means 1, a missing upper bound means the server's latest revision. The
/// resolved range must exist on the server.
pub fn resolve_range(
    session: &mut dyn Session,
    lower: Option<Revnum>,
    upper: Option<Revnum>,
) -> Result<(Revnum, Revnum), DumpError> {
    let latest = session.latest_revnum()?;
    let lower = lower.unwrap_or(1);
    let upper = upper.unwrap_or(latest);
    if upper > latest || lower > upper {
        return Err(DumpError::RangeOutOfHistory {
            lower,
            upper,
            latest,
        });
    }
    Ok((lower, upper))
}

/// Dumps revisions `start..=end`: the stream magic once, then per revision a
/// revision record followed by the node records the session's replay drives
/// out of the editor.
///
/// Revision records are emitted here, on the driver side - the editor only
/// ever produces node records. With `verbose` the editor is wrapped so every
/// callback is narrated to the log.
pub fn replay_range<W: Write>(
    session: &mut dyn Session,
    editor: &mut DumpEditor<W>,
    start: Revnum,
    end: Revnum,
    verbose: bool,
) -> Result<(), DumpError> {
    assert_eq!(
        editor.current_rev(),
        start,
        "editor was constructed for a different starting revision"
    );
    editor.writer_mut().write_magic()?;
    for rev in start..=end {
        let props = session.revision_properties(rev)?;
        let mut buf = PropBuffer::new();
        for prop in &props {
            buf.set(&prop.name, &prop.value);
        }
        let block = buf.serialize();
        editor.writer_mut().write_revision_record(rev, &block)?;

        if verbose {
            let mut narrated = DebugEditor::new(editor);
            session.replay(rev, &mut narrated)?;
        } else {
            session.replay(rev, editor)?;
        }
        info!("dumped revision {}", rev);
    }
    Ok(())
}
