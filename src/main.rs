use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use env_logger::Env;
use log::{debug, error};

use rdumper::dump_editor::DumpEditor;
use rdumper::editor::Revnum;
use rdumper::replay::{replay_range, resolve_range};
use rdumper::session::{self, RecordedSession, Session};

/// Dump the contents of the repository at a remote URL to stdout in the
/// portable dumpfile v3 format.
#[derive(clap::Parser)]
#[command(version)]
struct CliArgs {
    /// The repository to dump. Must be an absolute, scheme-qualified URL.
    url: String,
    /// The revision range to dump.
    /// Format: LOWER[:UPPER]. LOWER defaults to 1 and UPPER defaults to the
    /// latest revision of the repository.
    #[arg(short = 'r', long = "revision")]
    revision: Option<RevisionRange>,
    /// Narrates every editor event to stderr while dumping.
    #[arg(short, long)]
    verbose: bool,
    /// [Internal] Replays a recorded edit stream from a file instead of
    /// contacting a server. This shouldn't be needed for regular operation.
    #[arg(long)]
    replay_file: Option<PathBuf>,
}

/// A revision range from the command line, `LOWER[:UPPER]`.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
struct RevisionRange {
    lower: Option<Revnum>,
    upper: Option<Revnum>,
}
impl std::str::FromStr for RevisionRange {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| -> Result<Revnum, String> {
            part.parse()
                .map_err(|_| format!("'{}' is not a revision number", part))
        };
        let range = match s.split_once(':') {
            None => RevisionRange {
                lower: Some(parse(s)?),
                upper: None,
            },
            Some((lower, upper)) => RevisionRange {
                lower: Some(parse(lower)?),
                upper: Some(parse(upper)?),
            },
        };
        if let (Some(lower), Some(upper)) = (range.lower, range.upper) {
            if lower > upper {
                return Err(format!(
                    "lower revision {} is above upper revision {}",
                    lower, upper
                ));
            }
        }
        Ok(range)
    }
}

fn main() -> ExitCode {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // clap renders help/version itself (exit 0); anything else is an
            // argument error.
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    // The bare word "help" works like --help.
    if args.url == "help" {
        let _ = CliArgs::command().print_long_help();
        return ExitCode::SUCCESS;
    }

    // Configure logging. Everything we say goes to stderr - stdout is the
    // dump stream.
    let default_filter = if args.verbose { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(default_filter));
    builder.target(env_logger::Target::Stderr);
    builder.init();

    if session::split_url(&args.url).is_none() {
        error!("'{}' is not an absolute, scheme-qualified URL", args.url);
        return ExitCode::from(1);
    }

    let mut session: Box<dyn Session> = match &args.replay_file {
        Some(path) => match RecordedSession::open(path) {
            Ok(s) => Box::new(s),
            Err(e) => {
                error!(
                    "failed to load recorded history from {}: {}",
                    path.display(),
                    e
                );
                return ExitCode::from(3);
            }
        },
        None => match session::connect(&args.url) {
            Ok(s) => s,
            Err(e) => {
                error!("cannot open a session to {}: {}", args.url, e);
                return ExitCode::from(2);
            }
        },
    };

    let range = args.revision.unwrap_or_default();
    let (lower, upper) = match resolve_range(session.as_mut(), range.lower, range.upper) {
        Ok(resolved) => resolved,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };
    debug!("dumping revisions {}:{} of {}", lower, upper, args.url);

    let stdout = BufWriter::new(io::stdout().lock());
    let mut editor = match DumpEditor::new(stdout, lower) {
        Ok(editor) => editor,
        Err(e) => {
            error!("failed to set up the dump editor: {}", e);
            return ExitCode::from(4);
        }
    };
    match replay_range(session.as_mut(), &mut editor, lower, upper, args.verbose) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("dump failed: {}", e);
            ExitCode::from(4)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn parse_revision_range() {
        assert_eq!(
            RevisionRange::from_str("3"),
            Ok(RevisionRange {
                lower: Some(3),
                upper: None
            })
        );
        assert_eq!(
            RevisionRange::from_str("3:7"),
            Ok(RevisionRange {
                lower: Some(3),
                upper: Some(7)
            })
        );
        assert_eq!(
            RevisionRange::from_str("7:7"),
            Ok(RevisionRange {
                lower: Some(7),
                upper: Some(7)
            })
        );
        assert_eq!(
            RevisionRange::from_str("7:3"),
            Err("lower revision 7 is above upper revision 3".to_string())
        );
        assert_eq!(
            RevisionRange::from_str(""),
            Err("'' is not a revision number".to_string())
        );
        assert_eq!(
            RevisionRange::from_str("a:b"),
            Err("'a' is not a revision number".to_string())
        );
        assert_eq!(
            RevisionRange::from_str("3:"),
            Err("'' is not a revision number".to_string())
        );
    }
}
