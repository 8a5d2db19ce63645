use std::borrow::Cow;
use std::fs;
use std::ops::Range;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use muscheme::special_forms::special_form_identifiers;
use muscheme::{DEFAULT_MAX_DEPTH, Env, Evaluator, Session, Strategy};
use rustyline::config::Config;
use rustyline::error::ReadlineError;
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::history::DefaultHistory;
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Cmd, Context, EditMode, Editor, EventHandler, KeyCode, KeyEvent, Modifiers};
use rustyline::{Completer, Helper, Highlighter, Hinter, Validator};
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "muscheme")]
#[command(version, about = "Interpreter for a small Scheme dialect with dynamically scoped mu procedures")]
struct Args {
    /// Source files to run, in order
    files: Vec<PathBuf>,

    /// Start the interactive loop after running the files
    #[arg(short, long)]
    load: bool,

    /// Evaluate without the tail-call loop (every call uses host stack)
    #[arg(long)]
    naive: bool,

    /// Maximum number of nested evaluations
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    /// Do not print the value of each expression entered
    #[arg(short, long)]
    quiet: bool,

    /// Use vi key bindings
    #[arg(long)]
    vi: bool,

    /// History file for the interactive loop
    #[arg(long, default_value = ".muscheme_history")]
    history: PathBuf,
}

/// Logs to stderr, and only when RUST_LOG is set.
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

// --- Bracket scanning shared by the validator and highlighter ---

#[derive(Default)]
struct Scan {
    /// Byte offsets of matched `(` and `)`.
    pairs: Vec<(usize, usize)>,
    /// Closing brackets with no opener.
    unmatched: Vec<usize>,
    /// Openers still waiting for a `)`.
    open: Vec<usize>,
    strings: Vec<Range<usize>>,
    in_string: bool,
}

fn scan(line: &str) -> Scan {
    let mut scan = Scan::default();
    let mut string_start = 0;
    let mut escape = false;
    let mut in_comment = false;
    for (i, c) in line.char_indices() {
        if scan.in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                scan.in_string = false;
                scan.strings.push(string_start..i + 1);
            }
            continue;
        }
        if in_comment {
            in_comment = c != '\n';
            continue;
        }
        match c {
            '"' => {
                scan.in_string = true;
                string_start = i;
            }
            ';' => in_comment = true,
            '(' => scan.open.push(i),
            ')' => match scan.open.pop() {
                Some(opener) => scan.pairs.push((opener, i)),
                None => scan.unmatched.push(i),
            },
            _ => {}
        }
    }
    if scan.in_string {
        scan.strings.push(string_start..line.len());
    }
    scan
}

struct BracketValidator;

impl Validator for BracketValidator {
    fn validate(&self, ctx: &mut ValidationContext) -> rustyline::Result<ValidationResult> {
        let scan = scan(ctx.input());
        Ok(if let Some(position) = scan.unmatched.first() {
            ValidationResult::Invalid(Some(format!("  - unmatched ')' at position {}", position)))
        } else if scan.in_string || !scan.open.is_empty() {
            ValidationResult::Incomplete
        } else {
            ValidationResult::Valid(None)
        })
    }
}

struct BracketHighlighter;

impl Highlighter for BracketHighlighter {
    fn highlight<'l>(&self, line: &'l str, pos: usize) -> Cow<'l, str> {
        let scan = scan(line);
        // the bracket under or just before the cursor
        let at_cursor = |offset: usize| offset == pos || Some(offset) == pos.checked_sub(1);
        let active = scan
            .pairs
            .iter()
            .find(|(open, close)| at_cursor(*open) || at_cursor(*close))
            .copied();

        let mut highlighted = String::with_capacity(line.len() * 2);
        for (i, c) in line.char_indices() {
            if scan.strings.iter().any(|range| range.contains(&i)) {
                highlighted.push_str(&format!("\x1b[32m{}\x1b[0m", c));
            } else if active.is_some_and(|(open, close)| i == open || i == close) {
                highlighted.push_str(&format!("\x1b[1;34m{}\x1b[0m", c));
            } else if scan.unmatched.contains(&i) {
                highlighted.push_str(&format!("\x1b[31m{}\x1b[0m", c));
            } else {
                highlighted.push(c);
            }
        }
        Cow::Owned(highlighted)
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _kind: CmdKind) -> bool {
        true
    }
}

struct IdentifierCompleter {
    env: Env,
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '\'' | '"')
}

impl rustyline::completion::Completer for IdentifierCompleter {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        let start = line[..pos]
            .char_indices()
            .rev()
            .find(|(_, c)| is_delimiter(*c))
            .map_or(0, |(i, c)| i + c.len_utf8());
        let prefix = &line[start..pos];
        if prefix.is_empty() {
            return Ok((pos, Vec::new()));
        }
        let mut candidates: Vec<String> = self
            .env
            .borrow()
            .get_identifiers()
            .union(&special_form_identifiers())
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        candidates.sort();
        Ok((start, candidates))
    }
}

#[derive(Completer, Helper, Highlighter, Hinter, Validator)]
struct ReplHelper {
    #[rustyline(Validator)]
    validator: BracketValidator,
    #[rustyline(Highlighter)]
    highlighter: BracketHighlighter,
    #[rustyline(Completer)]
    completer: IdentifierCompleter,
}

fn run_files(session: &Session, files: &[PathBuf]) -> usize {
    let mut errors = 0;
    for path in files {
        let source_id = path.display().to_string();
        match fs::read_to_string(path) {
            Ok(text) => errors += session.run_source(&source_id, &text, false),
            Err(err) => {
                eprintln!("cannot read {}: {}", source_id, err);
                errors += 1;
            }
        }
    }
    errors
}

fn repl(session: &Session, args: &Args) -> rustyline::Result<()> {
    println!("muscheme {}", env!("CARGO_PKG_VERSION"));
    println!("Type 'exit' or press Ctrl-D to quit.");

    let edit_mode = if args.vi { EditMode::Vi } else { EditMode::Emacs };
    let config = Config::builder().edit_mode(edit_mode).build();
    let mut rl: Editor<ReplHelper, DefaultHistory> = Editor::with_config(config)?;
    rl.set_helper(Some(ReplHelper {
        validator: BracketValidator,
        highlighter: BracketHighlighter,
        completer: IdentifierCompleter {
            env: session.env().clone(),
        },
    }));
    // Ctrl-S inserts a newline without submitting
    rl.bind_sequence(
        KeyEvent(KeyCode::Char('s'), Modifiers::CTRL),
        EventHandler::Simple(Cmd::Newline),
    );
    if rl.load_history(&args.history).is_err() {
        println!("No previous history.");
    }

    loop {
        match rl.readline("muscheme> ") {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                rl.add_history_entry(input)?;
                if input == "exit" || input == "(exit)" {
                    break;
                }
                session.run_source("REPL", input, !args.quiet);
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("readline error: {}", err);
                break;
            }
        }
    }
    if let Err(err) = rl.save_history(&args.history) {
        warn!(error = %err, "could not save history");
    }
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    let strategy = if args.naive {
        Strategy::Recursive
    } else {
        Strategy::TailCall
    };
    let session = Session::new(Evaluator::new(strategy).with_max_depth(args.max_depth));
    debug!(
        strategy = ?session.evaluator().strategy(),
        max_depth = session.evaluator().max_depth(),
        "session ready"
    );

    let errors = run_files(&session, &args.files);
    if !args.files.is_empty() && !args.load {
        return if errors == 0 {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    match repl(&session, &args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}
