//! Thin CLI surface over the `sir-ir`/`sir-validate` library crates.
//!
//! Reads a SIR JSONL document, runs the frontend and validator, and
//! prints diagnostics. No backend is invoked here (no `--emit`, no
//! object linking): those are a separate collaborator's concern. This
//! binary exists so the library crates have an executable surface for
//! manual smoke-testing.

use std::io::{IsTerminal, Read};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use sir_arena::Arena;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DiagnosticsFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

#[derive(Parser, Debug)]
#[clap(about = "Validate a SIR JSONL document and report diagnostics")]
struct Args {
    /// Path to the input .sirjsonl file, or "-" to read from stdin.
    input: PathBuf,

    #[clap(long, value_enum, default_value_t = DiagnosticsFormat::Text)]
    diagnostics: DiagnosticsFormat,

    #[clap(long, value_enum, default_value_t = ColorMode::Auto)]
    color: ColorMode,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let exit_code = run(&args)?;
    std::process::exit(exit_code as i32);
}

fn run(args: &Args) -> anyhow::Result<u8> {
    let text = read_input(&args.input)
        .with_context(|| format!("reading input {}", args.input.display()))?;

    let arena = Arena::new();
    let mut program = sir_ir::parse_program(&text, &arena);
    sir_validate::validate(&mut program);

    let file_label = if args.input == PathBuf::from("-") {
        "<stdin>".to_string()
    } else {
        args.input.display().to_string()
    };
    let source_lines = indexed_lines(&text);
    let use_color = want_color(args.color);

    for diag in program.diags.diagnostics() {
        match args.diagnostics {
            DiagnosticsFormat::Json => {
                println!("{}", program.diags.render_json(diag));
            }
            DiagnosticsFormat::Text => {
                let line = diag.loc.map(|l| l.line);
                let context = line.map(|l| context_window(&source_lines, l));
                let rendered =
                    program
                        .diags
                        .render_text(diag, Some(&file_label), context.as_deref());
                if use_color {
                    eprint!("{}", colorize(&rendered));
                } else {
                    eprint!("{rendered}");
                }
            }
        }
    }

    Ok(program.diags.exit_code())
}

fn read_input(path: &PathBuf) -> anyhow::Result<String> {
    if path == &PathBuf::from("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path).map_err(Into::into)
    }
}

fn indexed_lines(text: &str) -> Vec<(i64, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, l)| ((i + 1) as i64, l))
        .collect()
}

/// Two lines of context on either side of `line`, matching the window
/// size `original_source/src/sircc/compiler_diag.c` uses when printing
/// a source-anchored diagnostic.
fn context_window(lines: &[(i64, &str)], line: i64) -> Vec<(i64, &str)> {
    lines
        .iter()
        .copied()
        .filter(|(n, _)| (*n - line).abs() <= 2)
        .collect()
}

/// `--color=never`/`--color=always` are unconditional; `auto` colors
/// only when stderr is a terminal, following `compiler_diag.c`'s
/// `want_color`. We use `std::io::IsTerminal` (stable since Rust 1.70)
/// rather than the `atty` crate the rest of the corpus still reaches
/// for, since `atty` is unmaintained — see DESIGN.md.
fn want_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => std::io::stderr().is_terminal(),
    }
}

fn colorize(rendered: &str) -> String {
    const RED: &str = "\x1b[31m";
    const RESET: &str = "\x1b[0m";
    match rendered.split_once('\n') {
        Some((first, rest)) => format!("{RED}{first}{RESET}\n{rest}"),
        None => format!("{RED}{rendered}{RESET}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_clean_program_exits_zero() {
        let f = write_temp("{\"ir\":\"sir-v1.0\",\"k\":\"meta\"}\n");
        let args = Args {
            input: f.path().to_path_buf(),
            diagnostics: DiagnosticsFormat::Text,
            color: ColorMode::Never,
        };
        assert_eq!(run(&args).unwrap(), 0);
    }

    #[test]
    fn test_bad_ir_version_exits_nonzero() {
        let f = write_temp("{\"ir\":\"sir-v2.0\",\"k\":\"meta\"}\n");
        let args = Args {
            input: f.path().to_path_buf(),
            diagnostics: DiagnosticsFormat::Json,
            color: ColorMode::Never,
        };
        assert!(run(&args).unwrap() > 0);
    }

    #[test]
    fn test_context_window_clamps_to_nearby_lines() {
        let lines: Vec<(i64, &str)> = vec![(1, "a"), (2, "b"), (3, "c"), (4, "d"), (5, "e"), (6, "f")];
        let window = context_window(&lines, 3);
        assert_eq!(window, vec![(1, "a"), (2, "b"), (3, "c"), (4, "d"), (5, "e")]);
    }
}
