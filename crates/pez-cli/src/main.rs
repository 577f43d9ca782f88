//! The `pez` command-line interface.
//!
//! Thin wrapper over the library: parse arguments, read the file, pick the
//! tracer, map errors onto exit codes.

use std::{env, fs, path::PathBuf, process::ExitCode};

use pez::{FocusPath, PezError, StderrTracer};

const USAGE: &str = "usage: pez <file.pyc> [--output <path>] [--focus <dotted.name>] \
                     [--trace-decisions] [--trace-loop-guards] [--trace-sim-block <id>]";

/// Exit codes, mirroring the library's error tiers.
const EXIT_UNSUPPORTED: u8 = 2;
const EXIT_PARSE: u8 = 3;
const EXIT_DECOMPILE: u8 = 4;
const EXIT_USAGE: u8 = 64;

struct Options {
    input: PathBuf,
    output: Option<PathBuf>,
    focus: Option<FocusPath>,
    tracer: StderrTracer,
}

fn main() -> ExitCode {
    let options = match parse_args(env::args().skip(1)) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{message}");
            eprintln!("{USAGE}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let bytes = match fs::read(&options.input) {
        Ok(bytes) => bytes,
        Err(error) => {
            eprintln!("error: cannot read {}: {error}", options.input.display());
            return ExitCode::from(EXIT_PARSE);
        }
    };

    let mut tracer = options.tracer;
    let source = match pez::decompile_pyc_with(&bytes, &mut tracer, options.focus.as_ref()) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("error: {error}");
            let code = match &error {
                PezError::Pyc(pyc_error) if pyc_error.is_unsupported_version() => EXIT_UNSUPPORTED,
                PezError::Pyc(_) | PezError::Marshal(_) => EXIT_PARSE,
                PezError::Decompile(_) => EXIT_DECOMPILE,
            };
            return ExitCode::from(code);
        }
    };

    match options.output {
        Some(path) => {
            if let Err(error) = fs::write(&path, source) {
                eprintln!("error: cannot write {}: {error}", path.display());
                return ExitCode::from(EXIT_DECOMPILE);
            }
        }
        None => print!("{source}"),
    }
    ExitCode::SUCCESS
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut input = None;
    let mut output = None;
    let mut focus = None;
    let mut tracer = StderrTracer::default();

    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--output" => {
                let value = args.next().ok_or("--output requires a path")?;
                output = Some(PathBuf::from(value));
            }
            "--focus" => {
                let value = args.next().ok_or("--focus requires a dotted name")?;
                focus = Some(FocusPath::parse(&value).ok_or("--focus path is malformed")?);
            }
            "--trace-decisions" => tracer.decisions = true,
            "--trace-loop-guards" => tracer.loop_guards = true,
            "--trace-sim-block" => {
                let value = args.next().ok_or("--trace-sim-block requires a block id")?;
                let id = value
                    .parse()
                    .map_err(|_| format!("--trace-sim-block: invalid block id {value}"))?;
                tracer.sim_block = Some(id);
            }
            flag if flag.starts_with("--") => return Err(format!("unknown flag {flag}")),
            _ => {
                if input.is_some() {
                    return Err("more than one input file".to_owned());
                }
                input = Some(PathBuf::from(arg));
            }
        }
    }

    Ok(Options {
        input: input.ok_or("missing input file")?,
        output,
        focus,
        tracer,
    })
}
