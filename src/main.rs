//! CLI front-end: compile a template (inline or from a file), optionally
//! dump its instruction listing, then render it against a JSON document
//! read from a file or stdin.
//!
//! A small `clap`-derived struct, stdin fallback, and a `--*-file` option
//! per input. Whole-program lifecycle events go through `tracing`; the
//! compiler/evaluator's own internals are narrated by `CompileTracer`/
//! `EvalTracer` instead (see `src/debug.rs`).

use std::fs;
use std::io::Read as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mustache_vm::debug::{CompileTracer, EvalTracer};
use mustache_vm::error::CompileError;
use mustache_vm::json_host::render_to_string;
use mustache_vm::resolver::{FilesystemResolver, PartialResolver};
use mustache_vm::{Compiler, Program};

#[derive(Parser, Debug)]
#[command(name = "mustache-vm", about = "Compile and render Mustache templates")]
struct Cli {
    /// Inline template source. Required unless --template-file is given.
    template: Option<String>,

    /// Load the template from a file instead of the TEMPLATE argument.
    #[arg(long = "template-file", value_name = "PATH")]
    template_file: Option<PathBuf>,

    /// JSON document supplying the render context; reads stdin if omitted.
    #[arg(long = "data", value_name = "PATH")]
    data: Option<PathBuf>,

    /// Extra directory to search for `{{>partial}}` references, beyond the
    /// referencing template's own directory. May be repeated.
    #[arg(long = "partial-dir", value_name = "DIR")]
    partial_dirs: Vec<PathBuf>,

    /// Enable compiler/evaluator tracing on stderr.
    #[arg(short = 'D', long = "debug")]
    debug: bool,

    /// Print the compiled instruction listing instead of rendering.
    #[arg(long = "dump-program")]
    dump_program: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "mustache-vm failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let compile_tracer = CompileTracer::new(cli.debug);
    let eval_tracer = EvalTracer::new(cli.debug);
    let resolver = PartialDirResolver::new(cli.partial_dirs.clone());

    let program = match &cli.template_file {
        Some(path) => {
            tracing::info!(path = %path.display(), "compiling template from file");
            let filename = path.to_str().ok_or("--template-file path is not valid UTF-8")?;
            Program::compile_with_tracer(filename, &resolver, compile_tracer)?
        }
        None => {
            let source = cli
                .template
                .as_deref()
                .ok_or("either TEMPLATE or --template-file is required")?;
            tracing::info!(bytes = source.len(), "compiling inline template");
            Compiler::compile("<inline>", Some(source.as_bytes()), &resolver, compile_tracer)?
        }
    };

    if cli.dump_program {
        print!("{}", program.dump());
        return Ok(());
    }

    let data = read_data(cli.data.as_deref())?;
    let output = render_to_string(&program, data, eval_tracer).map_err(|e| e.to_string())?;
    print!("{output}");
    Ok(())
}

fn read_data(path: Option<&std::path::Path>) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let text = match path {
        Some(p) => fs::read_to_string(p)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    if text.trim().is_empty() {
        return Ok(serde_json::Value::Object(Default::default()));
    }
    Ok(serde_json::from_str(&text)?)
}

/// Tries the referencing template's own directory first (via
/// `FilesystemResolver`'s usual behavior), then falls back to each
/// `--partial-dir` in order. Lets a bare inline root template (which has no
/// directory of its own) still resolve partials from an explicit search
/// path.
struct PartialDirResolver {
    base: FilesystemResolver,
    extra_dirs: Vec<PathBuf>,
}

impl PartialDirResolver {
    fn new(extra_dirs: Vec<PathBuf>) -> Self {
        PartialDirResolver {
            base: FilesystemResolver::new(),
            extra_dirs,
        }
    }
}

impl PartialResolver for PartialDirResolver {
    fn read(&self, candidate: &str) -> Result<Option<Vec<u8>>, CompileError> {
        if let Some(bytes) = self.base.read(candidate)? {
            return Ok(Some(bytes));
        }
        for dir in &self.extra_dirs {
            let path = dir.join(candidate);
            if let Some(joined) = path.to_str() {
                if let Some(bytes) = self.base.read(joined)? {
                    return Ok(Some(bytes));
                }
            }
        }
        Ok(None)
    }
}
