// ABOUTME: Entry point: check a BFF file from the command line, or serve LSP over stdio

use bff_lsp::config;
use bff_lsp::error::Severity;
use bff_lsp::eval::{evaluate, EvalOptions};
use bff_lsp::server;
use bff_lsp::source::{DiskSourceProvider, ParseCache};
use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;
use url::Url;

/// Language server for the BFF build-configuration language
#[derive(Parser, Debug)]
#[command(name = "bff-lsp")]
#[command(version = config::VERSION)]
#[command(about = "Language server and checker for BFF build configuration files")]
struct CliArgs {
    /// Root BFF file to check (omit to run the LSP server over stdio)
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Predefine a `#if` symbol (can be repeated)
    #[arg(long = "define", value_name = "SYMBOL", action = clap::ArgAction::Append)]
    defines: Vec<String>,

    /// In check mode, dump the evaluated model as JSON to stdout
    #[arg(long = "dump-model")]
    dump_model: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = CliArgs::parse();
    let extra_symbols: HashSet<String> = args.defines.iter().cloned().collect();

    match &args.file {
        Some(path) => check_file(path, extra_symbols, args.dump_model),
        None => {
            server::run_stdio(extra_symbols).await;
            Ok(())
        }
    }
}

/// Evaluate one file from disk and print its diagnostics. Exits non-zero
/// when any diagnostic has error severity.
fn check_file(
    path: &PathBuf,
    extra_symbols: HashSet<String>,
    dump_model: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let absolute = std::fs::canonicalize(path)?;
    let uri = Url::from_file_path(&absolute)
        .map_err(|_| format!("not a representable path: {}", absolute.display()))?;

    let provider = DiskSourceProvider;
    let cache = ParseCache::new();
    let options = EvalOptions {
        extra_symbols,
        ..EvalOptions::default()
    };
    let data = evaluate(&uri, &provider, &cache, options);

    for diagnostic in &data.diagnostics {
        let severity = match diagnostic.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        println!(
            "{}:{}:{}: {}: {}",
            diagnostic.range.uri.path(),
            diagnostic.range.range.start.line + 1,
            diagnostic.range.range.start.character + 1,
            severity,
            diagnostic.message
        );
    }

    if dump_model {
        println!("{}", serde_json::to_string_pretty(&data)?);
    }

    let errors = data
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count();
    if errors > 0 {
        eprintln!("{} error(s)", errors);
        std::process::exit(1);
    }
    Ok(())
}
