//! CLI surface (`SPEC_FULL.md` §6.2): inspect a PE on disk without executing
//! it. `--dump` is the one operation meaningful on any host; actually running
//! the Win32 loader only makes sense against a real Win32 host, so it is not
//! wired up here.

use clap::Parser;
use pe_loader::datasource::{DataSource, FileDataSource};
use pe_loader::parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

#[derive(Parser)]
#[command(name = "pe-loader", about = "Parse and inspect a Portable Executable")]
struct Cli {
    /// Path to the PE file to inspect.
    path: PathBuf,

    /// Print the parsed image summary.
    #[arg(long)]
    dump: bool,

    /// Raise log verbosity (-v for info, -vv for debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let file_name = cli
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| cli.path.to_string_lossy().into_owned());
    let file_path = cli
        .path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    let source: Rc<dyn DataSource> = match FileDataSource::open(&cli.path) {
        Ok(source) => Rc::new(source),
        Err(e) => {
            log::error!("failed to open {}: {e}", cli.path.display());
            return ExitCode::FAILURE;
        }
    };

    let image = match parser::parse_from_file(source, &file_name, &file_path) {
        Ok(image) => image,
        Err(e) => {
            log::error!("failed to parse {}: {e}", cli.path.display());
            return ExitCode::FAILURE;
        }
    };

    if cli.dump {
        println!("{image}");
    }

    ExitCode::SUCCESS
}
