use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::PathBuf,
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::Parser;

use mytar::{
    create_archive, extract_archive, fs::HostFilesystem, Options, LISTING_TARGET,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Create,
    Extract,
}

#[derive(Clone, Copy, Debug)]
struct Operation {
    mode: Mode,
    verbose: bool,
}

fn parse_operation(arg: &str) -> Result<Operation, String> {
    let (mode, verbose) = match arg {
        "c" => (Mode::Create, false),
        "cv" | "vc" => (Mode::Create, true),
        "x" => (Mode::Extract, false),
        "xv" | "vx" => (Mode::Extract, true),
        _ => return Err(format!("expected c, x, cv or xv, not {arg:?}")),
    };
    Ok(Operation { mode, verbose })
}

/// Pack files and directories into a ustar archive, or unpack one
#[derive(Debug, Parser)]
#[clap(name = "mytar", version)]
struct App {
    /// c to create, x to extract; add v to list every path
    #[clap(value_parser = parse_operation)]
    operation: Operation,

    /// the archive to write or read
    archive: PathBuf,

    /// files and directories to archive
    paths: Vec<PathBuf>,

    /// extract into this directory
    #[clap(short = 'C', long, default_value = ".")]
    directory: PathBuf,

    /// restore the owner and group of extracted entries
    #[clap(long)]
    same_owner: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format(|buf, record| {
            if record.target() == LISTING_TARGET {
                writeln!(buf, "{}", record.args())
            } else {
                writeln!(buf, "mytar: {}", record.args())
            }
        })
        .init();
}

fn run(args: &App) -> Result<ExitCode> {
    let options = Options {
        verbose: args.operation.verbose,
        same_owner: args.same_owner,
    };

    match args.operation.mode {
        Mode::Create => {
            let file = File::create(&args.archive)
                .with_context(|| format!("Creating archive {:?}", args.archive))?;
            let errors = create_archive(
                BufWriter::new(file),
                &args.paths,
                &HostFilesystem::cwd(),
                &options,
            )?;
            Ok(ExitCode::from(u8::try_from(errors).unwrap_or(u8::MAX)))
        }
        Mode::Extract => {
            let file = File::open(&args.archive)
                .with_context(|| format!("Opening archive {:?}", args.archive))?;
            let fs = HostFilesystem::at(&args.directory)
                .with_context(|| format!("Opening directory {:?}", args.directory))?;
            extract_archive(BufReader::new(file), &fs, &options)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    let args = App::parse();
    init_logging(args.operation.verbose);

    match run(&args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("mytar: {err:#}");
            ExitCode::FAILURE
        }
    }
}
