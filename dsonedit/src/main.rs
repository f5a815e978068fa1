//! dsonedit - convert binary DSON save files to and from their text form.
//!
//! - decode: binary → text, optionally resolving hashed names
//! - encode: text → binary
//! - check: verify that binary files survive a decode/encode round trip

use clap::{Parser, Subcommand};
use dsonlib::{encode, File, UnhashPolicy, Unhasher};
use rayon::prelude::*;
use std::error::Error;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "dsonedit")]
#[command(about = "Convert DSON save files to and from extended JSON")]
#[command(version)]
struct Cli {
    /// Log decoder and encoder progress
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode binary save files to text
    ///
    /// Examples:
    ///   dsonedit decode persist.roster.json > roster.txt
    ///   dsonedit decode -n names.txt -o out/ saves/*.json
    Decode {
        /// Binary input files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Precede every field with a comment describing its binary form
        #[arg(short, long)]
        debug: bool,
        /// File with one name per line, offered for hashed integers
        #[arg(short, long)]
        names: Option<PathBuf>,
        /// How resolved names are rendered (none, unhash, pound-unhash)
        #[arg(long, default_value = "pound-unhash")]
        unhash: UnhashPolicy,
        /// Output file, or output directory when decoding several inputs
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Encode a text file to binary
    Encode {
        /// Text input file
        input: PathBuf,
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check that binary files re-encode to identical bytes
    Check {
        /// Binary input files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Decode {
            inputs,
            debug,
            names,
            unhash,
            output,
        } => handle_decode(&inputs, debug, names.as_deref(), unhash, output.as_deref()),
        Commands::Encode { input, output } => handle_encode(&input, output.as_deref()),
        Commands::Check { inputs } => handle_check(&inputs),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_names(path: Option<&Path>) -> Result<Unhasher<String>, Box<dyn Error>> {
    let mut names = Unhasher::new();
    if let Some(path) = path {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("cannot read names file {}: {}", path.display(), e))?;
        names.offer_names(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_owned),
        );
        debug!(path = %path.display(), count = names.len(), "loaded names");
    }
    Ok(names)
}

fn decode_file(path: &Path, names: &Unhasher<String>, policy: UnhashPolicy) -> Result<File, BoxError> {
    let buf = fs::read(path)?;
    Ok(File::try_from_bin(&buf, names, policy)?)
}

fn write_text(file: &File, debug: bool, out: &mut dyn Write) -> std::io::Result<()> {
    let mut w = BufWriter::new(out);
    file.write_to_json(&mut w, debug)?;
    w.write_all(b"\n")?;
    w.flush()
}

/// Target of one of several decoded inputs: `INPUT.json` next to the input,
/// or under `dir` when given.
fn batch_target(input: &Path, dir: Option<&Path>) -> PathBuf {
    let mut name = match dir {
        Some(dir) => dir
            .join(input.file_name().unwrap_or(input.as_os_str()))
            .into_os_string(),
        None => input.as_os_str().to_owned(),
    };
    name.push(".json");
    PathBuf::from(name)
}

fn handle_decode(
    inputs: &[PathBuf],
    debug: bool,
    names: Option<&Path>,
    policy: UnhashPolicy,
    output: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let names = load_names(names)?;

    if let [input] = inputs {
        let file = decode_file(input, &names, policy)
            .map_err(|e| format!("{}: {}", input.display(), e))?;
        match output {
            Some(path) => write_text(&file, debug, &mut fs::File::create(path)?)?,
            None => write_text(&file, debug, &mut std::io::stdout().lock())?,
        }
        return Ok(());
    }

    if let Some(dir) = output {
        fs::create_dir_all(dir)?;
    }
    let results: Vec<(&PathBuf, Result<PathBuf, BoxError>)> = inputs
        .par_iter()
        .map(|input| {
            let res = decode_file(input, &names, policy).and_then(|file| {
                let target = batch_target(input, output);
                write_text(&file, debug, &mut fs::File::create(&target)?)?;
                Ok(target)
            });
            (input, res)
        })
        .collect();

    report_batch(&results)
}

fn report_batch(results: &[(&PathBuf, Result<PathBuf, BoxError>)]) -> Result<(), Box<dyn Error>> {
    let mut failed = 0;
    for (input, res) in results {
        match res {
            Ok(target) => info!(input = %input.display(), output = %target.display(), "decoded"),
            Err(e) => {
                eprintln!("{}: {}", input.display(), e);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        return Err(format!("{} of {} files failed", failed, results.len()).into());
    }
    Ok(())
}

fn handle_encode(input: &Path, output: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let buf = fs::read(input)?;
    let text = std::str::from_utf8(&buf).map_err(dsonlib::err::FromJsonError::from);
    let bin = text
        .and_then(encode)
        .map_err(|e| format!("{}: {}", input.display(), e))?;
    match output {
        Some(path) => fs::write(path, &bin)?,
        None => {
            let mut out = std::io::stdout().lock();
            out.write_all(&bin)?;
            out.flush()?;
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum CheckOutcome {
    Identical,
    /// Duplicate field names are dropped when rendering, so the size changes.
    Duplicates,
    Differs,
}

fn check_file(path: &Path) -> Result<CheckOutcome, BoxError> {
    let buf = fs::read(path)?;
    let file = File::try_from_bin(&buf, &Unhasher::empty(), UnhashPolicy::None)?;
    let bin = encode(&file.to_json_string(false))?;
    Ok(if bin == buf {
        CheckOutcome::Identical
    } else if file.has_duplicate_fields() {
        CheckOutcome::Duplicates
    } else {
        CheckOutcome::Differs
    })
}

fn handle_check(inputs: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let results: Vec<_> = inputs.par_iter().map(|p| (p, check_file(p))).collect();

    let mut failed = 0;
    for (input, res) in &results {
        match res {
            Ok(CheckOutcome::Identical) => println!("{}: ok", input.display()),
            Ok(CheckOutcome::Duplicates) => {
                println!("{}: ok, duplicate field names dropped", input.display())
            }
            Ok(CheckOutcome::Differs) => {
                println!("{}: re-encoded bytes differ", input.display());
                failed += 1;
            }
            Err(e) => {
                println!("{}: error: {}", input.display(), e);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        return Err(format!("{} of {} files failed the check", failed, results.len()).into());
    }
    Ok(())
}
