//! The command-line driver: read one C source file, write assembly to
//! standard output, report the first error to standard error.

use std::fs;
use std::io::{self, Read, Write};
use std::process::ExitCode;

use clap::Parser;

/// A single-pass compiler for a small subset of C targeting x86-64.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
  /// Source file to compile, or `-` to read from standard input.
  input: String,
}

fn main() -> ExitCode {
  env_logger::init();
  let cli = Cli::parse();

  let src = match read_source(&cli.input) {
    Ok(src) => src,
    Err(e) => {
      eprintln!("nanocc: {}: {e}", cli.input);
      return ExitCode::FAILURE
    }
  };

  let stdout = io::stdout();
  let mut out = io::BufWriter::new(stdout.lock());
  if let Err(e) = nanocc::compile(&src, &mut out) {
    eprintln!("nanocc: {e}");
    return ExitCode::FAILURE
  }
  if let Err(e) = out.flush() {
    eprintln!("nanocc: {e}");
    return ExitCode::FAILURE
  }
  ExitCode::SUCCESS
}

fn read_source(input: &str) -> io::Result<String> {
  if input == "-" {
    let mut src = String::new();
    io::stdin().read_to_string(&mut src)?;
    Ok(src)
  } else {
    fs::read_to_string(input)
  }
}
