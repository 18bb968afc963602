use std::fs;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;

use atc::{depfile, CompileOutput, Compiler, GenerateOptions};

#[derive(Parser)]
#[command(
    name = "atc",
    version,
    about = "Compile .at templates into C++ render modules",
    disable_version_flag = true
)]
struct Cli {
    /// Path to the root .at template
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Path to write the generated source file
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// Base directory for resolving include/extends paths
    #[arg(long = "base-dir", default_value = ".")]
    base_dir: PathBuf,

    /// Path to write a Make-style dependency manifest
    #[arg(long = "dep-file")]
    dep_file: Option<PathBuf>,

    /// Print version
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,
}

fn main() {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // help and version exit 0; everything else is a failure
            let code = if err.exit_code() == 0 { 0 } else { 1 };
            let _ = err.print();
            process::exit(code);
        }
    };

    let start = Instant::now();
    let compiler = Compiler::new(&cli.base_dir);
    let options = GenerateOptions::default();

    let output = match compiler.compile_file(&cli.input, &options) {
        Ok(output) => output,
        Err(err) => {
            if io::stderr().is_terminal() {
                eprint!("{}", err.render_color());
            } else {
                eprint!("{}", err.render());
            }
            process::exit(1);
        }
    };

    if let Err(err) = write_outputs(&cli, &output) {
        eprintln!("error: {:#}", err);
        process::exit(1);
    }

    print_generated(&cli.output.to_string_lossy());
    print_summary(start.elapsed());
}

fn write_outputs(cli: &Cli, output: &CompileOutput) -> anyhow::Result<()> {
    fs::write(&cli.output, &output.code)
        .with_context(|| format!("failed to write {}", cli.output.display()))?;
    if let Some(dep_path) = &cli.dep_file {
        let manifest = depfile::render(&cli.output, &output.manifest);
        fs::write(dep_path, manifest)
            .with_context(|| format!("failed to write {}", dep_path.display()))?;
    }
    Ok(())
}

fn print_generated(path: &str) {
    if io::stderr().is_terminal() {
        eprintln!("  \x1b[32m✓\x1b[0m {}", path);
    } else {
        eprintln!("  ✓ {}", path);
    }
}

fn print_summary(elapsed: std::time::Duration) {
    let time_str = format_duration(elapsed);
    if io::stderr().is_terminal() {
        eprintln!("\n\x1b[1m✨ Generated 1 file in {}\x1b[0m", time_str);
    } else {
        eprintln!("\n✨ Generated 1 file in {}", time_str);
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let micros = d.as_micros();
    if micros < 1000 {
        format!("{}μs", micros)
    } else if micros < 1_000_000 {
        format!("{:.1}ms", micros as f64 / 1000.0)
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}
