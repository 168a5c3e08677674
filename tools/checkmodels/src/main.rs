use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use wordpredict_core::validate::ModelInfo;
use wordpredict_core::validate_file;

/// Check language model files for structural damage.
#[derive(Parser)]
struct Opts {
    /// `.lm` files to check
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Machine readable output: `KIND, [args]` on stderr, counts on stdout
    #[arg(long)]
    test: bool,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .with_target(false)
        .init();

    let opts = Opts::parse();
    let mut failed = false;

    for path in &opts.files {
        debug!("checking {}", path.display());
        let report = validate_file(path);
        failed |= !report.is_ok();

        if opts.test {
            for error in &report.errors {
                eprintln!("{}", error.report_line());
            }
            if let Some(info) = &report.info {
                print_test_info(info);
            }
            continue;
        }

        if report.is_ok() {
            println!("{}: OK", path.display());
        } else {
            for error in &report.errors {
                eprintln!("{}: {}", path.display(), error);
            }
        }
        if let Some(info) = &report.info {
            print_info(info);
        }
    }

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_test_info(info: &ModelInfo) {
    println!("{}, {}", info.file_size, info.num_lines);
    for level in &info.levels {
        let declared = level
            .declared
            .map_or_else(|| "None".to_string(), |n| n.to_string());
        println!("{}, {}, {}", level.level, declared, level.encountered);
    }
}

fn print_info(info: &ModelInfo) {
    println!("  {} bytes, {} lines", info.file_size, info.num_lines);
    println!("  {:>5} {:>10} {:>10}", "level", "declared", "read");
    for level in &info.levels {
        let declared = level
            .declared
            .map_or_else(|| "-".to_string(), |n| n.to_string());
        println!("  {:>5} {:>10} {:>10}", level.level, declared, level.encountered);
    }
}
