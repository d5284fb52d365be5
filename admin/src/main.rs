//! `classifyd-admin`: the CLI debug tool's contract-relevant surface
//! (§6 CLI surface). Exit codes: `0` normal no-hit, `1` error, `2`
//! hits found. Output formats: text (default), json, csv.

use classifyd_core::crypto::hash_sm3;
use classifyd_detect::alert::{AlertRecord, HostMeta};
use classifyd_detect::context::ScanContext;
use classifyd_detect::manager::DetectorManager;
use classifyd_detect::policy::PolicyManager;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "classifyd-admin", author, version, about)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the detection pipeline against a single file, seeded from
    /// the on-disk policy (§4.6) in the given data directory.
    Scan {
        /// File to scan.
        path: PathBuf,

        /// Directory holding `<module>_policy.json` (defaults to the
        /// current directory).
        #[arg(long, default_value = ".")]
        data_dir: PathBuf,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Print the SM3 digest of this executable, covering the
    /// integrity monitor's sole specified obligation.
    Selfhash,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
    Csv,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Scan { path, data_dir, format } => scan(&path, &data_dir, format),
        Command::Selfhash => selfhash(),
    }
}

fn scan(path: &Path, data_dir: &Path, format: Format) -> ExitCode {
    let policy = match PolicyManager::load_or_init(data_dir) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("failed to load policy from {}: {e}", data_dir.display());
            return ExitCode::from(1);
        }
    };

    let detectors = DetectorManager::new(HostMeta::default());
    detectors.set_hash_rules(policy.hash.rules());
    detectors.set_keyword_rules(policy.keyword.rules());
    detectors.set_stream_marker_rules(policy.secret_level.rules());
    detectors.set_electronic_marker_rules(policy.electronic.rules());
    if let Some(layout_rule) = policy.layout.rules().into_iter().next() {
        detectors.set_layout_rule(layout_rule);
    }

    if !path.is_file() {
        eprintln!("not a file: {}", path.display());
        return ExitCode::from(1);
    }

    let ctx = ScanContext::default_deadline();
    let (hit, alert, _log) = detectors.detect(&ctx, path);

    match alert {
        Some(record) => {
            render(&record, format);
            if hit {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
        None if hit => {
            eprintln!("detection hit but no alert record assembled (unreadable file?)");
            ExitCode::from(1)
        }
        None => {
            print_no_hit(format);
            ExitCode::from(0)
        }
    }
}

fn render(record: &AlertRecord, format: Format) {
    match format {
        Format::Text => {
            println!(
                "HIT file={} rule_id={} level={:?} matched=\"{}\"",
                record.file_path, record.rule_id, record.secret_level, record.matched_text
            );
        }
        Format::Json => match serde_json::to_string_pretty(record) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("failed to encode json: {e}"),
        },
        Format::Csv => {
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            if let Err(e) = writer.serialize(record) {
                eprintln!("failed to encode csv: {e}");
            }
            let _ = writer.flush();
        }
    }
}

fn print_no_hit(format: Format) {
    match format {
        Format::Text => println!("no hit"),
        Format::Json => println!("{{\"hit\":false}}"),
        Format::Csv => println!("hit\nfalse"),
    }
}

fn selfhash() -> ExitCode {
    let exe = match std::env::current_exe() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("failed to resolve own executable path: {e}");
            return ExitCode::from(1);
        }
    };
    let bytes = match std::fs::read(&exe) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("failed to read {}: {e}", exe.display());
            return ExitCode::from(1);
        }
    };
    println!("{}", hash_sm3(&bytes).to_hex());
    ExitCode::from(0)
}
