use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use fw_image_tools::config::{self, ConfigDoc, ToolConfig};
use fw_image_tools::hashsum::{self, HashAlgo};
use fw_image_tools::inventory::{self, DupsOptions};
use fw_image_tools::log_sanitize::sanitize_log_line;
use fw_image_tools::partition_table::{self, PartitionTable};
use fw_image_tools::size::{HumanSize, partition_size};
use fw_image_tools::{Document, Result, Strictness};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Tool config TOML (supports `extends` and `imports`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override a config value, e.g. `--set encode.strict=true`
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    set: Vec<String>,
    /// Debug logging (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Encode a JSON partition layout into a binary partition table image
    Encode {
        /// Input JSON partition definition
        #[arg(short = 'j', long = "json")]
        json: PathBuf,
        /// Output binary partition image
        #[arg(short = 'o', long = "output-image", alias = "output_image")]
        output_image: PathBuf,
        /// Fail on malformed entries and bad sizes instead of skipping them
        #[arg(long)]
        strict: bool,
    },
    /// Decode a partition table image and verify its checksum
    Inspect {
        image: PathBuf,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the size of one partition from a JSON layout
    Size {
        #[arg(short = 'f', long = "json-file", alias = "json_file")]
        json_file: PathBuf,
        #[arg(short = 'p', long = "partition-name", alias = "partition_name")]
        partition_name: String,
    },
    /// Write a checksum manifest for a list of files
    Hash {
        #[arg(short = 'i', long = "input-files", num_args = 1.., required = true)]
        input_files: Vec<PathBuf>,
        /// Defaults to `<algo>sum.txt`
        #[arg(short = 'o', long = "output-file")]
        output_file: Option<PathBuf>,
        /// sha1, sha256 or sha512
        #[arg(long, alias = "sha")]
        algo: Option<String>,
    },
    /// Report files sharing both name and content under a directory
    Dups {
        #[arg(short = 'd', long)]
        directory: PathBuf,
        #[arg(short = 'e', long, num_args = 1.., allow_hyphen_values = true)]
        extensions: Vec<String>,
        #[arg(short = 'a', long = "all-files")]
        all_files: bool,
        #[arg(short = 'x', long = "exclude-dirs", num_args = 1..)]
        exclude_dirs: Vec<String>,
    },
    /// List files present in a source tree but not in a reference tree
    Diff {
        #[arg(short = 's', long = "source-dir")]
        source_dir: PathBuf,
        #[arg(short = 'r', long = "reference-dir")]
        reference_dir: PathBuf,
        #[arg(short = 'c', long = "show-common")]
        show_common: bool,
    },
    /// Print the fully-resolved tool config (after extends/imports/--set)
    Config {
        /// Dotted path of one value to print, e.g. `hash.algo`
        key: Option<String>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    let verbose = args.verbose;
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            fw_image_tools::logging::ensure_installed(verbose);
            tracing::error!("{e}");
            println!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut doc = match &args.config {
        Some(path) => config::load(path)?,
        None => ConfigDoc::empty(),
    };
    config::apply_cli_overrides(&mut doc, &args.set)?;
    let cfg = doc.tool_config()?;
    fw_image_tools::logging::init(&cfg.logging, args.verbose)?;

    match args.cmd {
        Command::Encode {
            json,
            output_image,
            strict,
        } => cmd_encode(&cfg, &json, &output_image, strict),
        Command::Inspect { image, json } => cmd_inspect(&image, json),
        Command::Size {
            json_file,
            partition_name,
        } => cmd_size(&cfg, &json_file, &partition_name),
        Command::Hash {
            input_files,
            output_file,
            algo,
        } => cmd_hash(&cfg, &input_files, output_file, algo.as_deref()),
        Command::Dups {
            directory,
            extensions,
            all_files,
            exclude_dirs,
        } => {
            let mut opts = cfg.dups.clone();
            if !extensions.is_empty() {
                opts.extensions = extensions;
            }
            opts.all_files |= all_files;
            opts.exclude_dirs.extend(exclude_dirs);
            cmd_dups(&directory, &opts)
        }
        Command::Diff {
            source_dir,
            reference_dir,
            show_common,
        } => cmd_diff(&source_dir, &reference_dir, show_common),
        Command::Config { key } => cmd_config(&doc, key.as_deref()),
    }
}

fn cmd_config(doc: &ConfigDoc, key: Option<&str>) -> Result<()> {
    let key = key.unwrap_or("");
    let value = doc.value_path(key).ok_or_else(|| {
        fw_image_tools::Error::config(format!("config key not found: {key}"))
    })?;
    match value {
        toml::Value::Table(_) => {
            let s = toml::to_string_pretty(value)
                .map_err(|e| fw_image_tools::Error::msg(format!("toml encode error: {e}")))?;
            print!("{s}");
        }
        toml::Value::String(s) => println!("{s}"),
        other => println!("{other}"),
    }
    Ok(())
}

fn cmd_encode(cfg: &ToolConfig, json: &Path, out: &Path, strict: bool) -> Result<()> {
    if !json.is_file() {
        return Err(fw_image_tools::Error::io(format!(
            "input JSON file not found: {}",
            json.display()
        )));
    }
    let mode = Strictness::from_strict(strict || cfg.encode.strict);
    partition_table::encode_file(json, out, mode)?;
    println!("Partition image successfully created at {}", out.display());
    Ok(())
}

fn cmd_inspect(path: &Path, as_json: bool) -> Result<()> {
    let data = fs::read(path)
        .map_err(|e| fw_image_tools::Error::io(format!("failed to read {}: {e}", path.display())))?;
    let table = PartitionTable::from_bytes(&data)?;
    let h = &table.header;

    if as_json {
        let parts: Vec<_> = table
            .records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "name": r.name_str(),
                    "start": r.start,
                    "size": r.size,
                    "bootable": r.bootable,
                    "has_image": r.has_image,
                })
            })
            .collect();
        let v = serde_json::json!({
            "magic": format!("{:#010x}", h.magic),
            "version": h.version,
            "crc32": format!("{:#010x}", h.crc32),
            "block_size": h.block_size,
            "partitions": parts,
        });
        let s = serde_json::to_string_pretty(&v)
            .map_err(|e| fw_image_tools::Error::msg(format!("json encode error: {e}")))?;
        println!("{s}");
        return Ok(());
    }

    println!("magic    {:#010x}", h.magic);
    println!("version  {}", h.version);
    println!("crc32    {:#010x} (ok)", h.crc32);
    println!("blksz    {}", h.block_size);
    println!("count    {}", h.count);
    println!(
        "{:>3}  {:<31}  {:>12}  {:>12}  {:>12}  {:>4}  {:>5}",
        "#", "name", "start", "size", "end", "boot", "image"
    );
    for (i, r) in table.records.iter().enumerate() {
        println!(
            "{:>3}  {:<31}  {:>12}  {:>12}  {:>12}  {:>4}  {:>5}",
            i,
            sanitize_log_line(&r.name_str()),
            r.start,
            r.size,
            r.end(),
            r.bootable,
            r.has_image
        );
    }
    Ok(())
}

// A partition that cannot be resolved reports as size 0; callers treat that
// as "absent" rather than as a failure.
fn cmd_size(cfg: &ToolConfig, json: &Path, name: &str) -> Result<()> {
    let shown = sanitize_log_line(name);
    let mode = Strictness::from_strict(cfg.encode.strict);
    let size = match Document::load(json, mode) {
        Ok(doc) => partition_size(&doc, name).unwrap_or_else(|e| {
            tracing::debug!("{e}");
            None
        }),
        Err(e) => {
            tracing::debug!("{e}");
            None
        }
    };
    match size {
        Some(bytes) => println!("{shown} : {}", HumanSize::from_bytes(bytes)),
        None => {
            tracing::debug!(partition = %shown, "partition not found or empty");
            println!("{shown} : 0");
        }
    }
    Ok(())
}

fn cmd_hash(
    cfg: &ToolConfig,
    inputs: &[PathBuf],
    out: Option<PathBuf>,
    algo: Option<&str>,
) -> Result<()> {
    let algo = match algo {
        Some(raw) => raw.parse::<HashAlgo>()?,
        None => cfg.hash.algo,
    };
    let out = out.unwrap_or_else(|| PathBuf::from(algo.default_manifest_name()));
    hashsum::write_manifest(inputs, algo, &out)?;
    println!("Successfully wrote hash values to {}", out.display());
    Ok(())
}

fn cmd_dups(dir: &Path, opts: &DupsOptions) -> Result<()> {
    println!("Scanning directory: {}", dir.display());
    let report = inventory::find_duplicates(dir, opts)?;
    if report.files_scanned == 0 {
        println!("No files found matching the criteria.");
        return Ok(());
    }
    if report.groups.is_empty() {
        println!("No files found with both the same name and same content.");
        return Ok(());
    }
    for g in &report.groups {
        println!(
            "\nFiles named '{}' with the same content (SHA-256: {}):",
            sanitize_log_line(&g.file_name),
            g.digest
        );
        for p in &g.paths {
            println!("  - {}", p.display());
        }
    }
    Ok(())
}

fn cmd_diff(source: &Path, reference: &Path, show_common: bool) -> Result<()> {
    let diff = inventory::diff_dirs(source, reference)?;
    println!("Source directory: {}", source.display());
    println!("Reference directory: {}", reference.display());

    if diff.unique.is_empty() && !(show_common && !diff.common.is_empty()) {
        println!("No files in the source directory are missing from the reference (by file name).");
        return Ok(());
    }

    println!("\nFiles present in source but not in reference:");
    for rel in &diff.unique {
        println!("  - {rel}");
    }
    if show_common {
        println!("\nCommon files (present in both directories):");
        for c in &diff.common {
            println!("  - Source: {}", c.source);
            println!("    Reference: {}", c.reference);
        }
    }
    println!("\nTotal unique files in source: {}", diff.unique.len());
    if show_common {
        println!("Total common files: {}", diff.common.len());
    }
    Ok(())
}
