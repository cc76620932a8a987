// src/main.rs

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pkgindex::packages::{ArchPackage, PackageFormat};
use pkgindex::repository::{RepositoryLock, read_index};
use pkgindex::{UpdateOptions, UpdateReport, update_repository, vercmp};
use std::cmp::Ordering;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "pkgindex")]
#[command(author, version, about = "Maintain pacman-style package repository indexes", long_about = None)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that rewrites a repository
#[derive(Args)]
struct UpdateArgs {
    /// Existing repository archive (need not exist yet)
    repo: PathBuf,
    /// Metadata index output (default: <repo>.db)
    #[arg(long = "db", value_name = "PATH")]
    db_path: Option<PathBuf>,
    /// Full index output (default: <repo>.files)
    #[arg(long = "files", value_name = "PATH")]
    files_path: Option<PathBuf>,
    /// Write removed artifact filenames to this file, one per line
    #[arg(long, value_name = "PATH")]
    ledger: Option<PathBuf>,
    /// Delete removed artifacts from this directory
    #[arg(long, value_name = "DIR")]
    prune_dir: Option<PathBuf>,
    /// Print the update report as JSON
    #[arg(long)]
    json: bool,
    /// zstd compression level (1-22)
    #[arg(long, default_value_t = 19)]
    level: i32,
    /// Worker threads (0 = all cores)
    #[arg(long, default_value_t = 0)]
    threads: usize,
    /// Fail when two entries of a package carry the same version
    #[arg(long)]
    strict: bool,
}

impl UpdateArgs {
    fn options(&self) -> UpdateOptions {
        UpdateOptions {
            db_path: self.db_path.clone(),
            files_path: self.files_path.clone(),
            compression_level: self.level,
            threads: self.threads,
            strict_duplicates: self.strict,
            work_dir: None,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Add package artifacts to a repository, dropping superseded versions
    Add {
        #[command(flatten)]
        update: UpdateArgs,
        /// Package artifacts (.pkg.tar.zst, .pkg.tar.xz, .pkg.tar.gz)
        packages: Vec<PathBuf>,
        /// Remove every version of this package (repeatable)
        #[arg(short, long = "remove", value_name = "NAME")]
        remove: Vec<String>,
    },
    /// Remove packages from a repository by name
    Remove {
        #[command(flatten)]
        update: UpdateArgs,
        /// Package names to remove
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// List the packages in a repository index
    List {
        /// Index archive (.db or .files)
        index: PathBuf,
    },
    /// Show the metadata of a package artifact
    Show {
        /// Path to the package artifact
        package: PathBuf,
    },
    /// Compare two version strings, printing -1, 0 or 1
    Vercmp { a: String, b: String },
}

fn ordering_code(ordering: Ordering) -> i32 {
    match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

fn write_ledger(path: &Path, removed: &[String]) -> Result<()> {
    let mut content = String::new();
    for filename in removed {
        content.push_str(filename);
        content.push('\n');
    }
    fs::write(path, content).with_context(|| format!("Failed to write ledger {}", path.display()))
}

/// Delete obsolete artifacts (and their detached signatures) from `dir`
fn prune_artifacts(dir: &Path, removed: &[String]) -> Result<usize> {
    let mut pruned = 0;

    for filename in removed {
        // Ledger entries come from %FILENAME%; refuse anything that is not a plain name.
        if Path::new(filename).file_name().map(|n| n != filename.as_str()).unwrap_or(true) {
            warn!("Refusing to prune suspicious filename {:?}", filename);
            continue;
        }

        for candidate in [dir.join(filename), dir.join(format!("{}.sig", filename))] {
            match fs::remove_file(&candidate) {
                Ok(()) => {
                    info!("Pruned {}", candidate.display());
                    pruned += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to delete {}", candidate.display()));
                }
            }
        }
    }

    Ok(pruned)
}

fn print_report(report: &UpdateReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for filename in &report.removed {
        println!("removed {}", filename);
    }
    for dup in &report.duplicates {
        println!("duplicate {} ({} kept over {})", dup.name, dup.kept, dup.duplicate);
    }
    println!(
        "{} package(s) in {} and {}",
        report.packages,
        report.db_path.display(),
        report.files_path.display()
    );
    Ok(())
}

fn run_update(args: &UpdateArgs, packages: &[PathBuf], remove: &[String]) -> Result<()> {
    let _lock = RepositoryLock::acquire(&args.repo)?;

    let report = update_repository(&args.repo, packages, remove, &args.options())
        .with_context(|| format!("Failed to update repository {}", args.repo.display()))?;

    if let Some(path) = &args.ledger {
        write_ledger(path, &report.removed)?;
    }
    if let Some(dir) = &args.prune_dir {
        let pruned = prune_artifacts(dir, &report.removed)?;
        info!("Pruned {} file(s) from {}", pruned, dir.display());
    }

    print_report(&report, args.json)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Add {
            update,
            packages,
            remove,
        } => run_update(&update, &packages, &remove),
        Commands::Remove { update, names } => run_update(&update, &[], &names),
        Commands::List { index } => {
            let entries = read_index(&index)
                .with_context(|| format!("Failed to read index {}", index.display()))?;
            for entry in entries {
                println!("{} {}", entry.metadata.name, entry.metadata.version);
            }
            Ok(())
        }
        Commands::Show { package } => {
            let pkg = ArchPackage::open(&package)?;
            let meta = pkg.metadata();
            let files = pkg.file_manifest()?;

            println!("Name         : {}", meta.name);
            println!("Base         : {}", meta.base);
            println!("Version      : {}", meta.version);
            println!("Description  : {}", meta.description);
            println!("Architecture : {}", meta.architecture);
            println!("URL          : {}", meta.url.as_deref().unwrap_or("None"));
            println!("Groups       : {}", meta.groups.join(" "));
            println!("Depends      : {}", meta.depends.join(" "));
            println!("Replaces     : {}", meta.replaces.join(" "));
            println!("Packager     : {}", meta.packager);
            println!("Build Date   : {}", meta.build_date);
            println!("Installed    : {} bytes", meta.installed_size);
            println!("Size         : {} bytes", meta.compressed_size);
            println!("SHA-256      : {}", meta.sha256sum);
            println!("Files        : {}", files.len());
            Ok(())
        }
        Commands::Vercmp { a, b } => {
            println!("{}", ordering_code(vercmp(&a, &b)));
            Ok(())
        }
    }
}
