// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn update_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("repo")
            .required(true)
            .value_name("REPO")
            .help("Existing repository archive (need not exist yet)"),
    )
    .arg(
        Arg::new("db")
            .long("db")
            .value_name("PATH")
            .help("Metadata index output (default: <repo>.db)"),
    )
    .arg(
        Arg::new("files")
            .long("files")
            .value_name("PATH")
            .help("Full index output (default: <repo>.files)"),
    )
    .arg(
        Arg::new("ledger")
            .long("ledger")
            .value_name("PATH")
            .help("Write removed artifact filenames to this file, one per line"),
    )
    .arg(
        Arg::new("prune_dir")
            .long("prune-dir")
            .value_name("DIR")
            .help("Delete removed artifacts from this directory"),
    )
    .arg(
        Arg::new("json")
            .long("json")
            .action(ArgAction::SetTrue)
            .help("Print the update report as JSON"),
    )
    .arg(
        Arg::new("level")
            .long("level")
            .default_value("19")
            .help("zstd compression level (1-22)"),
    )
    .arg(
        Arg::new("threads")
            .long("threads")
            .default_value("0")
            .help("Worker threads (0 = all cores)"),
    )
    .arg(
        Arg::new("strict")
            .long("strict")
            .action(ArgAction::SetTrue)
            .help("Fail when two entries of a package carry the same version"),
    )
}

fn build_cli() -> Command {
    Command::new("pkgindex")
        .version(env!("CARGO_PKG_VERSION"))
        .author("pkgindex Contributors")
        .about("Maintain pacman-style package repository indexes")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Enable debug logging (overridden by RUST_LOG)"),
        )
        .subcommand_required(true)
        .subcommand(
            update_args(
                Command::new("add")
                    .about("Add package artifacts to a repository, dropping superseded versions"),
            )
            .arg(
                Arg::new("packages")
                    .num_args(0..)
                    .help("Package artifacts (.pkg.tar.zst, .pkg.tar.xz, .pkg.tar.gz)"),
            )
            .arg(
                Arg::new("remove")
                    .short('r')
                    .long("remove")
                    .value_name("NAME")
                    .action(ArgAction::Append)
                    .help("Remove every version of this package (repeatable)"),
            ),
        )
        .subcommand(
            update_args(Command::new("remove").about("Remove packages from a repository by name"))
                .arg(
                    Arg::new("names")
                        .required(true)
                        .num_args(1..)
                        .help("Package names to remove"),
                ),
        )
        .subcommand(
            Command::new("list")
                .about("List the packages in a repository index")
                .arg(Arg::new("index").required(true).help("Index archive (.db or .files)")),
        )
        .subcommand(
            Command::new("show")
                .about("Show the metadata of a package artifact")
                .arg(Arg::new("package").required(true).help("Path to the package artifact")),
        )
        .subcommand(
            Command::new("vercmp")
                .about("Compare two version strings, printing -1, 0 or 1")
                .arg(Arg::new("a").required(true))
                .arg(Arg::new("b").required(true)),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    fs::write(man_dir.join("pkgindex.1"), buffer).expect("Failed to write man page");
}
