// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn prefix_arg() -> Arg {
    Arg::new("prefix")
        .long("prefix")
        .value_name("DIR")
        .help("Filesystem prefix packages are installed into")
}

fn root_arg() -> Arg {
    Arg::new("root")
        .long("root")
        .value_name("DIR")
        .help("State directory (installed-package store, cache, repos.txt)")
}

fn confirm_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("yes")
            .short('y')
            .long("yes")
            .action(clap::ArgAction::SetTrue)
            .help("Assume yes for every confirmation"),
    )
    .arg(
        Arg::new("no")
            .short('n')
            .long("no")
            .action(clap::ArgAction::SetTrue)
            .help("Assume no for every confirmation"),
    )
}

fn build_cli() -> Command {
    Command::new("treepkg")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Package manager for versioned zip file trees")
        .arg(prefix_arg().global(true))
        .arg(root_arg().global(true))
        .arg(
            Arg::new("offline")
                .long("offline")
                .action(clap::ArgAction::SetTrue)
                .global(true)
                .help("Never touch the network"),
        )
        .arg(
            Arg::new("unverified_ssl")
                .long("unverified-ssl")
                .action(clap::ArgAction::SetTrue)
                .global(true)
                .help("Skip TLS certificate verification"),
        )
        .subcommand(confirm_args(
            Command::new("install")
                .about("Install packages")
                .arg(Arg::new("packages").num_args(1..).help("Package specs"))
                .arg(
                    Arg::new("force")
                        .short('f')
                        .long("force")
                        .action(clap::ArgAction::SetTrue)
                        .help("Overwrite existing files"),
                )
                .arg(
                    Arg::new("download_only")
                        .short('w')
                        .long("download-only")
                        .action(clap::ArgAction::SetTrue)
                        .help("Download archives without installing"),
                ),
        ))
        .subcommand(confirm_args(
            Command::new("update")
                .about("Update installed packages")
                .arg(Arg::new("packages").num_args(0..).help("Package specs"))
                .arg(
                    Arg::new("force")
                        .short('f')
                        .long("force")
                        .action(clap::ArgAction::SetTrue)
                        .help("Update even when already current"),
                )
                .arg(
                    Arg::new("download_only")
                        .short('w')
                        .long("download-only")
                        .action(clap::ArgAction::SetTrue)
                        .help("Download archives without updating"),
                ),
        ))
        .subcommand(confirm_args(
            Command::new("remove")
                .about("Remove installed packages")
                .arg(Arg::new("packages").num_args(1..).help("Package names")),
        ))
        .subcommand(
            Command::new("check")
                .about("Verify installed files against recorded checksums")
                .arg(Arg::new("packages").num_args(0..)),
        )
        .subcommand(
            Command::new("list-available")
                .about("List packages available in the configured repositories")
                .arg(Arg::new("packages").num_args(0..)),
        )
        .subcommand(Command::new("list-installed").about("List installed packages"))
        .subcommand(
            Command::new("show-untracked")
                .about("List files under the prefix no installed package owns")
                .arg(Arg::new("paths").num_args(0..)),
        )
        .subcommand(
            Command::new("merge-config")
                .about("Merge outstanding config conflicts with vim -d")
                .arg(Arg::new("packages").num_args(0..)),
        )
        .subcommand(
            Command::new("if-installed")
                .about("Exit successfully only if a package is installed")
                .arg(Arg::new("package").required(true)),
        )
        .subcommand(Command::new("clean-cache").about("Delete cached package archives"))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    fs::write(man_dir.join("treepkg.1"), buffer).expect("Failed to write man page");
}
