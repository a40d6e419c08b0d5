// Renders `powertrack` man pages and shell completions into OUT_DIR so
// packagers can ship them next to the binary.

use std::fs;
use std::io;
use std::path::PathBuf;

use clap::{Command, CommandFactory, ValueEnum};
use clap_complete::Shell;

#[path = "src/cli.rs"]
mod cli;

fn main() -> io::Result<()> {
    println!("cargo::rerun-if-changed=src/cli.rs");

    let out_dir: PathBuf = std::env::var_os("OUT_DIR")
        .ok_or_else(|| io::Error::other("OUT_DIR is not set"))?
        .into();
    let mut cmd = cli::Cli::command();

    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir)?;
    for page in man_pages(&cmd) {
        let mut file = fs::File::create(man_dir.join(format!("{}.1", page.get_name())))?;
        clap_mangen::Man::new(page).render(&mut file)?;
    }

    let completion_dir = out_dir.join("completions");
    fs::create_dir_all(&completion_dir)?;
    for &shell in Shell::value_variants() {
        clap_complete::generate_to(shell, &mut cmd, "powertrack", &completion_dir)?;
    }
    Ok(())
}

/// `powertrack`, `powertrack-stream`, `powertrack-config-init`, ...
fn man_pages(cmd: &Command) -> Vec<Command> {
    let prefix = cmd.get_name().to_owned();
    let mut pages = vec![cmd.clone()];
    for sub in cmd.get_subcommands().filter(|sub| !sub.is_hide_set()) {
        let named = sub.clone().name(format!("{prefix}-{}", sub.get_name()));
        pages.extend(man_pages(&named));
    }
    pages
}
