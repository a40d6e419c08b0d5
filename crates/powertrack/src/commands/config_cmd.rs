//! Config subcommand handlers.

use std::path::PathBuf;

use dialoguer::Input;

use powertrack_config::{
    CredentialsSection, DEFAULT_STREAM_URL, DefaultLocator, FileConfig, FixedLocator, Overrides,
    PowertrackSection,
};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, InitArgs};
use crate::error::CliError;

// ── Helpers ─────────────────────────────────────────────────────────

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Prompt(e.to_string())
}

/// The file `stream` would read, or where `init` would write one.
fn target_path(global: &GlobalOpts) -> (PathBuf, bool) {
    let overrides = Overrides {
        config_path: global.config.clone(),
        ..Overrides::default()
    };
    match powertrack_config::config_file(&overrides, &DefaultLocator) {
        Some(path) => {
            let exists = path.is_file();
            (path, exists)
        }
        None => (powertrack_config::config_path(), false),
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            let (path, exists) = target_path(global);
            println!("{}", path.display());
            if !exists {
                eprintln!("(file does not exist yet; create it with: powertrack config init)");
            }
            Ok(())
        }

        ConfigCommand::Show => {
            let (path, exists) = target_path(global);
            let cfg = if exists {
                powertrack_config::load(&path)?
            } else {
                FileConfig::default()
            };

            println!("file     = {}{}", path.display(), if exists { "" } else { " (missing)" });
            println!("username = {}", cfg.username().unwrap_or("(not set)"));
            println!(
                "password = {}",
                if cfg.password().is_some() { "********" } else { "(not set)" }
            );
            match cfg.url() {
                Some(url) => println!("url      = {url}"),
                None => println!("url      = {DEFAULT_STREAM_URL} (default)"),
            }
            Ok(())
        }

        ConfigCommand::Init(init) => run_init(init, global),
    }
}

// ── Init ────────────────────────────────────────────────────────────

fn run_init(args: InitArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = global
        .config
        .clone()
        .unwrap_or_else(powertrack_config::config_path);

    if path.exists() && !args.force {
        return Err(CliError::ConfigExists {
            path: path.display().to_string(),
        });
    }

    eprintln!("PowerTrack configuration");
    eprintln!("   Config path: {}\n", path.display());

    let username = match args.username {
        Some(u) => u,
        None => Input::new()
            .with_prompt("Username")
            .interact_text()
            .map_err(prompt_err)?,
    };

    let password = match args.password {
        Some(p) => p,
        None => rpassword::prompt_password("Password: ").map_err(prompt_err)?,
    };

    let url = match args.url {
        Some(u) => u,
        None => Input::new()
            .with_prompt("Stream URL")
            .default(DEFAULT_STREAM_URL.to_owned())
            .interact_text()
            .map_err(prompt_err)?,
    };

    // Run the values through resolution so a bad file is never written.
    let overrides = Overrides {
        username: Some(username.clone()),
        password: Some(password.clone().into()),
        url: Some(url.clone()),
        config_path: None,
    };
    powertrack_config::resolve(&overrides, &FixedLocator::none())?;

    let cfg = FileConfig {
        credentials: Some(CredentialsSection {
            username: Some(username),
            password: Some(password),
        }),
        powertrack: Some(PowertrackSection { url: Some(url) }),
    };
    powertrack_config::save(&path, &cfg)?;

    eprintln!("\n✓ Configuration written to {}", path.display());
    eprintln!("\n  Test it: powertrack stream");
    Ok(())
}
