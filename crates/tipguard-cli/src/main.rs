//! Tipguard CLI - operator tooling for the tip-line crypto layer
//!
//! Generates key material, bootstraps the secret vault, and checks field
//! tokens and recipient keys against the same code the service runs.

mod cli;
mod commands;
mod config;
mod constants;
mod errors;
mod security;

use clap::Parser;
use tipguard_core::TipguardError;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::constants::ENV_LOG;
use crate::errors::CliError;

fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        let err = match err.downcast::<CliError>() {
            Ok(cli_err) => cli_err.exit(),
            Err(err) => err,
        };
        match err.downcast::<TipguardError>() {
            Ok(core_err) => CliError::from(core_err).exit(),
            Err(err) => {
                eprintln!("Error: {:#}", err);
                std::process::exit(1);
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = || config::load_settings(cli.config.as_deref());
    match cli.command {
        Commands::GenKey => commands::keys::handle_gen_key(),
        Commands::AdminSecret { length } => commands::keys::handle_admin_secret(length),
        Commands::GenSalt => commands::keys::handle_gen_salt(),
        Commands::VaultInit => commands::vault::handle_init(&settings()?, cli.quiet),
        Commands::VaultPut { name } => commands::vault::handle_put(&settings()?, &name, cli.quiet),
        Commands::VaultGet { name } => commands::vault::handle_get(&settings()?, &name),
        Commands::VaultList => commands::vault::handle_list(&settings()?),
        Commands::EncryptField {
            value,
            domain,
            salt,
        } => commands::field::handle_encrypt(
            &settings()?,
            value,
            domain.as_deref(),
            salt.as_deref(),
        ),
        Commands::DecryptField {
            token,
            domain,
            salt,
        } => commands::field::handle_decrypt(
            &settings()?,
            &token,
            domain.as_deref(),
            salt.as_deref(),
        ),
        Commands::CheckKey { file } => commands::sealing::handle_check_key(&file, cli.quiet),
        Commands::Seal { key_file, no_pad } => commands::sealing::handle_seal(&key_file, no_pad),
        Commands::Completions { shell } => commands::misc::handle_completions(shell),
    }
}
