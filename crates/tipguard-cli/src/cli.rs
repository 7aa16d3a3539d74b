use clap::{Parser, Subcommand};
use clap_complete::Shell;

use tipguard_core::VERSION;

use crate::constants::DEFAULT_ADMIN_SECRET_LEN;

/// Tipguard - key management and encryption checks for a tip line
#[derive(Parser)]
#[command(name = "tipguard")]
#[command(author, version = VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to config.toml (or set TIPGUARD_CONFIG)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print a fresh base64 32-byte key (master or session key)
    GenKey,

    /// Print a generated admin secret
    AdminSecret {
        /// Secret length in characters
        #[arg(long, default_value_t = DEFAULT_ADMIN_SECRET_LEN)]
        length: usize,
    },

    /// Create the device salt and check the admin secret derives keys
    VaultInit,

    /// Store an infrastructure secret read from stdin
    VaultPut {
        /// Entry name
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Print a stored infrastructure secret
    VaultGet {
        /// Entry name
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// List files in the vault directory
    VaultList,

    /// Print a fresh field salt
    GenSalt,

    /// Encrypt a value with the field codec
    EncryptField {
        /// Value to encrypt (reads stdin if omitted)
        #[arg(value_name = "VALUE")]
        value: Option<String>,

        /// Key-derivation domain
        #[arg(long, requires = "salt")]
        domain: Option<String>,

        /// Base64 field salt
        #[arg(long, requires = "domain", allow_hyphen_values = true)]
        salt: Option<String>,
    },

    /// Decrypt a field token
    DecryptField {
        /// Token to decrypt
        #[arg(value_name = "TOKEN")]
        token: String,

        /// Key-derivation domain
        #[arg(long, requires = "salt")]
        domain: Option<String>,

        /// Base64 field salt
        #[arg(long, requires = "domain", allow_hyphen_values = true)]
        salt: Option<String>,
    },

    /// Report whether a recipient key is valid and usable
    CheckKey {
        /// File holding the recipient key (armored OpenPGP certificate or age1...)
        #[arg(value_name = "FILE")]
        file: String,
    },

    /// Seal stdin for a recipient key
    Seal {
        /// File holding the recipient key (armored OpenPGP certificate or age1...)
        #[arg(value_name = "KEY_FILE")]
        key_file: String,

        /// Skip length-hiding padding
        #[arg(long)]
        no_pad: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
