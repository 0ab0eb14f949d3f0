use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "satchel — share secrets in authenticated containers", long_about = None)]
pub struct Cli {
    /// Override the configuration home (defaults to the platform config dir)
    #[arg(long, global = true)]
    pub config_home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum InputSourceArg {
    Console,
    File,
    Dirs,
    Piped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputTargetArg {
    Console,
    File,
    Path,
    Piped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BundleTypeArg {
    Combined,
    Split,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum EncodingArg {
    Text,
    Raw,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the config home, default profile and fresh identities
    Init,

    /// Wrap a payload under a password into a .bsym container
    Encrypt {
        #[arg(long = "input-source", value_enum, default_value = "file")]
        input_source: InputSourceArg,
        /// Input file (input-source=file)
        #[arg(long = "input-file")]
        input_file: Option<PathBuf>,
        /// Input directories (input-source=dirs)
        #[arg(long = "dir")]
        dirs: Vec<PathBuf>,
        #[arg(long = "output-target", value_enum, default_value = "file")]
        output_target: OutputTargetArg,
        #[arg(long = "output-file")]
        output_file: Option<PathBuf>,
        /// Container password; prompted when omitted
        #[arg(long)]
        key: Option<String>,
    },

    /// Decrypt a .bsym container
    Decrypt {
        #[arg(long = "input-source", value_enum, default_value = "file")]
        input_source: InputSourceArg,
        #[arg(long = "input-file")]
        input_file: Option<PathBuf>,
        #[arg(long = "output-target", value_enum, default_value = "file")]
        output_target: OutputTargetArg,
        /// Output file or directory
        #[arg(long = "output-file")]
        output_file: Option<PathBuf>,
        #[arg(long)]
        key: Option<String>,
    },

    /// Wrap a payload to a named receiver under asymmetric keys
    Bundle {
        /// Receiver name in the keystore
        #[arg(long)]
        to: Option<String>,
        /// Sender keypair name (defaults to the profile's default)
        #[arg(long)]
        from: Option<String>,
        /// Use the internal local read/write identities (encrypt to self)
        #[arg(long = "local-keys")]
        local_keys: bool,
        #[arg(long = "bundle-type", value_enum, default_value = "combined")]
        bundle_type: BundleTypeArg,
        #[arg(long = "input-source", value_enum, default_value = "file")]
        input_source: InputSourceArg,
        #[arg(long = "input-file")]
        input_file: Option<PathBuf>,
        #[arg(long = "dir")]
        dirs: Vec<PathBuf>,
        #[arg(long = "output-target", value_enum, default_value = "file")]
        output_target: OutputTargetArg,
        #[arg(long = "output-file")]
        output_file: Option<PathBuf>,
    },

    /// Open a bundle, or show its header with --details-only
    Open {
        /// Sender name to verify against (defaults to the header's)
        #[arg(long)]
        from: Option<String>,
        #[arg(long = "local-keys")]
        local_keys: bool,
        #[arg(long = "bundle-type", value_enum, default_value = "combined")]
        bundle_type: BundleTypeArg,
        #[arg(long = "input-file")]
        input_file: Option<PathBuf>,
        /// Header artifact for split bundles (defaults to input with .bhdr)
        #[arg(long = "header-file")]
        header_file: Option<PathBuf>,
        #[arg(long = "output-target", value_enum, default_value = "file")]
        output_target: OutputTargetArg,
        #[arg(long = "output-file")]
        output_file: Option<PathBuf>,
        /// Print header details without decrypting
        #[arg(long = "details-only")]
        details_only: bool,
        /// With --details-only, include every header field
        #[arg(long = "show-all")]
        show_all: bool,
    },

    /// Encrypt profile directories into a .bsym with a profile listing
    Backup {
        #[arg(long = "output-file")]
        output_file: PathBuf,
        #[arg(long)]
        key: Option<String>,
        /// Profiles to include (default: all)
        profiles: Vec<String>,
    },

    /// Restore profiles from a backup container
    Restore {
        #[arg(long = "input-file")]
        input_file: PathBuf,
        #[arg(long)]
        key: Option<String>,
        /// Profiles to restore (default: all in the backup)
        profiles: Vec<String>,
        /// Overwrite existing files without prompting
        #[arg(long)]
        force: bool,
    },

    /// Export a keystore user's public identity
    ExportUser {
        name: String,
        #[arg(long = "output-target", value_enum, default_value = "console")]
        output_target: OutputTargetArg,
        #[arg(long = "output-file")]
        output_file: Option<PathBuf>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long = "output-encoding", value_enum, default_value = "text")]
        output_encoding: EncodingArg,
    },

    /// Export a keypair (seeds included; password required)
    ExportKeypair {
        name: String,
        #[arg(long = "output-target", value_enum, default_value = "console")]
        output_target: OutputTargetArg,
        #[arg(long = "output-file")]
        output_file: Option<PathBuf>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long = "output-encoding", value_enum, default_value = "text")]
        output_encoding: EncodingArg,
    },

    /// Import a public identity into the keystore
    ImportUser {
        #[arg(long = "input-file")]
        input_file: PathBuf,
        #[arg(long)]
        password: Option<String>,
        /// Replace an existing entry with the same name
        #[arg(long)]
        force: bool,
    },

    /// Import a keypair into the keypair store
    ImportKeypair {
        #[arg(long = "input-file")]
        input_file: PathBuf,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        force: bool,
    },

    /// List keystore users
    ListUsers {
        /// Glob filter on names
        #[arg(long)]
        filter: Option<String>,
    },

    /// Remove a keystore user
    RemoveUser {
        name: String,
        #[arg(long)]
        force: bool,
    },

    /// Rename a keystore user
    RenameUser { old: String, new: String },

    /// Show the current profile
    ShowProfile,
}
