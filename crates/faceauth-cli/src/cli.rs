use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "faceauth",
    about = "Enroll and authenticate identities by face",
    version
)]
pub struct Cli {
    /// Emit structured JSON to stdout instead of human-readable logs
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase verbosity (may be used multiple times)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Read configuration from this file instead of the default locations
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Register an identity with a reference face image
    Enroll(EnrollArgs),
    /// Verify a face image against an enrolled identity
    Authenticate(AuthenticateArgs),
    /// Export a stored reference photo
    Photo(PhotoArgs),
    /// Check configuration, models and store directories
    Doctor,
}

#[derive(Debug, Clone, Args)]
pub struct EnrollArgs {
    /// Identity key (for example an email address)
    #[arg(long)]
    pub identity: String,

    /// Display name stored with the identity
    #[arg(long)]
    pub name: String,

    /// Optional contact detail stored with the identity
    #[arg(long)]
    pub contact: Option<String>,

    /// Image file holding encoded bytes or a data URI
    #[arg(long)]
    pub image: PathBuf,

    #[command(flatten)]
    pub stores: StoreArgs,
}

#[derive(Debug, Clone, Args)]
pub struct AuthenticateArgs {
    /// Identity to verify
    #[arg(long)]
    pub identity: String,

    /// Image file holding encoded bytes or a data URI
    #[arg(long)]
    pub image: PathBuf,

    #[command(flatten)]
    pub stores: StoreArgs,
}

#[derive(Debug, Clone, Args)]
pub struct PhotoArgs {
    /// Handle reported at enrollment (e.g. 3f2a...png)
    #[arg(long)]
    pub handle: String,

    /// Destination file for the photo
    #[arg(long)]
    pub output: PathBuf,

    /// Override the photo store directory
    #[arg(long)]
    pub photo_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct StoreArgs {
    /// Override the record store directory
    #[arg(long)]
    pub record_dir: Option<PathBuf>,

    /// Override the photo store directory
    #[arg(long)]
    pub photo_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl From<bool> for OutputMode {
    fn from(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from(self.json)
    }
}
