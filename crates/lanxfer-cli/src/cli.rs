use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use lanxfer_core::HashAlgorithm;

#[derive(Debug, Parser)]
#[command(name = "lanxfer", version, about = "Send files and directories directly to another host on the LAN")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log only; do not draw a progress bar
    #[arg(long, global = true)]
    pub no_progress: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send one or more files or directories, one session each
    Send(SendArgs),
    /// Listen for incoming transfers until Ctrl+C
    Receive(ReceiveArgs),
    /// Print the digest of a local file
    Hash(HashArgs),
}

#[derive(Debug, Args)]
pub struct SendArgs {
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Receiver IP address
    #[arg(long)]
    pub to: IpAddr,

    /// Receiver port (defaults to LANXFER_PORT or 8888)
    #[arg(long, short)]
    pub port: Option<u16>,

    /// Local address to send from
    #[arg(long)]
    pub bind: Option<IpAddr>,
}

#[derive(Debug, Args)]
pub struct ReceiveArgs {
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    #[arg(long, short)]
    pub port: Option<u16>,

    /// Where received files are written (defaults to LANXFER_RECEIVED_DIR)
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct HashArgs {
    pub file: PathBuf,

    /// md5, sha1, sha256 or sha512
    #[arg(long, short)]
    pub algorithm: Option<HashAlgorithm>,
}
