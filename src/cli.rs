use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[clap(about = "Run the rehydration pipeline over the source remote", display_order = 1)]
    Run(RunArgs),
    #[clap(about = "List task states from the registry", name = "ls", display_order = 2)]
    List {
        #[clap(long, help = "Task database path")]
        db: PathBuf,
    },
    #[clap(about = "Clear a task back to pending for re-processing", display_order = 3)]
    Reset {
        #[clap(long, help = "Task database path")]
        db: PathBuf,
        #[clap(help = "Base name of the task to reset")]
        base: Option<String>,
        #[clap(long, help = "Reset every failed task (status 2/3/4)")]
        failed: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[clap(long, help = "Source remote, e.g. gd:games", display_order = 1)]
    pub source: String,
    #[clap(long, help = "Destination remote, e.g. od:repacked", display_order = 2)]
    pub dest: String,
    #[clap(long, help = "Local scratch directory", display_order = 3)]
    pub scratch: PathBuf,
    #[clap(long, default_value = "7z", help = "Archive tool binary")]
    pub packer_bin: PathBuf,
    #[clap(long, default_value = "rclone", help = "Remote client binary")]
    pub rclone_bin: PathBuf,
    #[clap(long, help = "Task database path (default <scratch>/tasks.db)")]
    pub db: Option<PathBuf>,
    #[clap(short = 'p', long = "password", help = "Candidate decompress password (repeatable)")]
    pub passwords: Vec<String>,
    #[clap(long, help = "Password for the repacked archive")]
    pub repack_password: Option<String>,
    #[clap(long, default_value_t = 0, help = "Compression level 0-9")]
    pub level: u8,
    #[clap(long, default_value = "4G", help = "Split volume size, empty disables splitting")]
    pub volume: String,
    #[clap(long, default_value_t = 4, help = "Workers per stage")]
    pub workers: usize,
    #[clap(long, help = "Dedicated download worker bound (default = --workers)")]
    pub download_workers: Option<usize>,
    #[clap(long, default_value_t = 5, help = "Termination poll interval in seconds")]
    pub heartbeat: u64,
    #[clap(long, default_value_t = 0, help = "Scratch budget in bytes, 0 probes free space")]
    pub budget: u64,
    #[clap(long, default_value_t = 0, help = "Group by directory component at this depth")]
    pub depth: usize,
    #[clap(long, help = "Status endpoint address, e.g. 127.0.0.1:7575")]
    pub status_addr: Option<String>,
    #[clap(long, default_value = "info", help = "Log level for the debug log file")]
    pub log_level: String,
}
