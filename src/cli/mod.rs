use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "anyvm-runner")]
#[command(author, version, about = "Run CI job phases inside an ephemeral VM", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision the VM, run the prepare/run phases, copy results back
    Run {
        /// Directory holding conf/, the launcher script, and hooks/
        /// (default: the directory of this executable)
        #[arg(long, env = "ANYVM_ACTION_DIR")]
        action_dir: Option<PathBuf>,
    },
}
