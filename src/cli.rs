use crate::command::TxfsCommand;
use clap::Parser;

#[derive(Parser)]
#[command(name = "txfs", version, about = "Apply file system changes all-or-nothing")]
pub struct TxfsCli {
    /// Print debug logging (overrides RUST_LOG)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: TxfsCommand,
}
