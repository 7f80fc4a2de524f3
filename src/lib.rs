#![doc = include_str!("../README.md")]

pub mod cli;
pub mod command;
pub mod error;
pub mod fs;
pub mod manager;
pub mod plan;
pub mod txn;
pub mod walk;

pub use error::*;
pub use fs::{Encoding, Operation, OperationKind, Relocation, TempStore};
pub use manager::{FileManager, ManagerConfig};
pub use txn::{Participant, Transaction, TransactionContext, TransactionId, Vote};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn run() -> Result<()> {
    use clap::Parser;
    use command::TxfsCommand;

    let cli = cli::TxfsCli::parse();
    init_logging(cli.verbose);

    match cli.command {
        TxfsCommand::Apply(args) => command::apply::execute(args),
    }
}

fn init_logging(verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    let _ = builder.format_timestamp(None).try_init();
}
