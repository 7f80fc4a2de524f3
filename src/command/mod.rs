pub mod apply;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum TxfsCommand {
    /// Run every step of a plan file inside one transaction.
    Apply(apply::ApplyArgs),
}
