use crate::error::Result;
use crate::fs::{Operation, Relocation};
use crate::manager::{FileManager, ManagerConfig};
use crate::plan::Plan;
use crate::plan::preflight::preflight_checks;
use crate::txn::Transaction;
use clap::Parser;
use colored::Colorize;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug, Clone)]
#[clap(verbatim_doc_comment)]
pub struct ApplyArgs {
    /// Path to the TOML plan file
    ///
    /// Each `[[step]]` table names an `op` and its paths, relative to the
    /// directory containing the plan:
    ///
    ///   [[step]]
    ///   op = "write"
    ///   path = "out/a.txt"
    ///   contents = "hello"
    #[arg(value_name = "PLAN", verbatim_doc_comment)]
    pub plan: PathBuf,

    /// Show the steps without applying them
    #[arg(long, short = 'n')]
    pub dry_run: bool,

    /// Apply every step, then roll everything back
    #[arg(long, conflicts_with = "dry_run")]
    pub abort: bool,

    /// Directory for backups and temp files (defaults to <system temp>/txfs)
    #[arg(long, value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Always copy directories into backup storage instead of renaming them
    #[arg(long)]
    pub copy_fallback: bool,
}

impl ApplyArgs {
    pub fn config(&self) -> ManagerConfig {
        let relocation = if self.copy_fallback {
            Relocation::CopyThenDelete
        } else {
            Relocation::Auto
        };

        ManagerConfig {
            temp_root: self.temp_dir.clone(),
            relocation,
        }
    }
}

pub fn execute(args: ApplyArgs) -> Result<()> {
    let plan = Plan::load(&args.plan)?;
    preflight_checks(&plan)?;

    let base = plan.base().to_path_buf();
    log::debug!("Plan base directory: {}", base.display());

    if args.dry_run {
        println!("\n{}", "Planned steps:".bold());
        for step in plan.steps() {
            println!(
                "   {} {}",
                format!("{:>2}.", step.number).dimmed(),
                describe(&step.operation, &base).yellow()
            );
        }
        println!("\n{}", "Dry run: no changes were made".yellow());
        return Ok(());
    }

    let files = FileManager::with_config(args.config());
    let tx = Transaction::begin();
    let mut applied = Vec::with_capacity(plan.len());

    for step in plan.into_steps() {
        let line = describe(&step.operation, &base);
        if let Err(e) = files.submit(Some(&tx), step.operation) {
            eprintln!(
                "{} step {} ({}): {}",
                "Error:".red().bold(),
                step.number,
                line,
                e
            );

            if !applied.is_empty() {
                eprintln!("{}", "Rolling back applied steps...".yellow().bold());
            }
            match tx.rollback() {
                Ok(()) => eprintln!("{}", "✓ Rollback successful.".green()),
                Err(rollback_err) => {
                    eprintln!("{} {}", "✗ Rollback failed:".red().bold(), rollback_err);
                }
            }
            return Err(e);
        }
        applied.push(line);
    }

    if args.abort {
        tx.rollback()?;
        print_summary(&applied, false);
        println!(
            "{}",
            "✓ Rehearsal complete, every step was rolled back".green().bold()
        );
        return Ok(());
    }

    tx.complete()?;
    print_summary(&applied, true);
    println!(
        "{} {}",
        "✓ Applied".green().bold(),
        format!("{} step(s)", applied.len()).green().bold()
    );

    Ok(())
}

fn print_summary(applied: &[String], kept: bool) {
    println!();
    for line in applied {
        if kept {
            println!("   ✓ {}", line);
        } else {
            println!("   ↺ {}", line.dimmed());
        }
    }
    println!();
}

/// One-line description with paths relative to the plan directory.
fn describe(operation: &Operation, base: &Path) -> String {
    let display_path = |path: &Path| -> String {
        let relative = pathdiff::diff_paths(path, base).unwrap_or_else(|| path.to_path_buf());
        relative.to_string_lossy().replace('\\', "/")
    };

    match operation {
        Operation::Copy {
            source,
            destination,
            ..
        }
        | Operation::Move {
            source,
            destination,
            ..
        } => format!(
            "{} {} → {}",
            operation.kind(),
            display_path(source),
            display_path(destination)
        ),
        Operation::Replace {
            source,
            destination,
            destination_backup,
        } => {
            let mut line = format!(
                "{} {} → {}",
                operation.kind(),
                display_path(source),
                display_path(destination)
            );
            if let Some(backup) = destination_backup {
                line.push_str(&format!(" (backup {})", display_path(backup)));
            }
            line
        }
        _ => format!("{} {}", operation.kind(), display_path(operation.target())),
    }
}
