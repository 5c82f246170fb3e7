// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::Commands;

use crate::application::train_use_case::{TrainConfig, TrainUseCase};

#[derive(Parser, Debug)]
#[command(
    name = "attention-substitute",
    version = "0.1.0",
    about = "Train feed-forward substitutes for transformer attention from recorded activations."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Route the subcommand to its use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Alr(args)     => Self::run_train(args.into()),
            Commands::Elr(args)     => Self::run_train(args.into()),
            Commands::Prepare(args) => Self::run_prepare(args.into()),
        }
    }

    fn run_train(cfg: TrainConfig) -> Result<()> {
        tracing::info!(
            "Training {} substitute '{}' for {} layer {} ({})",
            cfg.pipeline, cfg.substitute_class, cfg.topology, cfg.layer, cfg.direction,
        );
        let history = TrainUseCase::new(cfg).execute()?;

        if let Some(last) = history.last() {
            println!(
                "Training complete. Final loss per element: {:.6}, MAPE: {:.4}",
                last.loss_per_element, last.mape,
            );
        }
        Ok(())
    }

    fn run_prepare(cfg: TrainConfig) -> Result<()> {
        let summary = TrainUseCase::new(cfg).prepare()?;
        println!(
            "{} samples, effective length min {} / max {} / mean {:.2}",
            summary.samples, summary.min_len, summary.max_len, summary.mean_len,
        );
        Ok(())
    }
}
