// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records training metrics to a CSV file after each epoch.
//
// Metrics recorded per epoch:
//   - epoch:            1-based epoch number
//   - loss_per_element: Σ(batch loss × valid elements) / Σ valid elements
//   - mape:             mean absolute percentage error over
//                       the valid target elements
//   - seconds:          wall time of the epoch
//
// Output file: <checkpoint folder>/metrics.csv
//
// Example CSV output:
//   epoch,loss_per_element,mape,seconds
//   1,0.412300,1.873000,12.410
//   2,0.198700,1.102300,11.980
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::Result;
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch:            usize,
    pub loss_per_element: f64,
    pub mape:             f64,
    pub seconds:          f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, loss_per_element: f64, mape: f64, seconds: f64) -> Self {
        Self { epoch, loss_per_element, mape, seconds }
    }
}

/// Running totals of one epoch, turned into an EpochMetrics at the end.
#[derive(Debug, Clone, Default)]
pub struct EpochAccumulator {
    weighted_loss: f64,
    valid:         f64,
    mape_sum:      f64,
    batches:       usize,
}

impl EpochAccumulator {
    /// Add one batch: its loss, its valid element count and its MAPE.
    pub fn add(&mut self, loss: f64, valid: f64, mape: f64) {
        self.weighted_loss += loss * valid;
        self.valid         += valid;
        self.mape_sum      += mape;
        self.batches       += 1;
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn finish(&self, epoch: usize, seconds: f64) -> EpochMetrics {
        let loss_per_element = if self.valid > 0.0 {
            self.weighted_loss / self.valid
        } else {
            f64::NAN
        };
        let mape = if self.batches > 0 {
            self.mape_sum / self.batches as f64
        } else {
            f64::NAN
        };
        EpochMetrics::new(epoch, loss_per_element, mape, seconds)
    }
}

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet, so
    /// repeated runs append to the same log.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "epoch,loss_per_element,mape,seconds")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row in the CSV.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)?;

        writeln!(
            f,
            "{},{:.6},{:.6},{:.3}",
            m.epoch,
            m.loss_per_element,
            m.mape,
            m.seconds,
        )?;

        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
