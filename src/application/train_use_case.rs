// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates a substitute training run in order:
//
//   Step 1: Validate the configuration  (before any I/O)
//   Step 2: Resolve the dump files      (Layer 4 - data)
//   Step 3: Load or build the cache     (Layer 4 - data)
//   Step 4: Reduce to the dev subset    (Layer 4 - data, ELR --dev only)
//   Step 5: Save config                 (Layer 6 - infra)
//   Step 6: Run training loop           (Layer 5 - ml)
//
// `prepare` runs steps 2–3 only and reports what it loaded; it
// needs no substitute class.
//
// Reference: Burn Book §5 (Training)

use anyhow::{bail, Context, Result};
use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::data::{
    dataset::{CrossAttentionDataset, SelfAttentionDataset},
    extractor::LengthFilter,
    paths::DumpPaths,
    splitter::dev_subset_indices,
};
use crate::domain::{
    error::DataError,
    sample::{FilterMode, LanguageDirection, Pipeline, Split, Topology},
};
use crate::infra::{
    checkpoint::{checkpoint_folder, CheckpointManager},
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::{
    registry::hidden_widths,
    trainer::{run_training, TrainingData},
};

// ─── Training Configuration ──────────────────────────────────────────────────
// Everything a run needs. Saved as train_config.json next to the
// checkpoints so the network can be rebuilt for the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub pipeline:          Pipeline,
    pub topology:          Topology,
    pub dataset_path:      PathBuf,
    pub direction:         LanguageDirection,
    pub layer:             usize,
    pub split:             Split,
    pub mode:              FilterMode,
    /// Length bound n of the extractor.
    pub max_length:        usize,
    /// Width every batch is padded to.
    pub global_max_length: usize,
    pub batch_size:        usize,
    pub epochs:            usize,
    pub lr:                f64,
    pub num_workers:       usize,
    pub substitute_class:  String,
    pub multi_device:      bool,
    pub checkpoints_root:  PathBuf,
    /// Train on a seeded 20% subset (ELR only).
    pub dev:               bool,
    pub dev_seed:          u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            pipeline:          Pipeline::Alr,
            topology:          Topology::Encoder,
            dataset_path:      PathBuf::from("mha_outputs"),
            direction:         LanguageDirection::DeEn,
            layer:             0,
            split:             Split::Train,
            mode:              FilterMode::Max,
            max_length:        100,
            global_max_length: 100,
            batch_size:        2000,
            epochs:            21,
            lr:                1e-4,
            num_workers:       0,
            substitute_class:  String::new(),
            multi_device:      false,
            checkpoints_root:  PathBuf::from("checkpoints"),
            dev:               false,
            dev_seed:          42,
        }
    }
}

impl TrainConfig {
    /// Checks that only concern which samples get loaded.
    pub fn validate_data(&self) -> Result<(), DataError> {
        let invalid = |msg: String| Err(DataError::InvalidConfig(msg));

        if self.pipeline == Pipeline::Elr && self.topology != Topology::Encoder {
            return invalid(format!("ELR only supports the encoder topology, got '{}'", self.topology));
        }
        if self.max_length == 0 || self.global_max_length == 0 {
            return invalid("lengths must be positive".into());
        }
        if self.max_length > self.global_max_length {
            return invalid(format!(
                "max length {} exceeds the global max length {}",
                self.max_length, self.global_max_length
            ));
        }
        Ok(())
    }

    /// Reject anything that would fail later, before touching the disk.
    pub fn validate(&self) -> Result<(), DataError> {
        self.validate_data()?;
        let invalid = |msg: String| Err(DataError::InvalidConfig(msg));

        if self.dev && self.pipeline != Pipeline::Elr {
            return invalid("--dev is only available for ELR".into());
        }
        if self.batch_size == 0 {
            return invalid("batch size must be positive".into());
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return invalid(format!("learning rate must be positive, got {}", self.lr));
        }
        hidden_widths(&self.substitute_class)?;
        Ok(())
    }

    pub fn filter(&self) -> LengthFilter {
        LengthFilter::new(self.max_length, self.mode)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        checkpoint_folder(&self.checkpoints_root, self.pipeline, &self.substitute_class, self.layer)
    }
}

/// Sample count and effective length summary of a loaded dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSummary {
    pub samples: usize,
    pub min_len: usize,
    pub max_len: usize,
    pub mean_len: f64,
}

impl DatasetSummary {
    pub fn from_lengths(lengths: &[usize]) -> Self {
        let samples = lengths.len();
        let mean_len = if samples > 0 {
            lengths.iter().sum::<usize>() as f64 / samples as f64
        } else {
            0.0
        };
        Self {
            samples,
            min_len: lengths.iter().copied().min().unwrap_or(0),
            max_len: lengths.iter().copied().max().unwrap_or(0),
            mean_len,
        }
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Steps 2–3: resolve and load (building the cache if needed).
    pub fn load(&self) -> Result<TrainingData> {
        let cfg = &self.config;
        cfg.validate_data()?;
        if cfg.split == Split::Val {
            tracing::warn!("{}", "#".repeat(60));
            tracing::warn!("Validation split used in training, only OK for debugging");
            tracing::warn!("{}", "#".repeat(60));
        }

        // ── Step 2: Resolve dump files ────────────────────────────────────────
        let paths = DumpPaths::resolve(
            &cfg.dataset_path, cfg.pipeline, cfg.topology, cfg.direction, cfg.layer, cfg.split,
        );
        let layout = cfg.pipeline.output_layout();

        // ── Step 3: Load or build the sample cache ────────────────────────────
        let data = match paths {
            DumpPaths::SelfAttention(p) => TrainingData::SelfAttention(
                SelfAttentionDataset::load(&p, cfg.topology, layout, cfg.filter())
                    .with_context(|| format!("Cannot load dump '{}'", p.input.display()))?,
            ),
            DumpPaths::CrossAttention(p) => TrainingData::CrossAttention(
                CrossAttentionDataset::load(&p, layout, cfg.filter())
                    .with_context(|| format!("Cannot load dump '{}'", p.input_enc.display()))?,
            ),
        };
        Ok(data)
    }

    /// Load the data and report its size and length distribution.
    pub fn prepare(&self) -> Result<DatasetSummary> {
        let data = self.load()?;
        let summary = DatasetSummary::from_lengths(&data.lengths());
        tracing::info!(
            "{} samples, length min={} max={} mean={:.1}",
            summary.samples, summary.min_len, summary.max_len, summary.mean_len,
        );
        Ok(summary)
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<Vec<EpochMetrics>> {
        let cfg = &self.config;

        // ── Step 1: Validate ──────────────────────────────────────────────────
        cfg.validate()?;
        let data = self.load()?;

        // ── Step 4: Dev subset ────────────────────────────────────────────────
        let data = match data {
            TrainingData::SelfAttention(ds) if cfg.dev => {
                let keep = dev_subset_indices(ds.len(), cfg.dev_seed);
                tracing::info!("Dev run: training on {} of {} samples", keep.len(), ds.len());
                TrainingData::SelfAttention(ds.subset(&keep))
            }
            other => other,
        };

        if data.is_empty() {
            bail!("no samples left after filtering with max length {} ({})", cfg.max_length, cfg.mode);
        }
        let longest = data.longest();
        if longest > cfg.global_max_length {
            bail!(
                "samples of length {} do not fit the global max length {}",
                longest, cfg.global_max_length
            );
        }
        if cfg.multi_device {
            tracing::warn!("--multi-device is not supported; training on a single device");
        }

        // ── Step 5: Save config next to the checkpoints ───────────────────────
        let ckpt_manager = CheckpointManager::new(cfg.checkpoint_dir())?;
        ckpt_manager.save_config(cfg)?;
        let metrics = MetricsLogger::new(ckpt_manager.dir())?;

        // ── Step 6: Run training loop (Layer 5) ───────────────────────────────
        run_training(cfg, data, &ckpt_manager, &metrics)
    }
}
