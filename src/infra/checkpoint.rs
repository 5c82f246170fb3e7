// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves substitute network weights using Burn's
// CompactRecorder (named MessagePack, half precision).
//
// Folder layout, one folder per (pipeline, class, layer):
//
//   <checkpoints root>/
//     ALR/
//       FFMedium/
//         layer0/
//           ff_network_ckpt_epoch_1_layer_0.mpk
//           ff_network_ckpt_epoch_21_layer_0.mpk
//           train_config.json
//           metrics.csv
//     ELR/
//       …
//
// Weights are saved every CHECKPOINT_EVERY epochs, counting
// from the first one (0-based epochs 0, 20, 40, …). File names
// carry the 1-based epoch.
//
// train_config.json is written before training starts so the
// network can be rebuilt for the weights later.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};

use crate::application::train_use_case::TrainConfig;
use crate::domain::sample::Pipeline;
use crate::ml::model::SubstituteNetwork;

/// Weights are saved when `epoch % CHECKPOINT_EVERY == 0` (0-based).
pub const CHECKPOINT_EVERY: usize = 20;

/// `{root}/{ALR|ELR}/{class}/layer{L}`
pub fn checkpoint_folder(root: &Path, pipeline: Pipeline, class: &str, layer: usize) -> PathBuf {
    root.join(pipeline.name()).join(class).join(format!("layer{layer}"))
}

/// Whether the 0-based `epoch` gets a checkpoint.
pub fn is_checkpoint_epoch(epoch: usize) -> bool {
    epoch % CHECKPOINT_EVERY == 0
}

/// Saves network weights and the run configuration into one folder.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Create the manager, creating the folder (and parents) if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint folder '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Weights file path without extension; the recorder adds `.mpk`.
    pub fn model_path(&self, epoch: usize, layer: usize) -> PathBuf {
        self.dir.join(format!("ff_network_ckpt_epoch_{epoch}_layer_{layer}"))
    }

    /// Save weights under the 1-based `epoch` and the trained `layer`.
    /// Returns the path of the written file.
    pub fn save_model<B: Backend>(
        &self,
        model: &SubstituteNetwork<B>,
        epoch: usize,
        layer: usize,
    ) -> Result<PathBuf> {
        let path = self.model_path(epoch, layer);

        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        tracing::debug!("Saved checkpoint: epoch {}, layer {}", epoch, layer);
        Ok(path.with_extension("mpk"))
    }

    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join("train_config.json");
        let json = serde_json::to_string_pretty(cfg)?;

        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;

        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::SubstituteConfig;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_checkpoint_schedule() {
        assert!(is_checkpoint_epoch(0));
        assert!(!is_checkpoint_epoch(1));
        assert!(!is_checkpoint_epoch(19));
        assert!(is_checkpoint_epoch(20));
    }

    #[test]
    fn test_folder_layout() {
        let p = checkpoint_folder(Path::new("/ck"), Pipeline::Elr, "FFShallow", 3);
        assert_eq!(p, PathBuf::from("/ck/ELR/FFShallow/layer3"));
    }

    #[test]
    fn test_saved_weights_use_mpk_extension_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path().join("ALR/FFLinear/layer0")).unwrap();
        let device = Default::default();

        let cfg = SubstituteConfig::new(4, 2, vec![3]);
        let model: SubstituteNetwork<TestBackend> = cfg.init(&device);
        let path = ckpt.save_model(&model, 1, 0).unwrap();

        assert_eq!(path, ckpt.dir().join("ff_network_ckpt_epoch_1_layer_0.mpk"));
        assert!(path.exists());
        assert!(!ckpt.model_path(1, 0).with_extension("mpk.gz").exists());

        let record = CompactRecorder::new().load(ckpt.model_path(1, 0), &device).unwrap();
        let loaded: SubstituteNetwork<TestBackend> = cfg.init(&device).load_record(record);

        let x = Tensor::<TestBackend, 2>::ones([1, 4], &device);
        let a = model.forward(x.clone()).to_data().to_vec::<f32>().unwrap();
        let b = loaded.forward(x).to_data().to_vec::<f32>().unwrap();
        // CompactRecorder stores half precision
        assert!(a.iter().zip(&b).all(|(x, y)| (x - y).abs() < 1e-2), "{a:?} vs {b:?}");
    }

    #[test]
    fn test_config_is_saved_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        let cfg = TrainConfig { substitute_class: "FFWide".into(), layer: 4, ..TrainConfig::default() };

        ckpt.save_config(&cfg).unwrap();
        let json = fs::read_to_string(dir.path().join("train_config.json")).unwrap();
        assert_eq!(serde_json::from_str::<TrainConfig>(&json).unwrap(), cfg);
    }
}
