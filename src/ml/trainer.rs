// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Fits a substitute network to one attention dump using Burn's
// DataLoader and Adam. The loop is the same for every
// topology; only the batcher differs:
//
//   encoder  → EncoderBatcher → FlatBatch
//   decoder  → DecoderBatcher → CausalBatch
//   cross    → CrossBatcher   → CrossBatch
//
// Per batch:
//   loss = MSE(pred, target) / (valid mask entries / mask cells)
//
// Per epoch (logged and appended to metrics.csv):
//   loss per element = Σ(loss × valid) / Σ valid
//   MAPE over valid target elements, averaged over batches
//   wall time
//
// Weights are saved on 0-based epochs 0, 20, 40, …
//
// Training uses TrainBackend (Autodiff<Wgpu>); the loop itself
// is generic over any AutodiffBackend so it runs on NdArray in
// tests.
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use std::{fmt::Debug, time::Instant};

use anyhow::{bail, Result};
use burn::{
    data::{dataloader::{batcher::Batcher, DataLoaderBuilder}, dataset::Dataset},
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::TrainConfig;
use crate::data::{
    batcher::{CollateConfig, CrossBatcher, DecoderBatcher, EncoderBatcher, TrainingBatch},
    dataset::{CrossAttentionDataset, SelfAttentionDataset},
};
use crate::domain::sample::Topology;
use crate::infra::{
    checkpoint::{is_checkpoint_epoch, CheckpointManager},
    metrics::{EpochAccumulator, EpochMetrics, MetricsLogger},
};
use crate::ml::{
    model::{masked_mape, SubstituteConfig, SubstituteNetwork},
    registry::substitute_config,
};

pub type TrainBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

/// The loaded dataset of a run, by attention kind.
pub enum TrainingData {
    SelfAttention(SelfAttentionDataset),
    CrossAttention(CrossAttentionDataset),
}

impl TrainingData {
    pub fn len(&self) -> usize {
        match self {
            TrainingData::SelfAttention(ds)  => ds.len(),
            TrainingData::CrossAttention(ds) => ds.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Input features per token (both sides for cross-attention).
    pub fn input_width(&self) -> usize {
        match self {
            TrainingData::SelfAttention(ds)  => ds.input_width(),
            TrainingData::CrossAttention(ds) => ds.input_width(),
        }
    }

    /// Output features per token, after head flattening.
    pub fn output_width(&self) -> usize {
        match self {
            TrainingData::SelfAttention(ds)  => ds.output_width(),
            TrainingData::CrossAttention(ds) => ds.output_width(),
        }
    }

    /// Sequence length of every sample (target side for cross-attention).
    pub fn lengths(&self) -> Vec<usize> {
        match self {
            TrainingData::SelfAttention(ds)  => ds.lengths(),
            TrainingData::CrossAttention(ds) => ds.lengths(),
        }
    }

    /// Longest sequence on any side; has to fit the global max length.
    pub fn longest(&self) -> usize {
        let longest = |lengths: Vec<usize>| lengths.into_iter().max().unwrap_or(0);
        match self {
            TrainingData::SelfAttention(ds)  => longest(ds.lengths()),
            TrainingData::CrossAttention(ds) => longest(ds.lengths()).max(longest(ds.source_lengths())),
        }
    }
}

/// Train on the default WGPU device.
pub fn run_training(
    cfg:          &TrainConfig,
    data:         TrainingData,
    ckpt_manager: &CheckpointManager,
    metrics:      &MetricsLogger,
) -> Result<Vec<EpochMetrics>> {
    let device = burn::backend::wgpu::WgpuDevice::default();
    tracing::info!("Using WGPU device: {:?}", device);
    fit::<TrainBackend>(cfg, data, device, ckpt_manager, metrics)
}

/// Build the network for `data` and train it on `device`.
pub fn fit<B: AutodiffBackend>(
    cfg:          &TrainConfig,
    data:         TrainingData,
    device:       B::Device,
    ckpt_manager: &CheckpointManager,
    metrics:      &MetricsLogger,
) -> Result<Vec<EpochMetrics>> {
    let g = cfg.global_max_length;
    let model_cfg = substitute_config(
        &cfg.substitute_class,
        g * data.input_width(),
        g * data.output_width(),
    )?;
    let collate = CollateConfig::new(g, cfg.pipeline.output_layout());

    match data {
        TrainingData::SelfAttention(ds) => match ds.topology() {
            Topology::Encoder => {
                let batcher = EncoderBatcher::<B>::new(device.clone(), collate);
                train_loop(cfg, ds, batcher, &model_cfg, &device, ckpt_manager, metrics)
            }
            Topology::Decoder => {
                let batcher = DecoderBatcher::<B>::new(device.clone(), collate);
                train_loop(cfg, ds, batcher, &model_cfg, &device, ckpt_manager, metrics)
            }
            Topology::DecoderCross => bail!("cross-attention data loaded as self-attention"),
        },
        TrainingData::CrossAttention(ds) => {
            let batcher = CrossBatcher::<B>::new(device.clone(), collate);
            train_loop(cfg, ds, batcher, &model_cfg, &device, ckpt_manager, metrics)
        }
    }
}

fn train_loop<B, I, D, Bt, O>(
    cfg:          &TrainConfig,
    dataset:      D,
    batcher:      Bt,
    model_cfg:    &SubstituteConfig,
    device:       &B::Device,
    ckpt_manager: &CheckpointManager,
    metrics:      &MetricsLogger,
) -> Result<Vec<EpochMetrics>>
where
    B:  AutodiffBackend,
    I:  Send + Sync + Clone + Debug + 'static,
    D:  Dataset<I> + 'static,
    Bt: Batcher<I, O> + Clone + 'static,
    O:  TrainingBatch<B> + Send + Clone + Debug + 'static,
{
    // ── Build model ───────────────────────────────────────────────────────────
    let mut model: SubstituteNetwork<B> = model_cfg.init(device);
    tracing::info!(
        "Model ready: {} ({} → {:?} → {})",
        cfg.substitute_class,
        model_cfg.in_features,
        model_cfg.hidden,
        model_cfg.out_features,
    );

    // ── Adam optimiser ────────────────────────────────────────────────────────
    let mut optim = AdamConfig::new()
        .with_beta_1(0.9)
        .with_beta_2(0.98)
        .with_epsilon(1e-9)
        .init();

    // ── Data loader ───────────────────────────────────────────────────────────
    // 0 workers = batches are collated on this thread
    let builder = DataLoaderBuilder::new(batcher).batch_size(cfg.batch_size);
    let builder = if cfg.num_workers > 0 {
        builder.num_workers(cfg.num_workers)
    } else {
        builder
    };
    let loader = builder.build(dataset);

    // ── Epoch loop ────────────────────────────────────────────────────────────
    let mut history = Vec::with_capacity(cfg.epochs);
    for epoch in 0..cfg.epochs {
        let start   = Instant::now();
        let mut acc = EpochAccumulator::default();

        for batch in loader.iter() {
            let normalizer = batch.loss_normalizer();
            let valid      = batch.valid_count();

            let (loss, pred) = model.forward_loss(batch.features(), batch.targets(), normalizer);
            let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
            let mape = masked_mape(pred.detach(), batch.targets(), batch.target_mask());

            // Backward pass + Adam update
            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(cfg.lr, model, grads);

            acc.add(loss_val, valid, mape);
        }

        let m = acc.finish(epoch + 1, start.elapsed().as_secs_f64());
        tracing::info!(
            "Epoch {:>3}/{} | batches={} | loss per element={:.6} | MAPE={:.4} | time={:.1}s",
            m.epoch, cfg.epochs, acc.batches(), m.loss_per_element, m.mape, m.seconds,
        );
        metrics.log(&m)?;

        if is_checkpoint_epoch(epoch) {
            let path = ckpt_manager.save_model(&model, epoch + 1, cfg.layer)?;
            tracing::info!("Checkpoint saved to '{}'", path.display());
        }
        history.push(m);
    }

    tracing::info!("Training complete!");
    Ok(history)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::extractor::SelfAttentionFields;
    use crate::data::extractor::CrossAttentionFields;
    use crate::domain::sample::{OutputLayout, Pipeline};
    use burn::backend::{Autodiff, NdArray};
    use ndarray::{ArrayD, IxDyn};

    type TestBackend = Autodiff<NdArray<f32>>;

    fn values(shape: &[usize], f: impl Fn(usize) -> f32) -> ArrayD<f32> {
        let n: usize = shape.iter().product();
        ArrayD::from_shape_vec(IxDyn(shape), (0..n).map(f).collect()).unwrap()
    }

    fn encoder_data(lens: &[usize]) -> TrainingData {
        let mut fields = SelfAttentionFields { masks: Some(Vec::new()), ..Default::default() };
        for &l in lens {
            fields.inputs.push(values(&[l, 2], |v| v as f32 * 0.1));
            fields.outputs.push(values(&[1, l, 2], |v| 1.0 + v as f32));
            fields.masks.as_mut().unwrap().push(ArrayD::from_elem(IxDyn(&[l]), true));
        }
        TrainingData::SelfAttention(SelfAttentionDataset::from_fields(
            fields, Topology::Encoder, OutputLayout::HeadMajor,
        ))
    }

    fn config(epochs: usize) -> TrainConfig {
        TrainConfig {
            pipeline:          Pipeline::Alr,
            substitute_class:  "FFLinear".into(),
            global_max_length: 4,
            max_length:        4,
            batch_size:        2,
            epochs,
            ..TrainConfig::default()
        }
    }

    #[test]
    fn test_fit_logs_every_epoch_and_checkpoints_first() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        let metrics = MetricsLogger::new(dir.path()).unwrap();

        let history = fit::<TestBackend>(
            &config(2), encoder_data(&[2, 3, 4]), Default::default(), &ckpt, &metrics,
        )
        .unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].epoch, 1);
        assert!(history.iter().all(|m| m.loss_per_element.is_finite()));
        // epoch index 0 is saved as epoch 1, epoch index 1 is not saved
        assert!(dir.path().join("ff_network_ckpt_epoch_1_layer_0.mpk").exists());
        assert!(!dir.path().join("ff_network_ckpt_epoch_2_layer_0.mpk").exists());

        let csv = std::fs::read_to_string(metrics.csv_path()).unwrap();
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn test_unknown_substitute_class_fails_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        let metrics = MetricsLogger::new(dir.path()).unwrap();
        let cfg = TrainConfig { substitute_class: "Nope".into(), ..config(1) };

        let err = fit::<TestBackend>(&cfg, encoder_data(&[2]), Default::default(), &ckpt, &metrics)
            .unwrap_err();
        assert!(err.to_string().contains("unknown substitute class"));
    }

    #[test]
    fn test_training_data_widths() {
        let data = encoder_data(&[3]);
        assert_eq!(data.len(), 1);
        assert_eq!(data.input_width(), 2);
        assert_eq!(data.output_width(), 2);
        assert_eq!(data.lengths(), vec![3]);
        assert_eq!(data.longest(), 3);
    }

    #[test]
    fn test_cross_longest_covers_source_side() {
        let fields = CrossAttentionFields {
            inputs_enc: vec![values(&[6, 2], |_| 1.0), values(&[2, 2], |_| 1.0)],
            inputs_dec: vec![values(&[3, 1], |_| 1.0), values(&[4, 1], |_| 1.0)],
            outputs:    vec![values(&[1, 3, 1], |_| 1.0), values(&[1, 4, 1], |_| 1.0)],
            src_masks:  None,
            trg_masks:  None,
        };
        let data = TrainingData::CrossAttention(CrossAttentionDataset::from_fields(
            fields, OutputLayout::HeadMajor,
        ));
        assert_eq!(data.lengths(), vec![3, 4]);
        assert_eq!(data.longest(), 6);
        assert_eq!(data.input_width(), 3);
    }
}
