// ============================================================
// Layer 4 — Attention Batchers (Collation)
// ============================================================
// Implements Burn's Batcher trait for the three attention
// topologies. Every batcher turns a Vec of variable-length
// samples into fixed-width tensors in the same steps:
//
//   1. pad every field to the longest sample in the batch
//   2. flatten head-major outputs [heads, len, head_dim]
//      into one feature vector per token [len, heads*head_dim]
//      (heads outer, head_dim inner)
//   3. pad again, up to the global max length
//   4. build the mask the topology needs
//
//   encoder  inputs  [B, G*E]    targets [B, G*F]   mask [B, G*E]
//   decoder  inputs  [B, G, E]   targets [B, G, F]  mask [B, G, G]
//   cross    inputs  [B, G*(Ee+Ed)]  targets [B, G*F]  mask [B, G*Ed]
//
//   (G = global max length, E/F = features per token)
//
// Masks: true = real token. Encoder and cross masks are
// repeated once per feature so they gate single elements of
// the flattened vectors. The decoder mask is a real attention
// mask: padding AND no-look-forward.
//
// Samples without a mask ("exact" mode) are treated as fully
// valid over their own length. For the decoder that length is
// the width of the dump, padding included.
//
// Reference: Burn Book §4 (Batcher)

use burn::{data::dataloader::batcher::Batcher, prelude::*};
use ndarray::{s, Array1, Array2, Array3, Axis};

use crate::domain::{
    error::DataError,
    sample::{CrossAttentionSample, OutputLayout, SelfAttentionSample},
    tensor::{leading, row_width, select, Mask, Values},
};

// ─── CollateConfig ────────────────────────────────────────────────────────────
/// Everything collation needs besides the samples themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollateConfig {
    /// Width every batch is padded to along the sequence axis.
    pub max_len: usize,
    /// Layout of the output tensors in the samples.
    pub layout:  OutputLayout,
}

impl CollateConfig {
    pub fn new(max_len: usize, layout: OutputLayout) -> Self {
        Self { max_len, layout }
    }
}

// ─── Batches ──────────────────────────────────────────────────────────────────
// Besides the topology's own mask every batch carries
// `target_mask`, the token validity repeated once per target
// feature, so error metrics can skip padded target elements.

/// Encoder self-attention batch: everything flattened per sample.
#[derive(Debug, Clone)]
pub struct FlatBatch<B: Backend> {
    /// [batch, G * E]
    pub inputs:      Tensor<B, 2>,
    /// [batch, G * F]
    pub targets:     Tensor<B, 2>,
    /// [batch, G * E]
    pub mask:        Tensor<B, 2, Bool>,
    /// [batch, G * F]
    pub target_mask: Tensor<B, 2, Bool>,
}

/// Decoder self-attention batch with a causal attention mask.
#[derive(Debug, Clone)]
pub struct CausalBatch<B: Backend> {
    /// [batch, G, E]
    pub inputs:      Tensor<B, 3>,
    /// [batch, G, F]
    pub targets:     Tensor<B, 3>,
    /// [batch, G, G]
    pub mask:        Tensor<B, 3, Bool>,
    /// [batch, G * F]
    pub target_mask: Tensor<B, 2, Bool>,
}

/// Decoder cross-attention batch.
#[derive(Debug, Clone)]
pub struct CrossBatch<B: Backend> {
    /// Encoder side then decoder side: [batch, G * (Ee + Ed)]
    pub inputs:      Tensor<B, 2>,
    /// [batch, G * F]
    pub targets:     Tensor<B, 2>,
    /// Loss mask, [batch, G * Ed]
    pub mask:        Tensor<B, 2, Bool>,
    /// [batch, G * F]
    pub target_mask: Tensor<B, 2, Bool>,
}

/// What the training loop needs from any batch.
pub trait TrainingBatch<B: Backend> {
    /// Model input, one flat feature vector per sample.
    fn features(&self) -> Tensor<B, 2>;

    /// Regression target, one flat feature vector per sample.
    fn targets(&self) -> Tensor<B, 2>;

    /// Validity of every target element, same shape as `targets()`.
    fn target_mask(&self) -> Tensor<B, 2, Bool>;

    /// Number of `true` entries in the loss mask.
    fn valid_count(&self) -> f64;

    /// Product of the first two loss mask dimensions.
    fn mask_cells(&self) -> usize;

    /// Fraction of valid mask entries; the loss is divided by this.
    fn loss_normalizer(&self) -> f64 {
        self.valid_count() / self.mask_cells().max(1) as f64
    }
}

fn count_true<B: Backend, const D: usize>(mask: &Tensor<B, D, Bool>) -> f64 {
    mask.clone().int().sum().into_scalar().elem::<f64>()
}

impl<B: Backend> TrainingBatch<B> for FlatBatch<B> {
    fn features(&self) -> Tensor<B, 2> {
        self.inputs.clone()
    }

    fn targets(&self) -> Tensor<B, 2> {
        self.targets.clone()
    }

    fn target_mask(&self) -> Tensor<B, 2, Bool> {
        self.target_mask.clone()
    }

    fn valid_count(&self) -> f64 {
        count_true(&self.mask)
    }

    fn mask_cells(&self) -> usize {
        let [b, w] = self.mask.dims();
        b * w
    }
}

impl<B: Backend> TrainingBatch<B> for CausalBatch<B> {
    fn features(&self) -> Tensor<B, 2> {
        self.inputs.clone().flatten(1, 2)
    }

    fn targets(&self) -> Tensor<B, 2> {
        self.targets.clone().flatten(1, 2)
    }

    fn target_mask(&self) -> Tensor<B, 2, Bool> {
        self.target_mask.clone()
    }

    fn valid_count(&self) -> f64 {
        count_true(&self.mask)
    }

    fn mask_cells(&self) -> usize {
        let [b, g, _] = self.mask.dims();
        b * g
    }
}

impl<B: Backend> TrainingBatch<B> for CrossBatch<B> {
    fn features(&self) -> Tensor<B, 2> {
        self.inputs.clone()
    }

    fn targets(&self) -> Tensor<B, 2> {
        self.targets.clone()
    }

    fn target_mask(&self) -> Tensor<B, 2, Bool> {
        self.target_mask.clone()
    }

    fn valid_count(&self) -> f64 {
        count_true(&self.mask)
    }

    fn mask_cells(&self) -> usize {
        let [b, w] = self.mask.dims();
        b * w
    }
}

// ─── Host-side padding ────────────────────────────────────────────────────────
// Padding is done on ndarray buffers `[batch, len, width]`;
// burn tensors are only created once the final shape is known.

/// Stack token-major `[len_i, width]` rows into `[batch, longest, width]`,
/// filling the tail of shorter rows with `fill`.
fn stack_padded<T: Clone>(rows: &[Array2<T>], width: usize, fill: T) -> Array3<T> {
    let len = rows.iter().map(|r| r.nrows()).max().unwrap_or(0);
    let mut out = Array3::from_elem((rows.len(), len, width), fill);
    for (mut slot, row) in out.outer_iter_mut().zip(rows) {
        slot.slice_mut(s![..row.nrows(), ..]).assign(row);
    }
    out
}

/// Pad the sequence axis further, up to `target` positions.
fn extend_to<T: Clone>(padded: Array3<T>, target: usize, fill: T) -> Result<Array3<T>, DataError> {
    let (batch, len, width) = padded.dim();
    if target < len {
        return Err(DataError::Shape(format!(
            "batch holds a sample of length {} but the global max length is {}",
            len, target
        )));
    }
    let mut out = Array3::from_elem((batch, target, width), fill);
    out.slice_mut(s![.., ..len, ..]).assign(&padded);
    Ok(out)
}

/// Repeat every element `factor` times along the feature axis.
fn repeat_each(padded: &Array3<bool>, factor: usize) -> Array3<bool> {
    let (batch, len, width) = padded.dim();
    Array3::from_shape_fn((batch, len, width * factor), |(b, t, k)| padded[[b, t, k / factor]])
}

fn flat_dims<T>(padded: &Array3<T>) -> [usize; 2] {
    let (batch, len, width) = padded.dim();
    [batch, len * width]
}

fn dims<T>(padded: &Array3<T>) -> [usize; 3] {
    let (batch, len, width) = padded.dim();
    [batch, len, width]
}

/// `[heads, len, head_dim]` → `[len, heads * head_dim]`, heads outer.
pub fn flatten_heads(output: &Values) -> Result<Values, DataError> {
    if output.ndim() != 3 {
        return Err(DataError::Shape(format!(
            "head-major output must be [heads, len, head_dim], got {:?}",
            output.shape()
        )));
    }
    let [heads, len, head_dim] = [output.shape()[0], output.shape()[1], output.shape()[2]];
    let mut swapped = output.view();
    swapped.swap_axes(0, 1);
    Ok(swapped.to_shape((len, heads * head_dim))?.into_owned().into_dyn())
}

/// Token-major `[len, features]` view of an output, by layout.
fn token_major(output: &Values, layout: OutputLayout) -> Result<Values, DataError> {
    match layout {
        OutputLayout::HeadMajor     => flatten_heads(output),
        OutputLayout::SequenceMajor => Ok(output.clone()),
    }
}

/// The shared feature width of a field, or a shape error.
fn common_width<'a>(
    field:   &str,
    tensors: impl Iterator<Item = &'a Values>,
) -> Result<usize, DataError> {
    let widths: Vec<usize> = tensors.map(row_width).collect();
    match widths.first() {
        Some(&w) if widths.iter().all(|&x| x == w) => Ok(w),
        Some(_) => Err(DataError::Shape(format!("{field} widths differ within a batch: {widths:?}"))),
        None    => Err(DataError::Shape("cannot collate an empty batch".into())),
    }
}

/// Pad a token-major field: batch-local max first, then global max.
fn pad_field(tensors: &[Values], width: usize, max_len: usize) -> Result<Array3<f32>, DataError> {
    let rows = tensors
        .iter()
        .map(|t| -> Result<Array2<f32>, DataError> { Ok(t.to_shape((leading(t), width))?.into_owned()) })
        .collect::<Result<Vec<_>, _>>()?;
    extend_to(stack_padded(&rows, width, 0.0), max_len, 0.0)
}

/// Pad per-token validity flags: batch-local max first, then global max.
fn pad_mask(masks: Vec<Vec<bool>>, max_len: usize) -> Result<Array3<bool>, DataError> {
    let rows: Vec<Array2<bool>> = masks
        .into_iter()
        .map(|m| Array1::from(m).insert_axis(Axis(1)))
        .collect();
    extend_to(stack_padded(&rows, 1, false), max_len, false)
}

/// Validity flags of a `[len]` padding mask, or all-valid if absent.
fn token_flags(mask: Option<&Mask>, len: usize) -> Vec<bool> {
    match mask {
        Some(m) => m.iter().copied().collect(),
        None    => vec![true; len],
    }
}

/// Validity flags of a `[len, len]` causal mask: its last row.
fn causal_flags(mask: Option<&Mask>, len: usize) -> Result<Vec<bool>, DataError> {
    match mask {
        Some(m) if len > 0 => Ok(select(m, 0, len - 1)?.iter().copied().collect()),
        Some(_)            => Ok(Vec::new()),
        None               => Ok(vec![true; len]),
    }
}

/// Lower-triangular "no look forward" mask `[g, g]`:
/// entry (i, j) is true iff j <= i.
pub fn no_look_forward_mask(g: usize) -> Vec<bool> {
    (0..g).flat_map(|i| (0..g).map(move |j| j <= i)).collect()
}

fn float_tensor<B: Backend, const D: usize>(data: &Array3<f32>, dims: [usize; D], device: &B::Device) -> Tensor<B, D> {
    Tensor::from_data(TensorData::new(data.iter().copied().collect(), dims), device)
}

fn bool_tensor<B: Backend, const D: usize>(data: &Array3<bool>, dims: [usize; D], device: &B::Device) -> Tensor<B, D, Bool> {
    Tensor::from_data(TensorData::new(data.iter().copied().collect(), dims), device)
}

// ─── Collation ────────────────────────────────────────────────────────────────

pub fn collate_encoder<B: Backend>(
    items:  &[SelfAttentionSample],
    config: &CollateConfig,
    device: &B::Device,
) -> Result<FlatBatch<B>, DataError> {
    let outputs = items
        .iter()
        .map(|s| token_major(&s.output, config.layout))
        .collect::<Result<Vec<_>, _>>()?;
    let inputs: Vec<Values> = items.iter().map(|s| s.input.clone()).collect();

    let e = common_width("input", inputs.iter())?;
    let f = common_width("output", outputs.iter())?;

    let inputs = pad_field(&inputs, e, config.max_len)?;
    let outputs = pad_field(&outputs, f, config.max_len)?;
    let flags: Vec<Vec<bool>> = items
        .iter()
        .map(|s| token_flags(s.mask.as_ref(), s.len()))
        .collect();
    let padding = pad_mask(flags, config.max_len)?;
    let target_mask = repeat_each(&padding, f);
    let mask = repeat_each(&padding, e);

    Ok(FlatBatch {
        inputs:      float_tensor(&inputs, flat_dims(&inputs), device),
        targets:     float_tensor(&outputs, flat_dims(&outputs), device),
        mask:        bool_tensor(&mask, flat_dims(&mask), device),
        target_mask: bool_tensor(&target_mask, flat_dims(&target_mask), device),
    })
}

pub fn collate_decoder<B: Backend>(
    items:  &[SelfAttentionSample],
    config: &CollateConfig,
    device: &B::Device,
) -> Result<CausalBatch<B>, DataError> {
    let outputs = items
        .iter()
        .map(|s| token_major(&s.output, config.layout))
        .collect::<Result<Vec<_>, _>>()?;
    let inputs: Vec<Values> = items.iter().map(|s| s.input.clone()).collect();

    let e = common_width("input", inputs.iter())?;
    let f = common_width("output", outputs.iter())?;

    let inputs = pad_field(&inputs, e, config.max_len)?;
    let outputs = pad_field(&outputs, f, config.max_len)?;
    let flags = items
        .iter()
        .map(|s| causal_flags(s.mask.as_ref(), s.len()))
        .collect::<Result<Vec<_>, _>>()?;
    let padding = pad_mask(flags, config.max_len)?;

    // padding AND no-look-forward, for both the query row and the key column
    let g = config.max_len;
    let mask = Array3::from_shape_fn((items.len(), g, g), |(b, i, j)| {
        j <= i && padding[[b, i, 0]] && padding[[b, j, 0]]
    });

    let target_mask = repeat_each(&padding, f);

    Ok(CausalBatch {
        inputs:      float_tensor(&inputs, dims(&inputs), device),
        targets:     float_tensor(&outputs, dims(&outputs), device),
        mask:        bool_tensor(&mask, dims(&mask), device),
        target_mask: bool_tensor(&target_mask, flat_dims(&target_mask), device),
    })
}

pub fn collate_cross<B: Backend>(
    items:  &[CrossAttentionSample],
    config: &CollateConfig,
    device: &B::Device,
) -> Result<CrossBatch<B>, DataError> {
    let outputs = items
        .iter()
        .map(|s| token_major(&s.output, config.layout))
        .collect::<Result<Vec<_>, _>>()?;
    let inputs_enc: Vec<Values> = items.iter().map(|s| s.input_enc.clone()).collect();
    let inputs_dec: Vec<Values> = items.iter().map(|s| s.input_dec.clone()).collect();

    let ee = common_width("encoder input", inputs_enc.iter())?;
    let ed = common_width("decoder input", inputs_dec.iter())?;
    let f = common_width("output", outputs.iter())?;

    let inputs_enc = pad_field(&inputs_enc, ee, config.max_len)?;
    let inputs_dec = pad_field(&inputs_dec, ed, config.max_len)?;
    let outputs = pad_field(&outputs, f, config.max_len)?;

    // the loss only covers target tokens; source padding is zero input
    let trg_flags: Vec<Vec<bool>> = items
        .iter()
        .map(|s| token_flags(s.trg_mask.as_ref(), s.trg_len()))
        .collect();
    let trg_padding = pad_mask(trg_flags, config.max_len)?;
    let target_mask = repeat_each(&trg_padding, f);
    let trg_mask = repeat_each(&trg_padding, ed);

    let enc = float_tensor::<B, 2>(&inputs_enc, flat_dims(&inputs_enc), device);
    let dec = float_tensor::<B, 2>(&inputs_dec, flat_dims(&inputs_dec), device);

    Ok(CrossBatch {
        inputs:      Tensor::cat(vec![enc, dec], 1),
        targets:     float_tensor(&outputs, flat_dims(&outputs), device),
        mask:        bool_tensor(&trg_mask, flat_dims(&trg_mask), device),
        target_mask: bool_tensor(&target_mask, flat_dims(&target_mask), device),
    })
}

// ─── Batchers ─────────────────────────────────────────────────────────────────
// Burn's Batcher::batch cannot fail. Lengths are bounded by the
// extractor and the bound is checked against max_len when the
// run is configured, so a collation error here is a bug.

macro_rules! attention_batcher {
    ($name:ident, $item:ty, $batch:ident, $collate:ident, $what:literal) => {
        #[derive(Clone, Debug)]
        pub struct $name<B: Backend> {
            device: B::Device,
            config: CollateConfig,
        }

        impl<B: Backend> $name<B> {
            pub fn new(device: B::Device, config: CollateConfig) -> Self {
                Self { device, config }
            }
        }

        impl<B: Backend> Batcher<$item, $batch<B>> for $name<B> {
            fn batch(&self, items: Vec<$item>) -> $batch<B> {
                $collate(&items, &self.config, &self.device)
                    .unwrap_or_else(|e| panic!("cannot collate {} batch: {e}", $what))
            }
        }
    };
}

attention_batcher!(EncoderBatcher, SelfAttentionSample, FlatBatch, collate_encoder, "encoder");
attention_batcher!(DecoderBatcher, SelfAttentionSample, CausalBatch, collate_decoder, "decoder");
attention_batcher!(CrossBatcher, CrossAttentionSample, CrossBatch, collate_cross, "cross-attention");
