// ============================================================
// Layer 4 — Length-Filtered Sample Extractor
// ============================================================
// Walks the parallel dump streams of one (topology, layer,
// split) in lockstep, one batch record from each stream per
// step, and turns every sentence of every batch into a sample
// cut to its effective length.
//
// How "effective length" is read from the masks differs per
// topology, because each dump stores its mask differently:
//
//   encoder       mask [B, 1, 1, T]  → squeeze → [B, T]
//                 len = number of valid positions
//
//   decoder self  mask [B, 1, T, T]  → squeeze → [B, T, T]
//                 len = largest per-row valid count
//                 (the last causal row sees the whole sentence)
//
//   cross         src  [B, 1, 1, S]  → squeeze → [B, S]
//                 trg  [B, 1, T, T]  → last row → [B, T]
//                 two independent lengths
//
// Filtering:
//   max   → keep iff every length <= n, cut each field to its length
//   exact → keep iff every length == n, cut each field to n
//           (decoder self-attention samples stay uncut at the
//           dump's padded width)
//
// Nothing is padded here. Padding is the batcher's job.

use crate::domain::{
    error::DataError,
    sample::{FilterMode, OutputLayout, Topology},
    tensor::{leading, narrow, select, squeeze, to_mask, valid_counts, Mask, Values},
    traits::RecordSource,
};

// ─── LengthFilter ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthFilter {
    pub bound: usize,
    pub mode:  FilterMode,
}

impl LengthFilter {
    pub fn new(bound: usize, mode: FilterMode) -> Self {
        Self { bound, mode }
    }

    /// Whether a sample of effective length `len` is kept.
    pub fn accepts(&self, len: usize) -> bool {
        match self.mode {
            FilterMode::Max   => len <= self.bound,
            FilterMode::Exact => len == self.bound,
        }
    }

    /// Length every field of an accepted sample is cut to.
    fn cut_len(&self, len: usize) -> usize {
        match self.mode {
            FilterMode::Max   => len,
            FilterMode::Exact => self.bound,
        }
    }
}

// ─── Extracted fields ─────────────────────────────────────────────────────────
/// Index-aligned, variable-length fields of a self-attention dump.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelfAttentionFields {
    pub inputs:  Vec<Values>,
    pub outputs: Vec<Values>,
    /// `None` in exact mode.
    pub masks:   Option<Vec<Mask>>,
}

/// Index-aligned, variable-length fields of a cross-attention dump.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrossAttentionFields {
    pub inputs_enc: Vec<Values>,
    pub inputs_dec: Vec<Values>,
    pub outputs:    Vec<Values>,
    pub src_masks:  Option<Vec<Mask>>,
    pub trg_masks:  Option<Vec<Mask>>,
}

/// Counters reported once a dump has been fully consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub batches: usize,
    pub seen:    usize,
    pub kept:    usize,
}

// ─── Lockstep reading ─────────────────────────────────────────────────────────
/// Read one record from every stream. All streams must end
/// together and every record of a step must share its batch size.
fn next_group(
    streams: &mut [&mut dyn RecordSource],
    batch:   usize,
) -> Result<Option<Vec<Values>>, DataError> {
    let mut records = Vec::with_capacity(streams.len());
    let mut ended = Vec::new();
    for stream in streams.iter_mut() {
        match stream.try_next()? {
            Some(r) => records.push(r),
            None    => ended.push(stream.describe()),
        }
    }

    if ended.len() == streams.len() {
        return Ok(None);
    }
    if !ended.is_empty() {
        return Err(DataError::MisalignedStreams {
            batch,
            reason: format!("stream(s) {} ended before the others", ended.join(", ")),
        });
    }

    let sizes: Vec<usize> = records.iter().map(leading).collect();
    if sizes.windows(2).any(|w| w[0] != w[1]) {
        return Err(DataError::MisalignedStreams {
            batch,
            reason: format!("batch sizes disagree across streams: {sizes:?}"),
        });
    }
    Ok(Some(records))
}

// ─── Self-attention ───────────────────────────────────────────────────────────

/// Extract encoder or decoder self-attention samples.
///
/// `input`, `output` and `mask` are read in lockstep until all
/// three are exhausted. Input records are `[B, T, features]`,
/// output records follow `layout` with a leading batch axis, and
/// mask records are `[B, 1, 1, T]` (encoder) or `[B, 1, T, T]`
/// (decoder). Returns the kept samples and the read counters.
pub fn extract_self_attention(
    input:    &mut dyn RecordSource,
    output:   &mut dyn RecordSource,
    mask:     &mut dyn RecordSource,
    topology: Topology,
    layout:   OutputLayout,
    filter:   LengthFilter,
) -> Result<(SelfAttentionFields, ExtractStats), DataError> {
    if topology == Topology::DecoderCross {
        return Err(DataError::InvalidConfig(
            "cross-attention dumps need extract_cross_attention".into(),
        ));
    }

    let mut fields = SelfAttentionFields {
        masks: filter.mode.keeps_masks().then(Vec::new),
        ..Default::default()
    };
    let mut stats = ExtractStats::default();
    let mut streams: [&mut dyn RecordSource; 3] = [input, output, mask];

    while let Some(group) = next_group(&mut streams, stats.batches)? {
        let [i, o, m]: [Values; 3] = group
            .try_into()
            .map_err(|_| DataError::Shape("expected three records per step".into()))?;

        // [B, 1, 1, T] → [B, T]   or   [B, 1, T, T] → [B, T, T]
        let m = match topology {
            Topology::Encoder => squeeze(squeeze(to_mask(&m), 1), 1),
            _                 => squeeze(to_mask(&m), 1),
        };

        for j in 0..leading(&i) {
            stats.seen += 1;
            let mj = select(&m, 0, j)?;
            let len = match topology {
                Topology::Encoder => encoder_length(&mj)?,
                _                 => causal_length(&mj)?,
            };
            if !filter.accepts(len) {
                continue;
            }
            let input = select(&i, 0, j)?;
            let output = select(&o, 0, j)?;
            let cut = filter.cut_len(len);

            if topology == Topology::Decoder && filter.mode == FilterMode::Exact {
                fields.inputs.push(input);
                fields.outputs.push(output);
                stats.kept += 1;
                continue;
            }

            fields.inputs.push(narrow(&input, 0, cut)?);
            fields.outputs.push(narrow(&output, layout.seq_axis(), cut)?);
            if let Some(masks) = fields.masks.as_mut() {
                let mj = match topology {
                    Topology::Encoder => narrow(&mj, 0, cut)?,
                    _                 => narrow(&narrow(&mj, 0, cut)?, 1, cut)?,
                };
                masks.push(mj);
            }
            stats.kept += 1;
        }
        stats.batches += 1;
    }
    Ok((fields, stats))
}

/// Valid-position count of a `[T]` padding mask.
fn encoder_length(mask: &Mask) -> Result<usize, DataError> {
    if mask.ndim() != 1 {
        return Err(DataError::Shape(format!(
            "encoder mask per sample must be [T], got {:?}",
            mask.shape()
        )));
    }
    Ok(valid_counts(mask).first().copied().unwrap_or(0))
}

/// Largest per-row valid count of a `[T, T]` causal mask.
fn causal_length(mask: &Mask) -> Result<usize, DataError> {
    if mask.ndim() != 2 || mask.shape()[0] != mask.shape()[1] {
        return Err(DataError::Shape(format!(
            "decoder mask per sample must be [T, T], got {:?}",
            mask.shape()
        )));
    }
    Ok(valid_counts(mask).into_iter().max().unwrap_or(0))
}

// ─── Cross-attention ──────────────────────────────────────────────────────────

/// Extract decoder cross-attention samples from five parallel streams.
///
/// A sample is kept only when both its source and its target
/// length pass the filter. The encoder side and the source mask
/// are cut to the source length; the decoder side, the output
/// and the target mask are cut to the target length.
pub fn extract_cross_attention(
    input_enc: &mut dyn RecordSource,
    input_dec: &mut dyn RecordSource,
    output:    &mut dyn RecordSource,
    src_mask:  &mut dyn RecordSource,
    trg_mask:  &mut dyn RecordSource,
    layout:    OutputLayout,
    filter:    LengthFilter,
) -> Result<(CrossAttentionFields, ExtractStats), DataError> {
    let keep_masks = filter.mode.keeps_masks();
    let mut fields = CrossAttentionFields {
        src_masks: keep_masks.then(Vec::new),
        trg_masks: keep_masks.then(Vec::new),
        ..Default::default()
    };
    let mut stats = ExtractStats::default();
    let mut streams: [&mut dyn RecordSource; 5] = [input_enc, input_dec, output, src_mask, trg_mask];

    while let Some(group) = next_group(&mut streams, stats.batches)? {
        let [ie, id, o, ms, mt]: [Values; 5] = group
            .try_into()
            .map_err(|_| DataError::Shape("expected five records per step".into()))?;

        // src [B, 1, 1, S] → [B, S]
        let ms = squeeze(squeeze(to_mask(&ms), 1), 1);
        // trg [B, 1, T, T] → last row [B, 1, T] → [B, T]
        let mt = to_mask(&mt);
        if mt.ndim() < 3 {
            return Err(DataError::Shape(format!(
                "target mask must be [B, 1, T, T], got {:?}",
                mt.shape()
            )));
        }
        let row_axis = mt.ndim() - 2;
        let last_row = mt.shape()[row_axis].saturating_sub(1);
        let mt = squeeze(select(&mt, row_axis, last_row)?, 1);

        for j in 0..leading(&ie) {
            stats.seen += 1;
            let src_j = select(&ms, 0, j)?;
            let trg_j = select(&mt, 0, j)?;
            let l_src = encoder_length(&src_j)?;
            let l_trg = encoder_length(&trg_j)?;
            if !(filter.accepts(l_src) && filter.accepts(l_trg)) {
                continue;
            }
            let (cut_src, cut_trg) = (filter.cut_len(l_src), filter.cut_len(l_trg));

            fields.inputs_enc.push(narrow(&select(&ie, 0, j)?, 0, cut_src)?);
            fields.inputs_dec.push(narrow(&select(&id, 0, j)?, 0, cut_trg)?);
            fields.outputs.push(narrow(&select(&o, 0, j)?, layout.seq_axis(), cut_trg)?);
            if let Some(masks) = fields.src_masks.as_mut() {
                masks.push(narrow(&src_j, 0, cut_src)?);
            }
            if let Some(masks) = fields.trg_masks.as_mut() {
                masks.push(narrow(&trg_j, 0, cut_trg)?);
            }
            stats.kept += 1;
        }
        stats.batches += 1;
    }
    Ok((fields, stats))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};
    use std::collections::VecDeque;

    fn t(shape: Vec<usize>, f: impl Fn(usize) -> f32) -> Values {
        let n: usize = shape.iter().product();
        ArrayD::from_shape_vec(IxDyn(&shape), (0..n).map(f).collect()).unwrap()
    }

    /// Encoder mask record [B, 1, 1, T] from per-sample lengths.
    fn padding_mask(lens: &[usize], t_max: usize) -> Values {
        let data = lens
            .iter()
            .flat_map(|&l| (0..t_max).map(move |p| (p < l) as u8 as f32))
            .collect();
        ArrayD::from_shape_vec(IxDyn(&[lens.len(), 1, 1, t_max]), data).unwrap()
    }

    /// Decoder mask record [B, 1, T, T]: causal AND padding.
    fn causal_mask(lens: &[usize], t_max: usize) -> Values {
        let mut data = Vec::new();
        for &l in lens {
            for r in 0..t_max {
                for c in 0..t_max {
                    data.push((c <= r && c < l) as u8 as f32);
                }
            }
        }
        ArrayD::from_shape_vec(IxDyn(&[lens.len(), 1, t_max, t_max]), data).unwrap()
    }

    fn stream(records: Vec<Values>) -> VecDeque<Values> {
        records.into()
    }

    #[test]
    fn test_encoder_max_mode_cuts_to_effective_length() {
        // batch of 3 sentences padded to 12; lengths 4, 11, 7 with n = 10
        let lens = [4, 11, 7];
        let mut i = stream(vec![t(vec![3, 12, 2], |v| v as f32 + 1.0)]);
        let mut o = stream(vec![t(vec![3, 2, 12, 3], |v| v as f32)]); // [B, heads, T, hd]
        let mut m = stream(vec![padding_mask(&lens, 12)]);

        let (fields, stats) = extract_self_attention(
            &mut i, &mut o, &mut m,
            Topology::Encoder, OutputLayout::HeadMajor,
            LengthFilter::new(10, FilterMode::Max),
        )
        .unwrap();

        // length 11 > 10 is dropped entirely
        assert_eq!(stats, ExtractStats { batches: 1, seen: 3, kept: 2 });
        assert_eq!(fields.inputs[0].shape(), &[4, 2]);
        assert_eq!(fields.inputs[1].shape(), &[7, 2]);
        assert_eq!(fields.outputs[0].shape(), &[2, 4, 3]);
        assert_eq!(fields.outputs[1].shape(), &[2, 7, 3]);
        let masks = fields.masks.unwrap();
        assert_eq!(masks[1].shape(), &[7]);
        assert!(masks.iter().all(|m| m.iter().all(|&v| v)));
        // second kept sample is batch index 2
        assert_eq!(fields.inputs[1].iter().next(), Some(&((2 * 12 * 2) as f32 + 1.0)));
    }

    #[test]
    fn test_exact_mode_keeps_only_matching_lengths() {
        let lens = [5, 3, 5];
        let mut i = stream(vec![t(vec![3, 6, 2], |v| v as f32)]);
        let mut o = stream(vec![t(vec![3, 6, 4], |v| v as f32)]);
        let mut m = stream(vec![padding_mask(&lens, 6)]);

        let (fields, stats) = extract_self_attention(
            &mut i, &mut o, &mut m,
            Topology::Encoder, OutputLayout::SequenceMajor,
            LengthFilter::new(5, FilterMode::Exact),
        )
        .unwrap();

        assert_eq!(stats.kept, 2);
        assert!(fields.masks.is_none());
        assert!(fields.inputs.iter().all(|x| leading(x) == 5));
        assert!(fields.outputs.iter().all(|x| x.shape() == [5, 4]));
    }

    #[test]
    fn test_decoder_length_is_max_row_count() {
        let lens = [3, 5];
        let mut i = stream(vec![t(vec![2, 5, 2], |v| v as f32)]);
        let mut o = stream(vec![t(vec![2, 1, 5, 2], |v| v as f32)]);
        let mut m = stream(vec![causal_mask(&lens, 5)]);

        let (fields, _) = extract_self_attention(
            &mut i, &mut o, &mut m,
            Topology::Decoder, OutputLayout::HeadMajor,
            LengthFilter::new(4, FilterMode::Max),
        )
        .unwrap();

        assert_eq!(fields.inputs.len(), 1);
        let mask = &fields.masks.unwrap()[0];
        assert_eq!(mask.shape(), &[3, 3]);
        // still lower triangular after the cut
        assert_eq!(
            mask.iter().copied().collect::<Vec<_>>(),
            vec![true, false, false, true, true, false, true, true, true]
        );
        assert_eq!(fields.outputs[0].shape(), &[1, 3, 2]);
    }

    #[test]
    fn test_decoder_exact_mode_leaves_samples_uncut() {
        let lens = [4, 2];
        let mut i = stream(vec![t(vec![2, 6, 2], |v| v as f32)]);
        let mut o = stream(vec![t(vec![2, 1, 6, 3], |v| v as f32)]);
        let mut m = stream(vec![causal_mask(&lens, 6)]);

        let (fields, stats) = extract_self_attention(
            &mut i, &mut o, &mut m,
            Topology::Decoder, OutputLayout::HeadMajor,
            LengthFilter::new(4, FilterMode::Exact),
        )
        .unwrap();

        assert_eq!(stats.kept, 1);
        assert!(fields.masks.is_none());
        assert_eq!(fields.inputs[0].shape(), &[6, 2]);
        assert_eq!(fields.outputs[0].shape(), &[1, 6, 3]);
    }

    #[test]
    fn test_cross_attention_two_lengths() {
        // sample 0: src 3, trg 2 → kept; sample 1: src 5 (> 4) → dropped
        let mut ie = stream(vec![t(vec![2, 5, 2], |v| v as f32)]);
        let mut id = stream(vec![t(vec![2, 4, 2], |v| v as f32)]);
        let mut o  = stream(vec![t(vec![2, 2, 4, 1], |v| v as f32)]);
        let mut ms = stream(vec![padding_mask(&[3, 5], 5)]);
        let mut mt = stream(vec![causal_mask(&[2, 4], 4)]);

        let (fields, stats) = extract_cross_attention(
            &mut ie, &mut id, &mut o, &mut ms, &mut mt,
            OutputLayout::HeadMajor,
            LengthFilter::new(4, FilterMode::Max),
        )
        .unwrap();

        assert_eq!(stats.kept, 1);
        assert_eq!(fields.inputs_enc[0].shape(), &[3, 2]);
        assert_eq!(fields.inputs_dec[0].shape(), &[2, 2]);
        assert_eq!(fields.outputs[0].shape(), &[2, 2, 1]);
        assert_eq!(fields.src_masks.unwrap()[0].shape(), &[3]);
        assert_eq!(fields.trg_masks.unwrap()[0].shape(), &[2]);
    }

    #[test]
    fn test_cross_exact_mode_needs_both_lengths() {
        // (src, trg) = (3, 3) kept; (3, 2) and (2, 3) dropped
        let mut ie = stream(vec![t(vec![3, 5, 2], |v| v as f32)]);
        let mut id = stream(vec![t(vec![3, 4, 2], |v| v as f32)]);
        let mut o  = stream(vec![t(vec![3, 2, 4, 1], |v| v as f32)]);
        let mut ms = stream(vec![padding_mask(&[3, 3, 2], 5)]);
        let mut mt = stream(vec![causal_mask(&[3, 2, 3], 4)]);

        let (fields, stats) = extract_cross_attention(
            &mut ie, &mut id, &mut o, &mut ms, &mut mt,
            OutputLayout::HeadMajor,
            LengthFilter::new(3, FilterMode::Exact),
        )
        .unwrap();

        assert_eq!(stats, ExtractStats { batches: 1, seen: 3, kept: 1 });
        assert!(fields.src_masks.is_none() && fields.trg_masks.is_none());
        // both sides cut to n, away from the dump widths 5 and 4
        assert_eq!(fields.inputs_enc[0].shape(), &[3, 2]);
        assert_eq!(fields.inputs_dec[0].shape(), &[3, 2]);
        assert_eq!(fields.outputs[0].shape(), &[2, 3, 1]);
        // first encoder row of batch entry 0
        assert_eq!(
            fields.inputs_enc[0].iter().take(2).copied().collect::<Vec<_>>(),
            vec![0.0, 1.0]
        );
    }

    #[test]
    fn test_multiple_batches_are_concatenated() {
        let mut i = stream(vec![t(vec![2, 3, 1], |_| 1.0), t(vec![1, 4, 1], |_| 2.0)]);
        let mut o = stream(vec![t(vec![2, 3, 1], |_| 1.0), t(vec![1, 4, 1], |_| 2.0)]);
        let mut m = stream(vec![padding_mask(&[3, 2], 3), padding_mask(&[4], 4)]);

        let (fields, stats) = extract_self_attention(
            &mut i, &mut o, &mut m,
            Topology::Encoder, OutputLayout::SequenceMajor,
            LengthFilter::new(10, FilterMode::Max),
        )
        .unwrap();
        assert_eq!(stats.batches, 2);
        assert_eq!(
            fields.inputs.iter().map(leading).collect::<Vec<_>>(),
            vec![3, 2, 4]
        );
    }

    #[test]
    fn test_stream_ending_early_is_misaligned() {
        let mut i = stream(vec![t(vec![1, 3, 1], |_| 0.0), t(vec![1, 3, 1], |_| 0.0)]);
        let mut o = stream(vec![t(vec![1, 3, 1], |_| 0.0)]);
        let mut m = stream(vec![padding_mask(&[3], 3), padding_mask(&[3], 3)]);

        let err = extract_self_attention(
            &mut i, &mut o, &mut m,
            Topology::Encoder, OutputLayout::SequenceMajor,
            LengthFilter::new(10, FilterMode::Max),
        )
        .unwrap_err();
        assert!(matches!(err, DataError::MisalignedStreams { batch: 1, .. }), "{err}");
    }

    #[test]
    fn test_batch_size_disagreement_is_misaligned() {
        let mut i = stream(vec![t(vec![2, 3, 1], |_| 0.0)]);
        let mut o = stream(vec![t(vec![1, 3, 1], |_| 0.0)]);
        let mut m = stream(vec![padding_mask(&[3, 3], 3)]);

        let err = extract_self_attention(
            &mut i, &mut o, &mut m,
            Topology::Encoder, OutputLayout::SequenceMajor,
            LengthFilter::new(10, FilterMode::Max),
        )
        .unwrap_err();
        assert!(matches!(err, DataError::MisalignedStreams { batch: 0, .. }));
    }
}
