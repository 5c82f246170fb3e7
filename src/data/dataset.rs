// ============================================================
// Layer 4 — Attention Datasets
// ============================================================
// Implements Burn's Dataset trait over the filtered samples of
// one dump. Construction goes through the sample cache:
//
//   cache hit  → fields come straight from the .cache files
//   cache miss → NpyStreamReader ×3 (or ×5) → extractor → cache
//
// After construction a dataset never changes. get(i) hands
// out one aligned sample; the mask is present in "max" mode
// and absent in "exact" mode, where every sample already has
// the same length.
//
// Reference: Burn Book §4 (Datasets)

use std::time::Instant;

use burn::data::dataset::Dataset;

use crate::data::{
    cache::{FieldColumn, SampleCache},
    extractor::{
        extract_cross_attention, extract_self_attention, CrossAttentionFields, LengthFilter,
        SelfAttentionFields,
    },
    paths::{CrossAttentionPaths, SelfAttentionPaths},
    reader::NpyStreamReader,
};
use crate::domain::{
    error::DataError,
    sample::{CrossAttentionSample, OutputLayout, SelfAttentionSample, Topology},
    tensor::{leading, row_width, Values},
};

/// Features per token of an output tensor, given its layout.
fn output_features(output: &Values, layout: OutputLayout) -> usize {
    match layout {
        // [heads, len, head_dim] → heads * head_dim
        OutputLayout::HeadMajor => {
            let s = output.shape();
            s.first().copied().unwrap_or(0) * s.iter().skip(2).product::<usize>()
        }
        OutputLayout::SequenceMajor => row_width(output),
    }
}

fn pick<T: Clone>(items: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().filter_map(|&i| items.get(i).cloned()).collect()
}

// ─── SelfAttentionDataset ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SelfAttentionDataset {
    fields:   SelfAttentionFields,
    topology: Topology,
    layout:   OutputLayout,
}

impl SelfAttentionDataset {
    /// Load through the cache, extracting from the dump files on a miss.
    pub fn load(
        paths:    &SelfAttentionPaths,
        topology: Topology,
        layout:   OutputLayout,
        filter:   LengthFilter,
    ) -> Result<Self, DataError> {
        tracing::info!(
            "Starting to load datasets from '{}', '{}' and '{}'",
            paths.input.display(),
            paths.output.display(),
            paths.mask.display()
        );
        let start = Instant::now();
        let keep_masks = filter.mode.keeps_masks();

        let mut sources = vec![paths.input.as_path(), paths.output.as_path()];
        if keep_masks {
            sources.push(paths.mask.as_path());
        }

        let cache = SampleCache::new(filter.bound, filter.mode);
        let (columns, status) = cache.load_or_build(&sources, || {
            let mut input = NpyStreamReader::open(&paths.input)?;
            let mut output = NpyStreamReader::open(&paths.output)?;
            let mut mask = NpyStreamReader::open(&paths.mask)?;
            let (fields, stats) =
                extract_self_attention(&mut input, &mut output, &mut mask, topology, layout, filter)?;
            tracing::info!(
                "Read {} batches: kept {} of {} samples",
                stats.batches,
                stats.kept,
                stats.seen
            );
            tracing::debug!(
                "Records consumed: input={} output={} mask={}",
                input.records_read(),
                output.records_read(),
                mask.records_read()
            );

            let mut columns = vec![
                FieldColumn::Values(fields.inputs),
                FieldColumn::Values(fields.outputs),
            ];
            if let Some(masks) = fields.masks {
                columns.push(FieldColumn::Mask(masks));
            }
            Ok(columns)
        })?;
        tracing::debug!("Sample cache status: {:?}", status);

        let mut columns = columns.into_iter();
        let mut next = || {
            columns
                .next()
                .ok_or_else(|| DataError::Shape("cache returned too few fields".into()))
        };
        let fields = SelfAttentionFields {
            inputs:  next()?.into_values()?,
            outputs: next()?.into_values()?,
            masks:   if keep_masks { Some(next()?.into_mask()?) } else { None },
        };

        let dataset = Self::from_fields(fields, topology, layout);
        tracing::info!(
            "Loaded {} samples in {:.2}s",
            dataset.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(dataset)
    }

    pub fn from_fields(fields: SelfAttentionFields, topology: Topology, layout: OutputLayout) -> Self {
        Self { fields, topology, layout }
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Like `get`, but an out-of-range index is an error.
    pub fn try_get(&self, index: usize) -> Result<SelfAttentionSample, DataError> {
        let len = self.fields.inputs.len();
        if index >= len {
            return Err(DataError::IndexOutOfRange { index, len });
        }
        Ok(SelfAttentionSample {
            input:  self.fields.inputs[index].clone(),
            output: self.fields.outputs[index].clone(),
            mask:   self.fields.masks.as_ref().map(|m| m[index].clone()),
        })
    }

    /// Features per token of the inputs (0 for an empty dataset).
    pub fn input_width(&self) -> usize {
        self.fields.inputs.first().map_or(0, row_width)
    }

    /// Features per token of the outputs once flattened.
    pub fn output_width(&self) -> usize {
        self.fields
            .outputs
            .first()
            .map_or(0, |o| output_features(o, self.layout))
    }

    /// Effective length of every sample, in order.
    pub fn lengths(&self) -> Vec<usize> {
        self.fields.inputs.iter().map(leading).collect()
    }

    /// A new dataset holding only the samples at `indices`.
    pub fn subset(&self, indices: &[usize]) -> Self {
        let fields = SelfAttentionFields {
            inputs:  pick(&self.fields.inputs, indices),
            outputs: pick(&self.fields.outputs, indices),
            masks:   self.fields.masks.as_ref().map(|m| pick(m, indices)),
        };
        Self::from_fields(fields, self.topology, self.layout)
    }
}

impl Dataset<SelfAttentionSample> for SelfAttentionDataset {
    fn get(&self, index: usize) -> Option<SelfAttentionSample> {
        self.try_get(index).ok()
    }

    fn len(&self) -> usize {
        self.fields.inputs.len()
    }
}

// ─── CrossAttentionDataset ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CrossAttentionDataset {
    fields: CrossAttentionFields,
    layout: OutputLayout,
}

impl CrossAttentionDataset {
    pub fn load(
        paths:  &CrossAttentionPaths,
        layout: OutputLayout,
        filter: LengthFilter,
    ) -> Result<Self, DataError> {
        tracing::info!(
            "Starting to load datasets from '{}', '{}', '{}', '{}' and '{}'",
            paths.input_enc.display(),
            paths.input_dec.display(),
            paths.output.display(),
            paths.src_mask.display(),
            paths.trg_mask.display()
        );
        let start = Instant::now();
        let keep_masks = filter.mode.keeps_masks();

        let mut sources = vec![
            paths.input_enc.as_path(),
            paths.input_dec.as_path(),
            paths.output.as_path(),
        ];
        if keep_masks {
            sources.push(paths.src_mask.as_path());
            sources.push(paths.trg_mask.as_path());
        }

        let cache = SampleCache::new(filter.bound, filter.mode);
        let (columns, status) = cache.load_or_build(&sources, || {
            let mut input_enc = NpyStreamReader::open(&paths.input_enc)?;
            let mut input_dec = NpyStreamReader::open(&paths.input_dec)?;
            let mut output = NpyStreamReader::open(&paths.output)?;
            let mut src_mask = NpyStreamReader::open(&paths.src_mask)?;
            let mut trg_mask = NpyStreamReader::open(&paths.trg_mask)?;
            let (fields, stats) = extract_cross_attention(
                &mut input_enc,
                &mut input_dec,
                &mut output,
                &mut src_mask,
                &mut trg_mask,
                layout,
                filter,
            )?;
            tracing::info!(
                "Read {} batches: kept {} of {} samples",
                stats.batches,
                stats.kept,
                stats.seen
            );
            tracing::debug!(
                "Records consumed: input_enc={} input_dec={} output={} src_mask={} trg_mask={}",
                input_enc.records_read(),
                input_dec.records_read(),
                output.records_read(),
                src_mask.records_read(),
                trg_mask.records_read()
            );

            let mut columns = vec![
                FieldColumn::Values(fields.inputs_enc),
                FieldColumn::Values(fields.inputs_dec),
                FieldColumn::Values(fields.outputs),
            ];
            if let (Some(src), Some(trg)) = (fields.src_masks, fields.trg_masks) {
                columns.push(FieldColumn::Mask(src));
                columns.push(FieldColumn::Mask(trg));
            }
            Ok(columns)
        })?;
        tracing::debug!("Sample cache status: {:?}", status);

        let mut columns = columns.into_iter();
        let mut next = || {
            columns
                .next()
                .ok_or_else(|| DataError::Shape("cache returned too few fields".into()))
        };
        let inputs_enc = next()?.into_values()?;
        let inputs_dec = next()?.into_values()?;
        let outputs = next()?.into_values()?;
        let (src_masks, trg_masks) = if keep_masks {
            (Some(next()?.into_mask()?), Some(next()?.into_mask()?))
        } else {
            (None, None)
        };
        let fields = CrossAttentionFields { inputs_enc, inputs_dec, outputs, src_masks, trg_masks };

        let dataset = Self::from_fields(fields, layout);
        tracing::info!(
            "Loaded {} samples in {:.2}s",
            dataset.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(dataset)
    }

    pub fn from_fields(fields: CrossAttentionFields, layout: OutputLayout) -> Self {
        Self { fields, layout }
    }

    pub fn try_get(&self, index: usize) -> Result<CrossAttentionSample, DataError> {
        let len = self.fields.inputs_enc.len();
        if index >= len {
            return Err(DataError::IndexOutOfRange { index, len });
        }
        Ok(CrossAttentionSample {
            input_enc: self.fields.inputs_enc[index].clone(),
            input_dec: self.fields.inputs_dec[index].clone(),
            output:    self.fields.outputs[index].clone(),
            src_mask:  self.fields.src_masks.as_ref().map(|m| m[index].clone()),
            trg_mask:  self.fields.trg_masks.as_ref().map(|m| m[index].clone()),
        })
    }

    /// Encoder-side plus decoder-side features per token, i.e. the
    /// width of the concatenated input divided by the global length.
    pub fn input_width(&self) -> usize {
        let enc = self.fields.inputs_enc.first().map_or(0, row_width);
        let dec = self.fields.inputs_dec.first().map_or(0, row_width);
        enc + dec
    }

    pub fn output_width(&self) -> usize {
        self.fields
            .outputs
            .first()
            .map_or(0, |o| output_features(o, self.layout))
    }

    /// Target-side effective length of every sample, in order.
    pub fn lengths(&self) -> Vec<usize> {
        self.fields.inputs_dec.iter().map(leading).collect()
    }

    /// Source-side effective length of every sample, in order.
    pub fn source_lengths(&self) -> Vec<usize> {
        self.fields.inputs_enc.iter().map(leading).collect()
    }
}

impl Dataset<CrossAttentionSample> for CrossAttentionDataset {
    fn get(&self, index: usize) -> Option<CrossAttentionSample> {
        self.try_get(index).ok()
    }

    fn len(&self) -> usize {
        self.fields.inputs_enc.len()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::reader::testing::{encode_bool, encode_f32, write_stream};
    use crate::domain::sample::FilterMode;
    use std::path::Path;

    /// Write an encoder dump: one batch, sentences padded to `t_max`,
    /// inputs [B, T, 2], outputs [B, 2 heads, T, 1], masks [B, 1, 1, T].
    fn write_encoder_dump(dir: &Path, lens: &[usize], t_max: usize) -> SelfAttentionPaths {
        let b = lens.len();
        let paths = SelfAttentionPaths {
            input:  dir.join("inputs_train"),
            output: dir.join("outputs_train"),
            mask:   dir.join("masks_train"),
        };
        let inputs: Vec<f32> = (0..b * t_max * 2).map(|v| v as f32).collect();
        let outputs: Vec<f32> = (0..b * 2 * t_max).map(|v| v as f32 * 0.1).collect();
        let masks: Vec<bool> = lens
            .iter()
            .flat_map(|&l| (0..t_max).map(move |p| p < l))
            .collect();
        write_stream(&paths.input, &[encode_f32(&[b, t_max, 2], &inputs)]);
        write_stream(&paths.output, &[encode_f32(&[b, 2, t_max, 1], &outputs)]);
        write_stream(&paths.mask, &[encode_bool(&[b, 1, 1, t_max], &masks)]);
        paths
    }

    #[test]
    fn test_load_filters_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_encoder_dump(dir.path(), &[4, 11, 7], 12);
        let filter = LengthFilter::new(10, FilterMode::Max);

        let ds = SelfAttentionDataset::load(&paths, Topology::Encoder, OutputLayout::HeadMajor, filter)
            .unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.lengths(), vec![4, 7]);
        assert_eq!(ds.input_width(), 2);
        assert_eq!(ds.output_width(), 2);
        assert!(ds.lengths().iter().all(|&l| l <= 10));

        // second load must not need the dump files at all
        std::fs::remove_file(&paths.input).unwrap();
        std::fs::remove_file(&paths.output).unwrap();
        std::fs::remove_file(&paths.mask).unwrap();
        let cached = SelfAttentionDataset::load(&paths, Topology::Encoder, OutputLayout::HeadMajor, filter)
            .unwrap();
        for i in 0..ds.len() {
            assert_eq!(ds.try_get(i).unwrap(), cached.try_get(i).unwrap());
        }
    }

    #[test]
    fn test_exact_mode_has_no_masks() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_encoder_dump(dir.path(), &[5, 3, 5], 6);
        let ds = SelfAttentionDataset::load(
            &paths,
            Topology::Encoder,
            OutputLayout::HeadMajor,
            LengthFilter::new(5, FilterMode::Exact),
        )
        .unwrap();
        assert_eq!(ds.len(), 2);
        assert!(ds.try_get(0).unwrap().mask.is_none());
        // exact mode caches only inputs and outputs
        let cache = SampleCache::new(5, FilterMode::Exact);
        assert!(!cache.cache_path(&paths.mask).exists());
    }

    #[test]
    fn test_out_of_range_index() {
        let ds = SelfAttentionDataset::from_fields(
            SelfAttentionFields::default(),
            Topology::Encoder,
            OutputLayout::SequenceMajor,
        );
        assert!(ds.get(0).is_none());
        assert!(matches!(ds.try_get(3), Err(DataError::IndexOutOfRange { index: 3, len: 0 })));
    }

    #[test]
    fn test_missing_dump_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SelfAttentionPaths {
            input:  dir.path().join("nope_in"),
            output: dir.path().join("nope_out"),
            mask:   dir.path().join("nope_mask"),
        };
        let err = SelfAttentionDataset::load(
            &paths,
            Topology::Encoder,
            OutputLayout::HeadMajor,
            LengthFilter::new(10, FilterMode::Max),
        )
        .unwrap_err();
        assert!(matches!(err, DataError::Io(_)));
    }

    #[test]
    fn test_subset_keeps_alignment() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_encoder_dump(dir.path(), &[2, 3, 4], 4);
        let ds = SelfAttentionDataset::load(
            &paths,
            Topology::Encoder,
            OutputLayout::HeadMajor,
            LengthFilter::new(4, FilterMode::Max),
        )
        .unwrap();
        let sub = ds.subset(&[2, 0]);
        assert_eq!(sub.lengths(), vec![4, 2]);
        assert_eq!(sub.try_get(0).unwrap(), ds.try_get(2).unwrap());
    }
}
