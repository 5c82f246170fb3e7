// ============================================================
// Layer 4 — Dump File Layout
// ============================================================
// Maps (pipeline, topology, direction, layer, split) to the
// dump files the instrumented transformer wrote.
//
// ALR (attention-head outputs), under <root>/<topology dir>/:
//   128emb_20ep_IWSLT_<dir>_layer<L>_v_inputs_<split>
//   128emb_20ep_IWSLT_<dir>_layer<L>_q_inputs_<split>   (cross only)
//   128emb_20ep_IWSLT_<dir>_layer<L>_outputs_<split>
//   128emb_20ep_IWSLT_<dir>_masks_<split>
//   128emb_20ep_IWSLT_<dir>_masks_<split>_src           (cross only)
//
// ELR (post-residual layer outputs), directly under <root>/:
//   128emb_20ep_IWSLT_<dir>_ELR_layer<L>_inputs_<split>
//   128emb_20ep_IWSLT_<dir>_ELR_layer<L>_outputs_<split>
//   128emb_20ep_IWSLT_<dir>_masks_<split>

use std::path::{Path, PathBuf};

use crate::domain::sample::{LanguageDirection, Pipeline, Split, Topology};

/// Model/corpus tag every dump file name starts with.
pub const DUMP_PREFIX: &str = "128emb_20ep_IWSLT";

/// Source files of a self-attention dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfAttentionPaths {
    pub input:  PathBuf,
    pub output: PathBuf,
    pub mask:   PathBuf,
}

/// Source files of a cross-attention dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossAttentionPaths {
    pub input_enc: PathBuf,
    pub input_dec: PathBuf,
    pub output:    PathBuf,
    pub src_mask:  PathBuf,
    pub trg_mask:  PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpPaths {
    SelfAttention(SelfAttentionPaths),
    CrossAttention(CrossAttentionPaths),
}

impl DumpPaths {
    pub fn resolve(
        root:      &Path,
        pipeline:  Pipeline,
        topology:  Topology,
        direction: LanguageDirection,
        layer:     usize,
        split:     Split,
    ) -> Self {
        let stem = format!("{DUMP_PREFIX}_{direction}");
        let masks = format!("{stem}_masks_{split}");

        if pipeline == Pipeline::Elr {
            return DumpPaths::SelfAttention(SelfAttentionPaths {
                input:  root.join(format!("{stem}_ELR_layer{layer}_inputs_{split}")),
                output: root.join(format!("{stem}_ELR_layer{layer}_outputs_{split}")),
                mask:   root.join(masks),
            });
        }

        let dir = root.join(match topology {
            Topology::Encoder      => "encoder",
            Topology::Decoder      => "decoder_self",
            Topology::DecoderCross => "decoder_cross",
        });
        let layer_file = |kind: &str| dir.join(format!("{stem}_layer{layer}_{kind}_{split}"));

        match topology {
            Topology::Encoder | Topology::Decoder => DumpPaths::SelfAttention(SelfAttentionPaths {
                input:  layer_file("v_inputs"),
                output: layer_file("outputs"),
                mask:   dir.join(&masks),
            }),
            Topology::DecoderCross => DumpPaths::CrossAttention(CrossAttentionPaths {
                input_enc: layer_file("v_inputs"),
                input_dec: layer_file("q_inputs"),
                output:    layer_file("outputs"),
                src_mask:  dir.join(format!("{masks}_src")),
                trg_mask:  dir.join(&masks),
            }),
        }
    }
}
