// ============================================================
// Layer 3 — Samples and Run Vocabulary
// ============================================================
// A sample is one sentence after length filtering: every field
// has been cut down to the sentence's effective length, so no
// padding from the upstream dump survives.
//
//   self-attention (encoder / decoder):
//     input   [len, features]
//     output  [heads, len, head_dim]   (ALR)  or  [len, features] (ELR)
//     mask    [len]        encoder
//             [len, len]   decoder (causal)
//
//   cross-attention:
//     input_enc [len_src, features]    src_mask [len_src]
//     input_dec [len_trg, features]    trg_mask [len_trg]
//     output    [heads, len_trg, head_dim]
//
// Masks are absent in "exact" mode, where every sample already
// has the same length. Decoder self-attention samples are not
// cut in that mode and keep the dump's padded width.
//
// The enums below are the closed sets of values a run can be
// configured with. Each parses from the same spelling the CLI
// and the dump file names use.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::domain::{
    error::DataError,
    tensor::{leading, Mask, Values},
};

// ─── Samples ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SelfAttentionSample {
    pub input:  Values,
    pub output: Values,
    pub mask:   Option<Mask>,
}

impl SelfAttentionSample {
    /// Sequence length of the sample (leading axis of the input).
    pub fn len(&self) -> usize {
        leading(&self.input)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrossAttentionSample {
    pub input_enc: Values,
    pub input_dec: Values,
    pub output:    Values,
    pub src_mask:  Option<Mask>,
    pub trg_mask:  Option<Mask>,
}

impl CrossAttentionSample {
    /// Target-side sequence length.
    pub fn trg_len(&self) -> usize {
        leading(&self.input_dec)
    }
}

// ─── Topology ─────────────────────────────────────────────────────────────────
/// Which attention sub-layer is being replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    /// Encoder self-attention: one sequence, padding mask only.
    Encoder,
    /// Decoder self-attention: one sequence, causal mask.
    Decoder,
    /// Decoder cross-attention: source and target sequences.
    DecoderCross,
}

impl Topology {
    pub const NAMES: [&'static str; 3] = ["encoder", "decoder", "decoder_ca"];

    pub fn name(&self) -> &'static str {
        match self {
            Topology::Encoder      => "encoder",
            Topology::Decoder      => "decoder",
            Topology::DecoderCross => "decoder_ca",
        }
    }
}

// ─── FilterMode ───────────────────────────────────────────────────────────────
/// How the extractor decides which samples to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterMode {
    /// Keep samples with effective length <= n, cut to their own length.
    Max,
    /// Keep samples with effective length == n.
    Exact,
}

impl FilterMode {
    pub const NAMES: [&'static str; 2] = ["max", "exact"];

    pub fn name(&self) -> &'static str {
        match self {
            FilterMode::Max   => "max",
            FilterMode::Exact => "exact",
        }
    }

    /// Only "max" mode keeps per-sample masks; in "exact" mode every
    /// sample has length n and masks carry no information.
    pub fn keeps_masks(&self) -> bool {
        matches!(self, FilterMode::Max)
    }
}

// ─── Split ────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Split {
    Train,
    Test,
    Val,
}

impl Split {
    pub const NAMES: [&'static str; 3] = ["train", "test", "val"];

    pub fn name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test  => "test",
            Split::Val   => "val",
        }
    }
}

// ─── LanguageDirection ────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LanguageDirection {
    DeEn,
    EnDe,
}

impl LanguageDirection {
    pub const NAMES: [&'static str; 2] = ["de_en", "en_de"];

    pub fn name(&self) -> &'static str {
        match self {
            LanguageDirection::DeEn => "de_en",
            LanguageDirection::EnDe => "en_de",
        }
    }
}

// ─── Pipeline ─────────────────────────────────────────────────────────────────
/// ALR trains against raw attention-head output, ELR against the
/// post-residual layer output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pipeline {
    Alr,
    Elr,
}

impl Pipeline {
    pub const NAMES: [&'static str; 2] = ["ALR", "ELR"];

    pub fn name(&self) -> &'static str {
        match self {
            Pipeline::Alr => "ALR",
            Pipeline::Elr => "ELR",
        }
    }

    /// Where the sequence axis sits in this pipeline's output dumps.
    pub fn output_layout(&self) -> OutputLayout {
        match self {
            Pipeline::Alr => OutputLayout::HeadMajor,
            Pipeline::Elr => OutputLayout::SequenceMajor,
        }
    }
}

// ─── OutputLayout ─────────────────────────────────────────────────────────────
/// Per-sample layout of an output tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputLayout {
    /// `[heads, seq, head_dim]`; flattened heads-outer at collation.
    HeadMajor,
    /// `[seq, features]`; already one feature vector per token.
    SequenceMajor,
}

impl OutputLayout {
    pub fn seq_axis(&self) -> usize {
        match self {
            OutputLayout::HeadMajor     => 1,
            OutputLayout::SequenceMajor => 0,
        }
    }
}

// ─── Parsing ──────────────────────────────────────────────────────────────────

fn invalid(kind: &str, value: &str, valid: &[&str]) -> DataError {
    DataError::InvalidConfig(format!(
        "{kind} must be one of {}, got '{value}'",
        valid.join(", ")
    ))
}

impl FromStr for Topology {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "encoder"    => Ok(Topology::Encoder),
            "decoder"    => Ok(Topology::Decoder),
            "decoder_ca" => Ok(Topology::DecoderCross),
            other        => Err(invalid("attention replacement", other, &Self::NAMES)),
        }
    }
}

impl FromStr for FilterMode {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max"   => Ok(FilterMode::Max),
            "exact" => Ok(FilterMode::Exact),
            other   => Err(invalid("filter mode", other, &Self::NAMES)),
        }
    }
}

impl FromStr for Split {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Split::Train),
            "test"  => Ok(Split::Test),
            "val"   => Ok(Split::Val),
            other   => Err(invalid("split", other, &Self::NAMES)),
        }
    }
}

impl FromStr for LanguageDirection {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "de_en" => Ok(LanguageDirection::DeEn),
            "en_de" => Ok(LanguageDirection::EnDe),
            other   => Err(invalid("language direction", other, &Self::NAMES)),
        }
    }
}

impl FromStr for Pipeline {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALR" | "alr" => Ok(Pipeline::Alr),
            "ELR" | "elr" => Ok(Pipeline::Elr),
            other         => Err(invalid("pipeline", other, &Self::NAMES)),
        }
    }
}

macro_rules! display_by_name {
    ($($t:ty),*) => {
        $(impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        })*
    };
}

display_by_name!(Topology, FilterMode, Split, LanguageDirection, Pipeline);
