// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Three subcommands:
//   alr     : replace one attention sub-layer (head outputs)
//   elr     : replace a whole encoder layer (residual outputs)
//   prepare : build the sample cache of a dump, no training
//
// Enumerated options (direction, split, mode, replacement)
// parse through the domain FromStr impls, so a typo fails with
// the list of valid values.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::application::train_use_case::TrainConfig;
use crate::domain::sample::{FilterMode, LanguageDirection, Pipeline, Split, Topology};

/// Dump root of each pipeline when --dataset-path is not given.
const ALR_DATA_ROOT: &str = "mha_outputs";
const ELR_DATA_ROOT: &str = "layer_outputs";

/// Learning rates of each pipeline when --lr is not given.
const ALR_LR: f64 = 1e-4;
const ELR_LR: f64 = 1e-3;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a substitute for one attention sub-layer
    Alr(AlrArgs),

    /// Train a substitute for a whole encoder layer
    Elr(ElrArgs),

    /// Build (or load) the sample cache and report its contents
    Prepare(PrepareArgs),
}

/// Which samples get loaded; shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    /// Root folder of the dump files
    #[arg(long)]
    pub dataset_path: Option<PathBuf>,

    /// de_en or en_de
    #[arg(long, default_value = "de_en")]
    pub language_direction: LanguageDirection,

    /// Index of the layer to replace
    #[arg(long, default_value_t = 0)]
    pub num_of_curr_trained_layer: usize,

    /// train, test or val
    #[arg(long, default_value = "train")]
    pub split: Split,

    /// max: keep samples up to --max-length; exact: keep samples of exactly --max-length
    #[arg(long, default_value = "max")]
    pub mode: FilterMode,

    /// Length bound n of the filter [default: --global-max-length]
    #[arg(long)]
    pub max_length: Option<usize>,

    /// Sequence width every batch is padded to
    #[arg(long, default_value_t = 100)]
    pub global_max_length: usize,
}

/// How to train; shared by alr and elr.
#[derive(Args, Debug, Clone)]
pub struct TrainingArgs {
    /// Name of the substitute network to train
    #[arg(long)]
    pub substitute_class: String,

    #[arg(long, default_value_t = 21)]
    pub num_of_epochs: usize,

    #[arg(long, default_value_t = 2000)]
    pub batch_size: usize,

    /// Learning rate [default: 1e-4 for alr, 1e-3 for elr]
    #[arg(long)]
    pub lr: Option<f64>,

    /// Batch prefetch workers; 0 collates on the training thread
    #[arg(long, default_value_t = 0)]
    pub num_workers: usize,

    /// Request multi-device training (runs on a single device)
    #[arg(long)]
    pub multi_device: bool,

    /// Root folder for checkpoints and metrics
    #[arg(long, default_value = "checkpoints")]
    pub checkpoints_root: PathBuf,
}

#[derive(Args, Debug)]
pub struct AlrArgs {
    /// encoder, decoder or decoder_ca
    #[arg(long, default_value = "encoder")]
    pub att_replacement: Topology,

    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub training: TrainingArgs,
}

#[derive(Args, Debug)]
pub struct ElrArgs {
    /// Train on a random 20% of the samples
    #[arg(long)]
    pub dev: bool,

    /// Seed of the --dev subset
    #[arg(long, default_value_t = 42)]
    pub dev_seed: u64,

    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub training: TrainingArgs,
}

#[derive(Args, Debug)]
pub struct PrepareArgs {
    /// ALR or ELR
    #[arg(long, default_value = "ALR")]
    pub pipeline: Pipeline,

    /// encoder, decoder or decoder_ca (ALR only)
    #[arg(long, default_value = "encoder")]
    pub att_replacement: Topology,

    #[command(flatten)]
    pub data: DataArgs,
}

fn default_root(pipeline: Pipeline) -> PathBuf {
    PathBuf::from(match pipeline {
        Pipeline::Alr => ALR_DATA_ROOT,
        Pipeline::Elr => ELR_DATA_ROOT,
    })
}

impl DataArgs {
    /// Fill the data half of a TrainConfig.
    fn apply(self, pipeline: Pipeline, topology: Topology, cfg: TrainConfig) -> TrainConfig {
        TrainConfig {
            pipeline,
            topology,
            dataset_path:      self.dataset_path.unwrap_or_else(|| default_root(pipeline)),
            direction:         self.language_direction,
            layer:             self.num_of_curr_trained_layer,
            split:             self.split,
            mode:              self.mode,
            max_length:        self.max_length.unwrap_or(self.global_max_length),
            global_max_length: self.global_max_length,
            ..cfg
        }
    }
}

impl TrainingArgs {
    /// Fill the training half of a TrainConfig.
    fn apply(self, default_lr: f64, cfg: TrainConfig) -> TrainConfig {
        TrainConfig {
            substitute_class: self.substitute_class,
            epochs:           self.num_of_epochs,
            batch_size:       self.batch_size,
            lr:               self.lr.unwrap_or(default_lr),
            num_workers:      self.num_workers,
            multi_device:     self.multi_device,
            checkpoints_root: self.checkpoints_root,
            ..cfg
        }
    }
}

/// Convert CLI args into the application-layer TrainConfig.
/// The application layer never sees clap types.
impl From<AlrArgs> for TrainConfig {
    fn from(a: AlrArgs) -> Self {
        let cfg = a.data.apply(Pipeline::Alr, a.att_replacement, TrainConfig::default());
        a.training.apply(ALR_LR, cfg)
    }
}

impl From<ElrArgs> for TrainConfig {
    fn from(a: ElrArgs) -> Self {
        let cfg = a.data.apply(Pipeline::Elr, Topology::Encoder, TrainConfig::default());
        TrainConfig { dev: a.dev, dev_seed: a.dev_seed, ..a.training.apply(ELR_LR, cfg) }
    }
}

impl From<PrepareArgs> for TrainConfig {
    fn from(a: PrepareArgs) -> Self {
        a.data.apply(a.pipeline, a.att_replacement, TrainConfig::default())
    }
}
