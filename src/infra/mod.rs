// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything a training run leaves on disk besides the
// sample cache:
//
//   checkpoint.rs : substitute network weights (Burn's
//                   CompactRecorder) and train_config.json,
//                   one folder per pipeline/class/layer
//
//   metrics.rs    : per-epoch loss, MAPE and wall time,
//                   appended to metrics.csv in the same folder
//
// Reference: Rust Book §7 (Modules)
//            Burn Book §5 (Checkpointing)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;
