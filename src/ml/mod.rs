// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// The substitute network and everything needed to fit it.
//
//   model.rs    : feed-forward substitute (Linear + ReLU stack),
//                 its normalised MSE loss and the masked MAPE
//
//   registry.rs : substitute class name → hidden layer widths
//
//   trainer.rs  : the training loop: DataLoader, forward,
//                 backward, Adam step, per-epoch metrics and
//                 checkpoints
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)

/// Feed-forward substitute network
pub mod model;

/// Named substitute architectures
pub mod registry;

/// Training loop with metrics and checkpointing
pub mod trainer;
