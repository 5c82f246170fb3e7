// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// This layer handles everything from the raw dump files of an
// instrumented transformer all the way to device tensor batches.
//
// The pipeline flows in this order:
//
//   dump files (concatenated .npy records)
//       │
//       ▼
//   paths             → which files belong to a layer/topology/split
//       │
//       ▼
//   NpyStreamReader   → one record (one batch) at a time
//       │
//       ▼
//   extractor         → per-sample length filter and cut
//       │
//       ▼
//   SampleCache       → filtered fields saved next to the dumps
//       │
//       ▼
//   *AttentionDataset → implements Burn's Dataset trait
//       │
//       ▼
//   *Batcher          → pads, flattens and masks into tensors
//       │
//       ▼
//   DataLoader        → feeds batches to the training loop
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Resolves dump file paths
pub mod paths;

/// Reads concatenated .npy record streams
pub mod reader;

/// Length filtering and per-sample extraction
pub mod extractor;

/// On-disk cache of extracted fields
pub mod cache;

/// Implements Burn's Dataset trait for attention samples
pub mod dataset;

/// Implements Burn's Batcher trait for the three topologies
pub mod batcher;

/// Seeded subset selection for dev runs
pub mod splitter;
