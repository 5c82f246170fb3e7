// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust structs, enums and traits that define what the
// system talks about: host arrays, filtered samples, the
// closed sets of run options, and the error vocabulary.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits

// ndarray aliases and sequence helpers used from file decoding up to collation
pub mod tensor;

// Filtered samples plus topology / mode / split enums
pub mod sample;

// The data-layer error type
pub mod error;

// Core abstractions (traits) that other layers implement
pub mod traits;
