// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The extractor only needs "give me the next array, or tell
// me there are none left". Programming against this trait
// lets the extractor run on in-memory fixtures in tests and
// on NPY files in production.
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use crate::domain::{error::DataError, tensor::Values};

// ─── RecordSource ─────────────────────────────────────────────────────────────
/// A finite, ordered sequence of numeric arrays whose count is
/// only known once the sequence is exhausted.
///
/// Implementations:
///   - NpyStreamReader → concatenated `.npy` records in one file
///   - VecDeque<Values> → in-memory records (tests)
pub trait RecordSource {
    /// `Ok(Some(_))` for the next record, `Ok(None)` on clean
    /// exhaustion, `Err(_)` for any other failure.
    fn try_next(&mut self) -> Result<Option<Values>, DataError>;

    /// Human readable origin, used in log and error messages.
    fn describe(&self) -> String;
}

impl RecordSource for std::collections::VecDeque<Values> {
    fn try_next(&mut self) -> Result<Option<Values>, DataError> {
        Ok(self.pop_front())
    }

    fn describe(&self) -> String {
        format!("<{} in-memory records>", self.len())
    }
}
