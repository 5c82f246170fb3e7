// ============================================================
// Layer 4 — On-Disk Sample Cache
// ============================================================
// Reading and filtering a full dump takes minutes, so the
// filtered fields are written next to their source files and
// reused on the next run.
//
// Cache file naming (one file per field):
//   <source path>_fixed_<n>_<mode>.cache
//
//   e.g. .../128emb_20ep_IWSLT_de_en_layer0_v_inputs_train
//        .../128emb_20ep_IWSLT_de_en_layer0_v_inputs_train_fixed_64_max.cache
//
// Policy:
//   all files present  → load them, never touch the dumps
//   none present       → extract, then write every file
//   some present       → warn, extract again, overwrite all
//
// Each file is written to "<path>.tmp" first and renamed into
// place once complete, so a crash mid-write never leaves a
// file that looks like a valid cache entry.
//
// There is no staleness check: a changed dump with an old
// cache file next to it is served from the cache.
//
// Format: bincode-encoded FieldColumn.

use std::{
    ffi::OsString,
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::domain::{
    error::DataError,
    sample::FilterMode,
    tensor::{Mask, Values},
};

/// One cached field: a list of per-sample tensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldColumn {
    Values(Vec<Values>),
    Mask(Vec<Mask>),
}

impl FieldColumn {
    pub fn len(&self) -> usize {
        match self {
            FieldColumn::Values(v) => v.len(),
            FieldColumn::Mask(v)   => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_values(self) -> Result<Vec<Values>, DataError> {
        match self {
            FieldColumn::Values(v) => Ok(v),
            FieldColumn::Mask(_)   => Err(DataError::Shape(
                "expected a value column, found a mask column".into(),
            )),
        }
    }

    pub fn into_mask(self) -> Result<Vec<Mask>, DataError> {
        match self {
            FieldColumn::Mask(v)   => Ok(v),
            FieldColumn::Values(_) => Err(DataError::Shape(
                "expected a mask column, found a value column".into(),
            )),
        }
    }
}

/// How a load_or_build call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Every cache file existed and was loaded.
    Hit,
    /// No cache files existed; extracted and written.
    Built,
    /// Only some cache files existed; extracted and rewritten all.
    Rebuilt,
}

#[derive(Debug, Clone, Copy)]
pub struct SampleCache {
    bound: usize,
    mode:  FilterMode,
}

impl SampleCache {
    pub fn new(bound: usize, mode: FilterMode) -> Self {
        Self { bound, mode }
    }

    /// `<source>_fixed_<n>_<mode>.cache`
    pub fn cache_path(&self, source: &Path) -> PathBuf {
        let mut name = OsString::from(source.as_os_str());
        name.push(format!("_fixed_{}_{}.cache", self.bound, self.mode));
        PathBuf::from(name)
    }

    /// Load the cached columns for `sources`, or run `build` and
    /// cache its result. `build` must return one column per source,
    /// in the same order.
    pub fn load_or_build<F>(
        &self,
        sources: &[&Path],
        build:   F,
    ) -> Result<(Vec<FieldColumn>, CacheStatus), DataError>
    where
        F: FnOnce() -> Result<Vec<FieldColumn>, DataError>,
    {
        let paths: Vec<PathBuf> = sources.iter().map(|s| self.cache_path(s)).collect();
        let present = paths.iter().filter(|p| p.exists()).count();

        if present == paths.len() {
            let columns = paths
                .iter()
                .map(|p| read_column(p))
                .collect::<Result<Vec<_>, _>>()?;
            check_aligned(&columns)?;
            tracing::info!(
                "Loaded {} cached fields ({} samples)",
                columns.len(),
                columns.first().map_or(0, FieldColumn::len)
            );
            return Ok((columns, CacheStatus::Hit));
        }

        let status = if present == 0 {
            CacheStatus::Built
        } else {
            tracing::warn!(
                "Only {} of {} cache files exist for '{}'; rebuilding all of them",
                present,
                paths.len(),
                sources[0].display()
            );
            CacheStatus::Rebuilt
        };

        let columns = build()?;
        if columns.len() != paths.len() {
            return Err(DataError::Shape(format!(
                "extraction produced {} fields for {} cache paths",
                columns.len(),
                paths.len()
            )));
        }
        check_aligned(&columns)?;

        for (column, path) in columns.iter().zip(&paths) {
            write_column(path, column)?;
            tracing::debug!("Wrote cache file '{}'", path.display());
        }
        Ok((columns, status))
    }
}

fn check_aligned(columns: &[FieldColumn]) -> Result<(), DataError> {
    let lens: Vec<usize> = columns.iter().map(FieldColumn::len).collect();
    if lens.windows(2).any(|w| w[0] != w[1]) {
        return Err(DataError::Shape(format!("field lengths disagree: {lens:?}")));
    }
    Ok(())
}

fn read_column(path: &Path) -> Result<FieldColumn, DataError> {
    let file = File::open(path)?;
    bincode::deserialize_from(BufReader::new(file)).map_err(|source| DataError::Cache {
        path: path.to_path_buf(),
        source,
    })
}

fn write_column(path: &Path, column: &FieldColumn) -> Result<(), DataError> {
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut writer = BufWriter::new(File::create(&tmp)?);
    bincode::serialize_into(&mut writer, column).map_err(|source| DataError::Cache {
        path: tmp.clone(),
        source,
    })?;
    writer.flush()?;
    drop(writer);

    fs::rename(&tmp, path)?;
    Ok(())
}
