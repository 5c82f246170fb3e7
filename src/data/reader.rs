// ============================================================
// Layer 4 — Tensor Stream Reader
// ============================================================
// Reads the flat dump files written by the instrumented model.
// Each file is simply many `.npy` records written back to
// back, one per batch, with no count and no end marker:
//
//   [\x93NUMPY v hdr_len {'descr': '<f4', ...} raw bytes]
//   [\x93NUMPY v hdr_len {'descr': '<f4', ...} raw bytes]
//   ...
//   <EOF>
//
// try_next() hands back one record at a time:
//   - Ok(Some(t)) → a decoded record
//   - Ok(None)    → EOF exactly on a record boundary
//   - Err(_)      → anything else (bad magic, truncated data...)
//
// The file handle lives inside the reader, so it is closed on
// every exit path when the reader is dropped.
//
// Reference: NumPy NEP 1 (.npy format)
//            Rust Book §9 (Error Handling), §15 (Drop)

use std::{
    fs::File,
    io::{BufReader, ErrorKind, Read},
    path::{Path, PathBuf},
};

use ndarray::{ArrayD, IxDyn, ShapeBuilder};

use crate::domain::{error::DataError, tensor::Values, traits::RecordSource};

const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Streams `.npy` records out of one file (or any reader).
///
/// `records` counts fully decoded records; it doubles as the
/// record number in `Malformed` errors.
pub struct NpyStreamReader<R: Read = BufReader<File>> {
    inner:   R,
    path:    PathBuf,
    records: usize,
}

impl NpyStreamReader {
    /// Open a dump file for streaming. Nothing is read until the
    /// first `try_next()`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            DataError::Io(std::io::Error::new(
                e.kind(),
                format!("cannot open '{}': {e}", path.display()),
            ))
        })?;
        Ok(Self::from_reader(BufReader::new(file), path))
    }
}

impl<R: Read> NpyStreamReader<R> {
    /// Wrap any byte source; `path` only labels errors and logs.
    pub fn from_reader(inner: R, path: impl Into<PathBuf>) -> Self {
        Self { inner, path: path.into(), records: 0 }
    }

    /// Number of records decoded so far.
    pub fn records_read(&self) -> usize {
        self.records
    }

    fn malformed(&self, reason: impl Into<String>) -> DataError {
        DataError::Malformed {
            path:   self.path.clone(),
            record: self.records,
            reason: reason.into(),
        }
    }

    /// Fill `buf` completely. Returns Ok(false) if the stream was
    /// already at EOF before the first byte; a partial fill is an error.
    fn fill(&mut self, buf: &mut [u8], allow_eof: bool) -> Result<bool, DataError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled == buf.len() {
            return Ok(true);
        }
        if filled == 0 && allow_eof {
            return Ok(false);
        }
        Err(self.malformed(format!(
            "unexpected end of file after {filled} of {} bytes",
            buf.len()
        )))
    }

    /// Decode the next record.
    ///
    /// The payload size is computed with checked arithmetic and
    /// read through `take`, so a header that claims more data than
    /// the file holds fails as `Malformed` instead of allocating
    /// the claimed size up front.
    fn read_record(&mut self) -> Result<Option<Values>, DataError> {
        let mut magic = [0u8; 6];
        if !self.fill(&mut magic, true)? {
            return Ok(None);
        }
        if &magic != MAGIC {
            return Err(self.malformed("missing NPY magic string"));
        }

        let mut version = [0u8; 2];
        self.fill(&mut version, false)?;
        let header_len = match version[0] {
            1 => {
                let mut b = [0u8; 2];
                self.fill(&mut b, false)?;
                u16::from_le_bytes(b) as usize
            }
            2 | 3 => {
                let mut b = [0u8; 4];
                self.fill(&mut b, false)?;
                u32::from_le_bytes(b) as usize
            }
            v => return Err(self.malformed(format!("unsupported NPY version {v}"))),
        };

        let mut header = Vec::new();
        let got = (&mut self.inner).take(header_len as u64).read_to_end(&mut header)?;
        if got != header_len {
            return Err(self.malformed(format!(
                "unexpected end of file after {got} of {header_len} header bytes"
            )));
        }
        let header = String::from_utf8(header)
            .map_err(|_| self.malformed("header is not valid text"))?;
        let header = NpyHeader::parse(&header).map_err(|reason| self.malformed(reason))?;
        let dtype = Dtype::parse(&header.descr).ok_or_else(|| DataError::UnsupportedDtype {
            path:  self.path.clone(),
            descr: header.descr.clone(),
        })?;

        let size = header
            .shape
            .iter()
            .try_fold(dtype.size, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| self.malformed(format!("shape {:?} overflows", header.shape)))?;
        let mut raw = Vec::new();
        let got = (&mut self.inner).take(size as u64).read_to_end(&mut raw)?;
        if got != size {
            return Err(self.malformed(format!(
                "unexpected end of file after {got} of {size} data bytes"
            )));
        }

        let values = dtype.decode(&raw);
        let dims = IxDyn(&header.shape);
        let array = if header.fortran_order {
            ArrayD::from_shape_vec(dims.f(), values)?
                .as_standard_layout()
                .into_owned()
        } else {
            ArrayD::from_shape_vec(dims, values)?
        };
        self.records += 1;
        Ok(Some(array))
    }
}

impl<R: Read> RecordSource for NpyStreamReader<R> {
    fn try_next(&mut self) -> Result<Option<Values>, DataError> {
        self.read_record()
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ─── Header ───────────────────────────────────────────────────────────────────
// The header is a Python dict literal, e.g.
//   {'descr': '<f4', 'fortran_order': False, 'shape': (32, 1, 1, 57), }

#[derive(Debug, PartialEq)]
struct NpyHeader {
    descr:         String,
    fortran_order: bool,
    shape:         Vec<usize>,
}

impl NpyHeader {
    fn parse(text: &str) -> Result<Self, String> {
        let descr = value_after(text, "descr")
            .and_then(quoted)
            .ok_or("header has no 'descr'")?
            .to_string();

        let fortran_order = match value_after(text, "fortran_order") {
            Some(v) if v.starts_with("True")  => true,
            Some(v) if v.starts_with("False") => false,
            _ => return Err("header has no 'fortran_order'".into()),
        };

        let shape_text = value_after(text, "shape")
            .and_then(|v| v.strip_prefix('('))
            .and_then(|v| v.split_once(')'))
            .map(|(inside, _)| inside)
            .ok_or("header has no 'shape'")?;
        let shape = shape_text
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<usize>().map_err(|_| format!("bad shape entry '{s}'")))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { descr, fortran_order, shape })
    }
}

/// Text following `'key':` (or `"key":`) with leading whitespace removed.
fn value_after<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    [format!("'{key}':"), format!("\"{key}\":")]
        .iter()
        .find_map(|k| text.find(k.as_str()).map(|at| text[at + k.len()..].trim_start()))
}

fn quoted(text: &str) -> Option<&str> {
    let quote = text.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let rest = &text[1..];
    rest.find(quote).map(|end| &rest[..end])
}

// ─── Dtype ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
struct Dtype {
    kind:       char,
    size:       usize,
    big_endian: bool,
}

impl Dtype {
    /// `None` for anything outside the supported set.
    fn parse(descr: &str) -> Option<Self> {
        let mut chars = descr.chars();
        let order = chars.next()?;
        let big_endian = match order {
            '>'             => true,
            '<' | '|' | '=' => cfg!(target_endian = "big") && order == '=',
            _               => return None,
        };
        let kind = chars.next()?;
        let size: usize = chars.as_str().parse().ok()?;
        let supported = matches!(
            (kind, size),
            ('f', 4) | ('f', 8) | ('i', 1) | ('i', 2) | ('i', 4) | ('i', 8) | ('u', 1) | ('b', 1)
        );
        supported.then_some(Self { kind, size, big_endian })
    }

    /// Decode raw bytes to f32, one element per `size` bytes.
    fn decode(&self, raw: &[u8]) -> Vec<f32> {
        raw.chunks_exact(self.size)
            .map(|chunk| {
                let mut bytes = [0u8; 8];
                bytes[..self.size].copy_from_slice(chunk);
                if self.big_endian {
                    bytes[..self.size].reverse();
                }
                match (self.kind, self.size) {
                    ('f', 4) => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
                    ('f', 8) => f64::from_le_bytes(bytes) as f32,
                    ('i', 1) => bytes[0] as i8 as f32,
                    ('i', 2) => i16::from_le_bytes([bytes[0], bytes[1]]) as f32,
                    ('i', 4) => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32,
                    ('i', 8) => i64::from_le_bytes(bytes) as f32,
                    ('b', 1) => (bytes[0] != 0) as u8 as f32,
                    _        => bytes[0] as f32,
                }
            })
            .collect()
    }
}

// ─── Test fixtures ────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod testing {
    use std::{io::Write, path::Path};

    /// Encode one `<f4` record in NPY v1 format.
    pub fn encode_f32(shape: &[usize], data: &[f32]) -> Vec<u8> {
        encode(shape, "<f4", &data.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<_>>())
    }

    /// Encode one `|b1` record in NPY v1 format.
    pub fn encode_bool(shape: &[usize], data: &[bool]) -> Vec<u8> {
        encode(shape, "|b1", &data.iter().map(|&b| b as u8).collect::<Vec<_>>())
    }

    pub fn encode(shape: &[usize], descr: &str, raw: &[u8]) -> Vec<u8> {
        encode_ordered(shape, descr, false, raw)
    }

    /// Encode one record; `fortran` marks `raw` as column-major.
    pub fn encode_ordered(shape: &[usize], descr: &str, fortran: bool, raw: &[u8]) -> Vec<u8> {
        let order = if fortran { "True" } else { "False" };
        let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
        let shape_text = if dims.len() == 1 {
            format!("({},)", dims[0])
        } else {
            format!("({})", dims.join(", "))
        };
        let mut header = format!(
            "{{'descr': '{descr}', 'fortran_order': {order}, 'shape': {shape_text}, }}"
        );
        // numpy pads the header so data starts on a 64-byte boundary
        while (10 + header.len() + 1) % 64 != 0 {
            header.push(' ');
        }
        header.push('\n');

        let mut out = Vec::new();
        out.extend_from_slice(b"\x93NUMPY\x01\x00");
        out.extend_from_slice(&(header.len() as u16).to_le_bytes());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(raw);
        out
    }

    /// Write records back to back into `path`.
    pub fn write_stream(path: &Path, records: &[Vec<u8>]) {
        let mut f = std::fs::File::create(path).unwrap();
        for r in records {
            f.write_all(r).unwrap();
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::io::Cursor;

    fn reader(bytes: Vec<u8>) -> NpyStreamReader<Cursor<Vec<u8>>> {
        NpyStreamReader::from_reader(Cursor::new(bytes), "memory")
    }

    fn flat(array: Values) -> Vec<f32> {
        array.iter().copied().collect()
    }

    #[test]
    fn test_reads_until_clean_eof() {
        let mut bytes = encode_f32(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        bytes.extend(encode_f32(&[1, 3], &[7.0, 8.0, 9.0]));
        let mut r = reader(bytes);

        let first = r.try_next().unwrap().unwrap();
        assert_eq!(first.shape(), &[2, 3]);
        let second = r.try_next().unwrap().unwrap();
        assert_eq!(flat(second), vec![7.0, 8.0, 9.0]);
        assert!(r.try_next().unwrap().is_none());
        assert_eq!(r.records_read(), 2);
    }

    #[test]
    fn test_empty_stream_is_exhausted_not_an_error() {
        assert!(reader(Vec::new()).try_next().unwrap().is_none());
    }

    #[test]
    fn test_truncated_record_is_an_error() {
        let mut bytes = encode_f32(&[4], &[1.0, 2.0, 3.0, 4.0]);
        bytes.truncate(bytes.len() - 3);
        let err = reader(bytes).try_next().unwrap_err();
        assert!(matches!(err, DataError::Malformed { .. }), "{err}");
    }

    #[test]
    fn test_garbage_after_records_is_an_error() {
        let mut bytes = encode_f32(&[1], &[1.0]);
        bytes.extend_from_slice(b"junk");
        let mut r = reader(bytes);
        assert!(r.try_next().unwrap().is_some());
        assert!(r.try_next().is_err());
    }

    #[test]
    fn test_bool_and_int_dtypes_decode_to_f32() {
        let mut bytes = encode_bool(&[3], &[true, false, true]);
        let ints: Vec<u8> = [5i64, -2].iter().flat_map(|v| v.to_le_bytes()).collect();
        bytes.extend(encode(&[2], "<i8", &ints));
        let mut r = reader(bytes);
        assert_eq!(flat(r.try_next().unwrap().unwrap()), vec![1.0, 0.0, 1.0]);
        assert_eq!(flat(r.try_next().unwrap().unwrap()), vec![5.0, -2.0]);
    }

    #[test]
    fn test_big_endian_float() {
        let raw: Vec<u8> = [1.5f32, -3.0].iter().flat_map(|v| v.to_be_bytes()).collect();
        let mut r = reader(encode(&[2], ">f4", &raw));
        assert_eq!(flat(r.try_next().unwrap().unwrap()), vec![1.5, -3.0]);
    }

    #[test]
    fn test_unsupported_dtype() {
        let err = reader(encode(&[1], "<c8", &[0u8; 8])).try_next().unwrap_err();
        assert!(matches!(err, DataError::UnsupportedDtype { .. }));
    }

    #[test]
    fn test_header_parse() {
        let h = NpyHeader::parse(
            "{'descr': '<f4', 'fortran_order': False, 'shape': (32, 1, 1, 57), }",
        )
        .unwrap();
        assert_eq!(h.descr, "<f4");
        assert!(!h.fortran_order);
        assert_eq!(h.shape, vec![32, 1, 1, 57]);

        let scalar = NpyHeader::parse("{'descr': '<f8', 'fortran_order': True, 'shape': (), }")
            .unwrap();
        assert!(scalar.shape.is_empty());
    }

    #[test]
    fn test_fortran_order_is_converted() {
        // logical [[1, 2, 3], [4, 5, 6]] stored column-major
        let raw: Vec<u8> = [1.0f32, 4.0, 2.0, 5.0, 3.0, 6.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let out = reader(encode_ordered(&[2, 3], "<f4", true, &raw)).try_next().unwrap().unwrap();
        assert_eq!(out.shape(), &[2, 3]);
        assert!(out.is_standard_layout());
        assert_eq!(flat(out), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_overflowing_shape_is_malformed() {
        let err = reader(encode(&[usize::MAX / 2, 4], "<f4", &[])).try_next().unwrap_err();
        assert!(matches!(err, DataError::Malformed { .. }), "{err}");
    }

    #[test]
    fn test_oversized_shape_without_data_is_malformed() {
        // claims 4 TiB of payload; must fail on the missing bytes
        let err = reader(encode(&[1 << 40], "<f4", &[0u8; 16])).try_next().unwrap_err();
        assert!(matches!(err, DataError::Malformed { record: 0, .. }), "{err}");
    }

    #[test]
    fn test_truncated_header_is_malformed() {
        let mut bytes = encode_f32(&[2], &[1.0, 2.0]);
        bytes.truncate(20);
        let err = reader(bytes).try_next().unwrap_err();
        assert!(matches!(err, DataError::Malformed { .. }), "{err}");
    }

    #[test]
    fn test_open_missing_file_fails() {
        assert!(NpyStreamReader::open("/definitely/not/here.npy").is_err());
    }
}
