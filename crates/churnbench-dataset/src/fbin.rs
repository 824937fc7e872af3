//! `.fbin` vector files.
//!
//! ```text
//! u32 count (LE) | u32 dim (LE) | count × dim × f32 (LE)
//! ```
//!
//! Records are numbered from 1 in file order.

use crate::{DatasetError, DatasetOpener, DatasetResult, DatasetSource, Record};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

const HEADER_LEN: u64 = 8;
const FLOAT_LEN: u64 = 4;

/// Sequential reader over an `.fbin` file.
pub struct FbinReader {
    path: PathBuf,
    reader: BufReader<File>,
    size: u64,
    dimension: usize,
    position: u64,
}

impl std::fmt::Debug for FbinReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FbinReader")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("dimension", &self.dimension)
            .field("position", &self.position)
            .finish()
    }
}

impl FbinReader {
    /// Opens `path` and validates its header against `expected_dim`.
    ///
    /// Fails fast when the dimension differs or when the file is shorter than the
    /// record count in its header promises.
    pub fn open(path: impl AsRef<Path>, expected_dim: usize) -> DatasetResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| DatasetError::Open {
            path: path.clone(),
            source,
        })?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let size = u64::from(read_header_field(&mut reader, "count")?);
        let dimension = read_header_field(&mut reader, "dimension")? as usize;
        if dimension != expected_dim {
            return Err(DatasetError::DimensionMismatch {
                expected: expected_dim,
                found: dimension,
            });
        }

        let record_len = dimension as u64 * FLOAT_LEN;
        let available = file_len
            .saturating_sub(HEADER_LEN)
            .checked_div(record_len)
            .unwrap_or(size);
        if available < size {
            return Err(DatasetError::ShortFile {
                declared: size,
                available,
            });
        }

        Ok(Self {
            path,
            reader,
            size,
            dimension,
            position: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records consumed so far.
    pub fn position(&self) -> u64 {
        self.position
    }
}

fn read_header_field(reader: &mut BufReader<File>, field: &'static str) -> DatasetResult<u32> {
    reader.read_u32::<LittleEndian>().map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => DatasetError::Header(field),
        _ => DatasetError::Io(e),
    })
}

impl DatasetSource for FbinReader {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn has_next(&self) -> bool {
        self.position < self.size
    }

    fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.position)
    }

    fn next_record(&mut self) -> DatasetResult<Record> {
        if !self.has_next() {
            return Err(DatasetError::Exhausted);
        }
        let mut vector = vec![0.0f32; self.dimension];
        let record = self.position + 1;
        self.reader
            .read_f32_into::<LittleEndian>(&mut vector)
            .map_err(|e| match e.kind() {
                ErrorKind::UnexpectedEof => DatasetError::Truncated { record },
                _ => DatasetError::Io(e),
            })?;
        self.position = record;
        Ok((record as i64, vector))
    }
}

/// Reopens an `.fbin` file from its first record.
#[derive(Debug, Clone)]
pub struct FbinOpener {
    pub path: PathBuf,
    pub dimension: usize,
}

impl FbinOpener {
    pub fn new(path: impl Into<PathBuf>, dimension: usize) -> Self {
        Self {
            path: path.into(),
            dimension,
        }
    }
}

impl DatasetOpener for FbinOpener {
    fn open(&self) -> DatasetResult<Box<dyn DatasetSource>> {
        Ok(Box::new(FbinReader::open(&self.path, self.dimension)?))
    }
}

/// Writes `vectors` to `path` in `.fbin` layout. Every vector must have `dimension`
/// components.
pub fn write_fbin(path: impl AsRef<Path>, dimension: usize, vectors: &[Vec<f32>]) -> DatasetResult<()> {
    for (index, v) in vectors.iter().enumerate() {
        if v.len() != dimension {
            return Err(DatasetError::VectorLength {
                index,
                expected: dimension,
                found: v.len(),
            });
        }
    }

    let count = u32::try_from(vectors.len()).map_err(|_| {
        DatasetError::Io(std::io::Error::new(
            ErrorKind::InvalidInput,
            "too many vectors for a u32 record count",
        ))
    })?;
    let dim = u32::try_from(dimension).map_err(|_| {
        DatasetError::Io(std::io::Error::new(
            ErrorKind::InvalidInput,
            "dimension does not fit in u32",
        ))
    })?;

    let mut out = BufWriter::new(File::create(path.as_ref())?);
    out.write_u32::<LittleEndian>(count)?;
    out.write_u32::<LittleEndian>(dim)?;
    for v in vectors {
        for x in v {
            out.write_f32::<LittleEndian>(*x)?;
        }
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::tempdir;

    fn vectors(n: usize, dim: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| (0..dim).map(|d| (i * dim + d) as f32).collect())
            .collect()
    }

    #[test]
    fn reads_back_written_vectors_with_one_based_ids() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("base.fbin");
        let data = vectors(3, 4);
        write_fbin(&path, 4, &data).unwrap();

        let mut reader = FbinReader::open(&path, 4).unwrap();
        assert_eq!(reader.size(), 3);
        assert_eq!(reader.dimension(), 4);

        let mut ids = Vec::new();
        while reader.has_next() {
            let (id, v) = reader.next_record().unwrap();
            assert_eq!(v, data[(id - 1) as usize]);
            ids.push(id);
        }
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(matches!(reader.next_record(), Err(DatasetError::Exhausted)));
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("base.fbin");
        write_fbin(&path, 4, &vectors(2, 4)).unwrap();

        let err = FbinReader::open(&path, 96).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::DimensionMismatch {
                expected: 96,
                found: 4
            }
        ));
    }

    #[test]
    fn rejects_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.fbin");
        let mut f = File::create(&path).unwrap();
        f.write_all(&5u32.to_le_bytes()).unwrap();
        f.write_all(&2u32.to_le_bytes()).unwrap();
        // Two and a half records.
        for x in [1.0f32, 2.0, 3.0, 4.0, 5.0] {
            f.write_all(&x.to_le_bytes()).unwrap();
        }
        drop(f);

        let err = FbinReader::open(&path, 2).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::ShortFile {
                declared: 5,
                available: 2
            }
        ));
    }

    #[test]
    fn rejects_missing_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.fbin");
        File::create(&path).unwrap();
        assert!(matches!(
            FbinReader::open(&path, 2),
            Err(DatasetError::Header("count"))
        ));
    }

    #[test]
    fn opener_restarts_from_first_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.fbin");
        write_fbin(&path, 2, &vectors(2, 2)).unwrap();

        let opener = FbinOpener::new(&path, 2);
        let mut first = opener.open().unwrap();
        first.next_record().unwrap();
        first.next_record().unwrap();
        assert!(!first.has_next());

        let mut again = opener.open().unwrap();
        assert_eq!(again.next_record().unwrap().0, 1);
    }

    #[test]
    fn write_rejects_ragged_vectors() {
        let dir = tempdir().unwrap();
        let err = write_fbin(dir.path().join("x.fbin"), 3, &[vec![1.0, 2.0]]).unwrap_err();
        assert!(matches!(err, DatasetError::VectorLength { index: 0, .. }));
    }
}
