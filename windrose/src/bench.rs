//! Benchmark file formats: fvecs vector matrices, raw attribute vectors,
//! per-query range filters, and ground-truth neighbor lists.

use libwindrose::Error;
use libwindrose::Label;
use libwindrose::Result;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Reads an fvecs file: per row, a little-endian i32 dimension followed by
/// that many f32s. Returns the dimension and the row-major matrix.
pub fn read_fvecs(path: &Path) -> Result<(usize, Vec<f32>)> {
  let raw = fs::read(path)?;
  if raw.len() < 4 {
    return Err(Error::CorruptFile(format!(
      "{}: too short for an fvecs header",
      path.display()
    )));
  }
  let dim = i32::from_le_bytes(raw[..4].try_into().expect("4 bytes checked")) as usize;
  if dim == 0 {
    return Err(Error::CorruptFile(format!(
      "{}: zero dimension",
      path.display()
    )));
  }
  let row_bytes = 4 + dim * 4;
  if raw.len() % row_bytes != 0 {
    return Err(Error::CorruptFile(format!(
      "{}: size is not a whole number of rows",
      path.display()
    )));
  }
  let n = raw.len() / row_bytes;
  let mut data = Vec::with_capacity(n * dim);
  for row in raw.chunks_exact(row_bytes) {
    let row_dim = i32::from_le_bytes(row[..4].try_into().expect("4 bytes checked")) as usize;
    if row_dim != dim {
      return Err(Error::CorruptFile(format!(
        "{}: inconsistent row dimension {row_dim}",
        path.display()
      )));
    }
    for chunk in row[4..].chunks_exact(4) {
      data.push(f32::from_le_bytes(chunk.try_into().expect("4 bytes checked")));
    }
  }
  Ok((dim, data))
}

/// Reads a raw little-endian i32 attribute vector.
pub fn read_atts(path: &Path) -> Result<Vec<i32>> {
  let raw = fs::read(path)?;
  if raw.len() % 4 != 0 {
    return Err(Error::CorruptFile(format!(
      "{}: size is not a whole number of attributes",
      path.display()
    )));
  }
  Ok(
    raw
      .chunks_exact(4)
      .map(|c| i32::from_le_bytes(c.try_into().expect("4 bytes checked")))
      .collect(),
  )
}

/// Reads per-query `[l, u]` range filters stored as consecutive i32 pairs.
pub fn read_ranges(path: &Path) -> Result<Vec<(i32, i32)>> {
  let raw = fs::read(path)?;
  if raw.len() % 8 != 0 {
    return Err(Error::CorruptFile(format!(
      "{}: size is not a whole number of ranges",
      path.display()
    )));
  }
  Ok(
    raw
      .chunks_exact(8)
      .map(|c| {
        (
          i32::from_le_bytes(c[..4].try_into().expect("4 bytes checked")),
          i32::from_le_bytes(c[4..].try_into().expect("4 bytes checked")),
        )
      })
      .collect(),
  )
}

/// Reads a ground-truth file: per query, an i32 count followed by that many
/// u32 labels.
pub fn read_ground_truth(path: &Path) -> Result<Vec<Vec<Label>>> {
  let raw = fs::read(path)?;
  let mut rest = raw.as_slice();
  let mut out = Vec::new();
  while !rest.is_empty() {
    if rest.len() < 4 {
      return Err(Error::CorruptFile(format!(
        "{}: dangling ground-truth header",
        path.display()
      )));
    }
    let k = i32::from_le_bytes(rest[..4].try_into().expect("4 bytes checked")) as usize;
    rest = &rest[4..];
    if rest.len() < k * 4 {
      return Err(Error::CorruptFile(format!(
        "{}: truncated ground-truth row",
        path.display()
      )));
    }
    let row = rest[..k * 4]
      .chunks_exact(4)
      .map(|c| u32::from_le_bytes(c.try_into().expect("4 bytes checked")) as Label)
      .collect();
    rest = &rest[k * 4..];
    out.push(row);
  }
  Ok(out)
}

pub fn write_ground_truth(path: &Path, rows: &[Vec<u32>]) -> Result<()> {
  let mut file = fs::File::create(path)?;
  for row in rows {
    file.write_all(&(row.len() as i32).to_le_bytes())?;
    file.write_all(bytemuck::cast_slice(row))?;
  }
  Ok(())
}

/// Fraction of ground-truth labels recovered across all queries.
pub fn recall(ground_truth: &[Vec<Label>], results: &[Vec<Label>]) -> f32 {
  let n = ground_truth.len().min(results.len());
  let mut total = 0usize;
  let mut correct = 0usize;
  for i in 0..n {
    total += ground_truth[i].len();
    for label in &results[i] {
      if ground_truth[i].contains(label) {
        correct += 1;
      }
    }
  }
  if total == 0 {
    return 0.0;
  }
  correct as f32 / total as f32
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ground_truth_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gt.bin");
    let rows = vec![vec![1u32, 2, 3], vec![], vec![7u32]];
    write_ground_truth(&path, &rows).unwrap();
    let back = read_ground_truth(&path).unwrap();
    assert_eq!(back, vec![vec![1u64, 2, 3], vec![], vec![7u64]]);
  }

  #[test]
  fn fvecs_rejects_inconsistent_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vecs.fvecs");
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&2i32.to_le_bytes());
    bytes.extend_from_slice(&1.0f32.to_le_bytes());
    bytes.extend_from_slice(&2.0f32.to_le_bytes());
    bytes.extend_from_slice(&3i32.to_le_bytes());
    bytes.extend_from_slice(&1.0f32.to_le_bytes());
    bytes.extend_from_slice(&2.0f32.to_le_bytes());
    std::fs::write(&path, &bytes).unwrap();
    assert!(read_fvecs(&path).is_err());
  }

  #[test]
  fn fvecs_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vecs.fvecs");
    let mut bytes = Vec::new();
    for row in [[1.0f32, -2.0], [0.5, 0.25]] {
      bytes.extend_from_slice(&2i32.to_le_bytes());
      for v in row {
        bytes.extend_from_slice(&v.to_le_bytes());
      }
    }
    std::fs::write(&path, &bytes).unwrap();
    let (dim, data) = read_fvecs(&path).unwrap();
    assert_eq!(dim, 2);
    assert_eq!(data, vec![1.0, -2.0, 0.5, 0.25]);
  }

  #[test]
  fn recall_counts_matches() {
    let gt = vec![vec![1u64, 2], vec![3u64, 4]];
    let res = vec![vec![2u64, 9], vec![3u64, 4]];
    assert_eq!(recall(&gt, &res), 0.75);
  }
}
