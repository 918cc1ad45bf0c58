use crate::bench;
use crate::new_pb;
use clap::Args;
use libwindrose::Error;
use libwindrose::Result;
use libwindrose::Space;
use libwindrose::SpaceKind;
use ordered_float::OrderedFloat;
use rayon::iter::IntoParallelIterator;
use rayon::iter::ParallelIterator;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct GenGtArgs {
  /// Base vectors in fvecs format.
  #[arg(long)]
  basevec: PathBuf,

  /// Raw i32 attribute file, or "serial" for 0..n.
  #[arg(long, default_value = "serial")]
  baseatt: String,

  /// Query vectors in fvecs format.
  #[arg(long)]
  query_vec: PathBuf,

  /// Per-query `[l, u]` filters as raw i32 pairs.
  #[arg(long)]
  query_rng: PathBuf,

  /// Neighbors per query.
  #[arg(long)]
  k: usize,

  /// Distance space, "l2" or "ip".
  #[arg(long, value_parser = SpaceKind::parse)]
  space: SpaceKind,

  /// Output ground-truth file.
  #[arg(long)]
  out: PathBuf,
}

impl GenGtArgs {
  pub fn exec(self) -> Result<()> {
    let (dim, base) = bench::read_fvecs(&self.basevec)?;
    let nb = base.len() / dim;
    let (qdim, queries) = bench::read_fvecs(&self.query_vec)?;
    if qdim != dim {
      return Err(Error::DimensionMismatch {
        expected: dim,
        actual: qdim,
      });
    }
    let nq = queries.len() / dim;
    let filters = bench::read_ranges(&self.query_rng)?;
    if filters.len() < nq {
      return Err(Error::CorruptFile(format!(
        "{} filters for {nq} queries",
        filters.len()
      )));
    }

    let atts: Vec<i32> = if self.baseatt == "serial" {
      (0..nb as i32).collect()
    } else {
      bench::read_atts(PathBuf::from(&self.baseatt).as_path())?
    };
    if atts.len() != nb {
      return Err(Error::CorruptFile(format!(
        "attribute count {} does not match vector count {nb}",
        atts.len()
      )));
    }

    let space = Space::new(self.space, dim);
    info!(nb, nq, dim, k = self.k, "generating ground truth");
    let pb = new_pb(nq);

    let rows: Vec<Vec<u32>> = (0..nq)
      .into_par_iter()
      .map(|iq| {
        let q = &queries[iq * dim..(iq + 1) * dim];
        let (l, u) = filters[iq];
        let mut heap: BinaryHeap<(OrderedFloat<f32>, u32)> = BinaryHeap::new();
        for ib in 0..nb {
          if atts[ib] < l || atts[ib] > u {
            continue;
          }
          let d = space.distance(q, &base[ib * dim..(ib + 1) * dim]);
          heap.push((OrderedFloat(d), ib as u32));
          if heap.len() > self.k {
            heap.pop();
          }
        }
        let mut row: Vec<(f32, u32)> = heap.into_iter().map(|(d, id)| (d.0, id)).collect();
        row.sort_by(|a, b| a.0.total_cmp(&b.0));
        pb.inc(1);
        row.into_iter().map(|(_, id)| id).collect()
      })
      .collect();
    pb.finish();

    bench::write_ground_truth(&self.out, &rows)?;
    info!(path = %self.out.display(), "ground truth written");
    Ok(())
  }
}
