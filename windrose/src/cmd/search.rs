use crate::bench;
use clap::Args;
use libwindrose::Filter;
use libwindrose::Label;
use libwindrose::Result;
use libwindrose::SpaceKind;
use libwindrose::Windrose;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

const EFS_SWEEP: &[usize] = &[
  1700, 1400, 1100, 1000, 900, 800, 700, 600, 500, 400, 300, 250, 200, 180, 160, 140, 120, 100,
  90, 80, 70, 60, 55, 50, 45, 40, 35, 30, 25, 20, 15, 10,
];

#[derive(Args)]
pub struct SearchArgs {
  /// Query vectors in fvecs format.
  #[arg(long)]
  query_vec: PathBuf,

  /// Per-query `[l, u]` filters as raw i32 pairs.
  #[arg(long)]
  query_rng: PathBuf,

  /// Ground-truth file produced by `gen-gt`.
  #[arg(long)]
  gt_file: PathBuf,

  /// Neighbors to report per query.
  #[arg(long)]
  k: usize,

  /// Index produced by `build`.
  #[arg(long)]
  index_location: PathBuf,

  /// Distance space, "l2" or "ip"; must match the build.
  #[arg(long, value_parser = SpaceKind::parse)]
  space: SpaceKind,
}

impl SearchArgs {
  pub fn exec(self) -> Result<()> {
    let (dim, queries) = bench::read_fvecs(&self.query_vec)?;
    let nq = queries.len() / dim;
    let filters = bench::read_ranges(&self.query_rng)?;
    let ground_truth = bench::read_ground_truth(&self.gt_file)?;
    info!(nq, dim, "loaded queries, filters and ground truth");

    let index = Windrose::<i32>::open_from_path(&self.index_location, self.space)?;
    let nq = nq.min(filters.len()).min(ground_truth.len());
    if nq == 0 {
      info!("nothing to query");
      return Ok(());
    }

    // efs,recall,qps,dist_comps/query,hops/query
    for &efs in EFS_SWEEP {
      let dist_base = index.metric_dist_comps();
      let hops_base = index.metric_hops();
      let mut results: Vec<Vec<Label>> = Vec::with_capacity(nq);
      let start = Instant::now();
      for i in 0..nq {
        let (l, u) = filters[i];
        let found = index.search(
          &queries[i * dim..(i + 1) * dim],
          efs,
          self.k,
          &Filter::range(l, u),
        )?;
        results.push(found.into_iter().map(|(_, label)| label).collect());
      }
      let elapsed = start.elapsed().as_secs_f32();
      let recall = bench::recall(&ground_truth[..nq], &results);
      let dist_per_query = (index.metric_dist_comps() - dist_base) / nq as u64;
      let hops_per_query = (index.metric_hops() - hops_base) / nq as u64;
      println!(
        "{efs},{recall},{:.1},{dist_per_query},{hops_per_query}",
        nq as f32 / elapsed
      );
    }
    Ok(())
  }
}
