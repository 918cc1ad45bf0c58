use crate::bench;
use crate::new_pb;
use clap::Args;
use libwindrose::Error;
use libwindrose::Label;
use libwindrose::Result;
use libwindrose::SpaceKind;
use libwindrose::Windrose;
use rand::seq::SliceRandom;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::ParallelIterator;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

#[derive(Args)]
pub struct BuildArgs {
  /// Maximum out-degree per node per layer.
  #[arg(long)]
  m: usize,

  /// Beam width during construction.
  #[arg(long)]
  efc: usize,

  /// Base vectors in fvecs format.
  #[arg(long)]
  basevec: PathBuf,

  /// Raw i32 attribute file, or "serial" for 0..n.
  #[arg(long, default_value = "serial")]
  baseatt: String,

  /// Distance space, "l2" or "ip".
  #[arg(long, value_parser = SpaceKind::parse)]
  space: SpaceKind,

  /// Worker threads for the parallel build.
  #[arg(long, default_value_t = 8)]
  threads: usize,

  /// Output path for the saved index.
  #[arg(long)]
  index_location: PathBuf,

  /// Geometric growth factor between window sizes.
  #[arg(long, default_value_t = 4)]
  o: usize,

  /// Maximum layer index; 0 lets the index raise it to cover all items.
  #[arg(long, default_value_t = 0)]
  wp: usize,
}

impl BuildArgs {
  pub fn exec(self) -> Result<()> {
    let (dim, base) = bench::read_fvecs(&self.basevec)?;
    let n = base.len() / dim;
    info!(n, dim, "loaded base vectors");

    let atts: Vec<i32> = if self.baseatt == "serial" {
      (0..n as i32).collect()
    } else {
      bench::read_atts(PathBuf::from(&self.baseatt).as_path())?
    };
    if atts.len() != n {
      return Err(Error::CorruptFile(format!(
        "attribute count {} does not match vector count {n}",
        atts.len()
      )));
    }

    let index = Windrose::<i32>::open_fresh(
      n,
      dim,
      self.m,
      self.efc,
      self.space,
      self.o,
      self.wp,
      self.wp == 0,
    )?;

    let mut ids: Vec<usize> = (0..n).collect();
    ids.shuffle(&mut rand::thread_rng());

    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(self.threads)
      .build()
      .expect("thread pool construction");

    let pb = new_pb(n);
    let start = Instant::now();
    pool.install(|| {
      ids.par_iter().try_for_each(|&i| {
        index.insert(i as Label, &base[i * dim..(i + 1) * dim], atts[i], false)?;
        pb.inc(1);
        Ok::<(), Error>(())
      })
    })?;
    pb.finish();
    info!(
      elapsed_s = start.elapsed().as_secs_f64(),
      max_layer = index.max_layer(),
      "index built"
    );

    index.save(&self.index_location)?;
    info!(path = %self.index_location.display(), "index saved");
    Ok(())
  }
}
