pub mod bench;
pub mod cmd;

use indicatif::ProgressBar;
use indicatif::ProgressStyle;

pub fn new_pb(len: usize) -> ProgressBar {
  let pb = ProgressBar::new(len as u64);
  pb.set_style(
    ProgressStyle::with_template("{bar:40} {pos}/{len} [{elapsed_precise}<{eta_precise}]")
      .expect("static template"),
  );
  pb
}
