use clap::Parser;
use clap::Subcommand;
use windrose::cmd::build::BuildArgs;
use windrose::cmd::gen_gt::GenGtArgs;
use windrose::cmd::search::SearchArgs;

#[derive(Subcommand)]
enum Commands {
  /// Build an index from base vectors and attributes.
  Build(BuildArgs),
  /// Sweep search beam widths against a ground-truth file and report recall.
  Search(SearchArgs),
  /// Generate exact filtered ground truth by brute force.
  GenGt(GenGtArgs),
}

#[derive(Parser)]
#[command(version, about)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

fn main() {
  tracing_subscriber::fmt::init();

  let cli = Cli::parse();
  let result = match cli.command {
    Commands::Build(args) => args.exec(),
    Commands::Search(args) => args.exec(),
    Commands::GenGt(args) => args.exec(),
  };
  if let Err(err) = result {
    tracing::error!(%err, "command failed");
    std::process::exit(1);
  }
}
