use clap::Parser;

use phsearch::Opts;
use phsearch::cli::SubCommandExtend;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();
    opts.subcmd.run(&opts).await
}
