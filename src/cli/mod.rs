mod add;
mod hash;
mod search;

pub use add::*;
pub use hash::*;
pub use search::*;

use log::warn;
use tokio_util::sync::CancellationToken;

use crate::config::{Opts, SubCommand};

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

impl SubCommandExtend for SubCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        match self {
            SubCommand::Add(cmd) => cmd.run(opts).await,
            SubCommand::Search(cmd) => cmd.run(opts).await,
            SubCommand::Hash(cmd) => cmd.run(opts).await,
        }
    }
}

/// 收到 Ctrl-C 时取消返回的 token
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("收到中断信号，正在停止");
                cancel.cancel();
            }
        }
    });
    cancel
}
