use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use indicatif::ProgressBar;
use log::{error, info, warn};
use tokio::task::block_in_place;

use crate::cli::{SubCommandExtend, cancel_on_ctrl_c};
use crate::config::{IngestOptions, Opts};
use crate::ingest::{IngestConfig, Ingestor};
use crate::source::{FileDecoder, scan_images};
use crate::store::SqliteStore;
use crate::utils::{pb_style, suffix_regex};

#[derive(Parser, Debug, Clone)]
pub struct AddCommand {
    #[command(flatten)]
    pub ingest: IngestOptions,
    /// 图片所在目录
    pub path: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png")]
    pub suffix: String,
}

impl SubCommandExtend for AddCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let re_suf = suffix_regex(&self.suffix).context("无效的后缀名")?;
        let images = block_in_place(|| scan_images(&self.path, &re_suf));

        tokio::fs::create_dir_all(opts.conf_dir.path()).await?;
        let store = Arc::new(SqliteStore::open(opts.conf_dir.database()).await?);

        let pb = ProgressBar::new(images.len() as u64).with_style(pb_style());
        let config = IngestConfig::from(&self.ingest);
        info!("batch_size: {}, workers: {}", config.batch_size, config.max_workers);

        let ingestor = Ingestor::new(Arc::new(FileDecoder), store.clone(), config)
            .cancel_token(cancel_on_ctrl_c())
            .progress(pb.clone());
        let summary = ingestor.ingest(futures::stream::iter(images)).await;
        store.close().await;

        pb.finish_with_message("图片添加完成");

        if summary.encode_failure_count() > 0 {
            warn!("{} 张图片无法计算指纹", summary.encode_failure_count());
        }
        for failure in &summary.failed_batches {
            match failure.batch {
                Some(batch) => error!(
                    "批次 {} 写入失败 ({} 张图片需要重新添加): {}",
                    batch,
                    failure.identifiers.len(),
                    failure.error
                ),
                None => error!("worker 异常退出: {}", failure.error),
            }
        }
        if summary.cancelled {
            bail!("添加已取消，{} 张图片未处理", summary.skipped);
        }
        if summary.batches_failed > 0 {
            bail!("{} 个批次写入失败", summary.batches_failed);
        }
        Ok(())
    }
}
