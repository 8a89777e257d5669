use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{ArgGroup, Parser, ValueEnum};
use indicatif::ProgressBar;
use log::warn;
use tokio::task::block_in_place;

use crate::cli::{SubCommandExtend, cancel_on_ctrl_c};
use crate::config::{Opts, SearchOptions};
use crate::phash::Fingerprint;
use crate::search::{Match, Query, Searcher};
use crate::source::{FileDecoder, ImageDecoder};
use crate::store::SqliteStore;
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
#[command(group(ArgGroup::new("input").required(true).args(["fingerprint", "image"])))]
pub struct SearchCommand {
    #[command(flatten)]
    pub search: SearchOptions,
    /// 64 位二进制字符串形式的指纹
    pub fingerprint: Option<Fingerprint>,
    /// 被搜索的图片路径
    #[arg(short, long)]
    pub image: Option<PathBuf>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SearchCommand {
    fn fingerprint(&self) -> Result<Fingerprint> {
        match (&self.fingerprint, &self.image) {
            (Some(fingerprint), _) => Ok(*fingerprint),
            (None, Some(image)) => {
                let identifier = image.to_string_lossy();
                Ok(block_in_place(|| FileDecoder.fingerprint(&identifier))?)
            }
            (None, None) => bail!("需要指定指纹或图片"),
        }
    }
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let fingerprint = self.fingerprint()?;
        let query =
            Query::new(fingerprint, self.search.distance as i64, self.search.page_size)?;

        tokio::fs::create_dir_all(opts.conf_dir.path()).await?;
        let store = Arc::new(SqliteStore::open(opts.conf_dir.database()).await?);

        let pb = ProgressBar::new(0).with_style(pb_style());
        let searcher = Searcher::new(store.clone())
            .timeout(Duration::from_secs(self.search.timeout))
            .cancel_token(cancel_on_ctrl_c())
            .progress(pb.clone());
        let report = searcher.search_concurrent(&query, self.search.concurrency).await?;
        store.close().await;
        pb.finish_and_clear();

        let mut matches = report.matches.as_slice();
        if let Some(count) = self.search.count {
            matches = &matches[..count.min(matches.len())];
        }
        print_result(matches, self.output_format)?;

        if report.cancelled {
            warn!("搜索已取消，仅扫描了 {}/{} 页", report.pages_scanned, report.page_count);
        }
        if let Some(failure) = report.failure {
            bail!("读取第 {} 页失败: {}", failure.page, failure.error);
        }
        Ok(())
    }
}

fn print_result(result: &[Match], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for m in result {
                println!("{}\t{}\t{}", m.distance, m.fingerprint, m.identifier);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
