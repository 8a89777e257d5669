use std::convert::Infallible;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;
use crate::ingest::{FailurePolicy, IngestConfig};

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let path = ProjectDirs::from("", "phsearch", "phsearch")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".phsearch"));
    ConfDir { path }
});

fn default_config_dir() -> &'static OsStr {
    CONF_DIR.path().as_os_str()
}

#[derive(Parser, Debug, Clone)]
pub struct IngestOptions {
    /// 每个批次的图片数量
    #[arg(long, value_name = "N", default_value_t = 10000, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub batch_size: usize,
    /// 同时运行的 worker 数量，默认为 CPU 核心数
    #[arg(short, long, value_name = "N", value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub workers: Option<usize>,
    /// 不记录无法计算指纹的图片
    #[arg(long)]
    pub skip_failed: bool,
    /// 单次批量写入的超时时间（秒）
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub timeout: u64,
}

impl From<&IngestOptions> for IngestConfig {
    fn from(opts: &IngestOptions) -> Self {
        Self {
            batch_size: opts.batch_size,
            max_workers: opts.workers.unwrap_or_else(num_cpus::get),
            failure_policy: if opts.skip_failed { FailurePolicy::Skip } else { FailurePolicy::Store },
            store_timeout: Duration::from_secs(opts.timeout),
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 两张相似图片指纹的最大汉明距离，范围从 0 到 64
    #[arg(short, long, value_name = "N", default_value_t = 7, value_parser = clap::value_parser!(u32).range(0..=64))]
    pub distance: u32,
    /// 每页读取的记录数量
    #[arg(long, value_name = "N", default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub page_size: u64,
    /// 单次读取的超时时间（秒）
    #[arg(long, value_name = "SECS", default_value_t = 12)]
    pub timeout: u64,
    /// 同时读取的页数
    #[arg(long, value_name = "N", default_value_t = 1, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub concurrency: usize,
    /// 显示的结果数量，不指定时显示全部
    #[arg(long, value_name = "COUNT")]
    pub count: Option<usize>,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "phsearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// phsearch 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 计算目录中图片的指纹并添加到数据库
    Add(AddCommand),
    /// 从数据库中搜索相似图片
    Search(SearchCommand),
    /// 计算图片指纹并输出
    Hash(HashCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("phsearch.db")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}
