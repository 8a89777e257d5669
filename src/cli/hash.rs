use std::path::PathBuf;

use anyhow::bail;
use clap::Parser;
use indicatif::{ParallelProgressIterator, ProgressBar};
use log::error;
use rayon::prelude::*;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::source::{FileDecoder, ImageDecoder};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct HashCommand {
    /// 图片路径
    #[arg(required = true)]
    pub images: Vec<PathBuf>,
}

impl SubCommandExtend for HashCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let pb = ProgressBar::new(self.images.len() as u64).with_style(pb_style());
        let results = block_in_place(|| {
            self.images
                .par_iter()
                .progress_with(pb.clone())
                .map(|path| FileDecoder.fingerprint(&path.to_string_lossy()))
                .collect::<Vec<_>>()
        });
        pb.finish_and_clear();

        let mut failed = 0;
        for (path, result) in self.images.iter().zip(results) {
            match result {
                Ok(fingerprint) => println!("{}\t{}", fingerprint, path.display()),
                Err(e) => {
                    error!("{}", e);
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            bail!("{} 张图片无法计算指纹", failed);
        }
        Ok(())
    }
}
