use std::path::Path;

use image::GrayImage;
use indicatif::{ProgressBar, ProgressIterator};
use log::info;
use regex::Regex;
use walkdir::WalkDir;

use crate::error::{DecodeError, FingerprintError};
use crate::phash::{Fingerprint, phash};
use crate::utils::{imread, pb_style};

/// 根据标识读取灰度图
pub trait ImageDecoder: Send + Sync + 'static {
    fn decode(&self, identifier: &str) -> Result<GrayImage, DecodeError>;

    /// 解码并计算指纹
    fn fingerprint(&self, identifier: &str) -> Result<Fingerprint, FingerprintError> {
        let image = self.decode(identifier)?;
        Ok(phash(&image)?)
    }
}

/// 将标识视为文件路径，从磁盘读取图片
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDecoder;

impl ImageDecoder for FileDecoder {
    fn decode(&self, identifier: &str) -> Result<GrayImage, DecodeError> {
        imread(identifier).map_err(|e| DecodeError::new(identifier, e))
    }
}

/// 递归扫描目录，返回后缀名匹配 `regex_suf` 的文件路径
pub fn scan_images(path: impl AsRef<Path>, regex_suf: &Regex) -> Vec<String> {
    let path = path.as_ref();
    info!("开始扫描目录: {}", path.display());
    let pb = ProgressBar::no_length().with_style(pb_style());
    let entries = WalkDir::new(path)
        .into_iter()
        .progress_with(pb)
        .filter_map(|entry| {
            entry.ok().and_then(|entry| {
                let path = entry.path();
                if entry.file_type().is_file() {
                    if let Some(ext) = path.extension() {
                        if regex_suf.is_match(&ext.to_string_lossy()) {
                            return Some(path.to_string_lossy().to_string());
                        }
                    }
                }
                None
            })
        })
        .collect::<Vec<_>>();
    info!("扫描完成，共 {} 张图片", entries.len());
    entries
}
