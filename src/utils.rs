use std::path::Path;

use image::{GrayImage, ImageReader, ImageResult};
use indicatif::ProgressStyle;
use regex::Regex;

/// 读取图片并转换为 8 位灰度
pub fn imread(path: impl AsRef<Path>) -> ImageResult<GrayImage> {
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(image.into_luma8())
}

/// 将逗号分隔的后缀名列表转换为不区分大小写的正则
pub fn suffix_regex(suffix: &str) -> Result<Regex, regex::Error> {
    let alternatives = suffix
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| regex::escape(s.trim_start_matches('.')))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i)^({})$", alternatives))
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .expect("invalid progress template")
        .progress_chars("#>-")
}
