//! 基于 DCT 的 64 位感知哈希
//!
//! 流程：灰度图 → 线性插值缩放到 32x32 → 二维 DCT-II → 取左上角 8x8 低频块 →
//! 以去掉直流分量后的均值为阈值逐位量化。

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::error::{EncodeError, ParseFingerprintError};
use crate::hamming::hamming;

/// DCT 输入边长
pub const DCT_SIZE: usize = 32;
/// 低频系数块边长
pub const BLOCK_SIZE: usize = 8;
/// 指纹位数
pub const FINGERPRINT_BITS: usize = BLOCK_SIZE * BLOCK_SIZE;

/// 64 位图像指纹
///
/// 第一位（最高位）对应 (0, 0) 系数，按行优先排列到 (7, 7)。
/// 字符串形式为 64 个 `0`/`1` 字符，与数据库中存储的格式一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// 从原始位恢复指纹，最高位为第一位
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// 第 `i` 位（从 0 开始，行优先）
    pub fn bit(&self, i: usize) -> bool {
        assert!(i < FINGERPRINT_BITS, "bit index out of range");
        (self.0 >> (FINGERPRINT_BITS - 1 - i)) & 1 == 1
    }

    /// 与另一个指纹的汉明距离
    #[inline(always)]
    pub fn distance(&self, other: &Fingerprint) -> u32 {
        hamming(self.0, other.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:064b}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != FINGERPRINT_BITS {
            return Err(ParseFingerprintError::Length(s.chars().count()));
        }
        let mut bits = 0u64;
        for c in s.chars() {
            bits <<= 1;
            match c {
                '0' => {}
                '1' => bits |= 1,
                _ => return Err(ParseFingerprintError::Char(c)),
            }
        }
        Ok(Self(bits))
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = ParseFingerprintError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.to_string()
    }
}

/// 计算灰度图的感知哈希
///
/// 阈值判定使用 `>=`：系数恰好等于阈值时记为 1。纯色图片的交流系数严格为 0，
/// 阈值也严格为 0，因此总是得到全 1 的指纹。
pub fn phash(image: &GrayImage) -> Result<Fingerprint, EncodeError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(EncodeError::EmptyImage { width, height });
    }
    let grid = resize_linear(image.as_raw(), width as usize, height as usize);
    let coeffs = dct_2d(&grid);
    Ok(quantize(&coeffs))
}

type Grid = [f32; DCT_SIZE * DCT_SIZE];

/// 双线性缩放到 32x32，结果四舍五入回 8 位灰度
///
/// 采样点映射与 OpenCV `INTER_LINEAR` 相同：`src = (dst + 0.5) * scale - 0.5`，越界时贴边。
fn resize_linear(src: &[u8], width: usize, height: usize) -> Grid {
    let xs = axis_taps(width);
    let ys = axis_taps(height);
    let mut grid = [0f32; DCT_SIZE * DCT_SIZE];
    for (dy, &(y0, y1, fy)) in ys.iter().enumerate() {
        let row0 = &src[y0 * width..(y0 + 1) * width];
        let row1 = &src[y1 * width..(y1 + 1) * width];
        for (dx, &(x0, x1, fx)) in xs.iter().enumerate() {
            let top = row0[x0] as f32 * (1. - fx) + row0[x1] as f32 * fx;
            let bottom = row1[x0] as f32 * (1. - fx) + row1[x1] as f32 * fx;
            let value = top * (1. - fy) + bottom * fy;
            grid[dy * DCT_SIZE + dx] = value.round().clamp(0., 255.);
        }
    }
    grid
}

/// 每个目标坐标对应的两个源坐标及插值权重
fn axis_taps(len: usize) -> [(usize, usize, f32); DCT_SIZE] {
    let scale = len as f32 / DCT_SIZE as f32;
    std::array::from_fn(|d| {
        let f = (d as f32 + 0.5) * scale - 0.5;
        let i = f.floor();
        if i < 0. {
            (0, 0, 0.)
        } else if i as usize >= len - 1 {
            (len - 1, len - 1, 0.)
        } else {
            (i as usize, i as usize + 1, f - i)
        }
    })
}

/// 正交归一化的二维 DCT-II，先行后列
fn dct_2d(grid: &Grid) -> Grid {
    let mut tmp = [0f64; DCT_SIZE * DCT_SIZE];
    let mut line = [0f64; DCT_SIZE];
    let mut out = [0f64; DCT_SIZE];

    for r in 0..DCT_SIZE {
        for c in 0..DCT_SIZE {
            line[c] = grid[r * DCT_SIZE + c] as f64;
        }
        dct_ortho(&line, &mut out);
        tmp[r * DCT_SIZE..(r + 1) * DCT_SIZE].copy_from_slice(&out);
    }

    let mut coeffs = [0f32; DCT_SIZE * DCT_SIZE];
    for c in 0..DCT_SIZE {
        for r in 0..DCT_SIZE {
            line[r] = tmp[r * DCT_SIZE + c];
        }
        dct_ortho(&line, &mut out);
        for r in 0..DCT_SIZE {
            coeffs[r * DCT_SIZE + c] = out[r] as f32;
        }
    }
    coeffs
}

fn dct_ortho(input: &[f64], output: &mut [f64]) {
    let n = input.len();
    dct_unscaled(input, output);
    output[0] *= (1. / n as f64).sqrt();
    let scale = (2. / n as f64).sqrt();
    for v in &mut output[1..] {
        *v *= scale;
    }
}

/// 未归一化的 DCT-II：`X[k] = Σ x[n]·cos(π(2n+1)k / 2N)`，N 必须是 2 的幂
///
/// 偶数项递归到对称和的 N/2 点变换，奇数项只依赖对称差。
/// 常数输入的对称差严格为 0，所以交流分量严格为 0。
fn dct_unscaled(input: &[f64], output: &mut [f64]) {
    let n = input.len();
    debug_assert!(n.is_power_of_two());
    if n == 1 {
        output[0] = input[0];
        return;
    }

    let half = n / 2;
    let mut sum = vec![0.; half];
    let mut diff = vec![0.; half];
    for i in 0..half {
        sum[i] = input[i] + input[n - 1 - i];
        diff[i] = input[i] - input[n - 1 - i];
    }

    let mut even = vec![0.; half];
    dct_unscaled(&sum, &mut even);
    for (k, v) in even.into_iter().enumerate() {
        output[2 * k] = v;
    }

    for k in (1..n).step_by(2) {
        output[k] = diff
            .iter()
            .enumerate()
            .map(|(i, d)| d * (PI * (2 * i + 1) as f64 * k as f64 / (2 * n) as f64).cos())
            .sum();
    }
}

/// 以 `(mean * 64 - dc) / 64` 为阈值量化左上角 8x8 低频块
fn quantize(coeffs: &Grid) -> Fingerprint {
    let block = |r: usize, c: usize| coeffs[r * DCT_SIZE + c];

    let mut sum = 0f64;
    for r in 0..BLOCK_SIZE {
        for c in 0..BLOCK_SIZE {
            sum += block(r, c) as f64;
        }
    }
    let n = FINGERPRINT_BITS as f32;
    let mean = (sum / FINGERPRINT_BITS as f64) as f32;
    let threshold = (mean * n - block(0, 0)) / n;

    let mut bits = 0u64;
    for r in 0..BLOCK_SIZE {
        for c in 0..BLOCK_SIZE {
            bits <<= 1;
            if block(r, c) >= threshold {
                bits |= 1;
            }
        }
    }
    Fingerprint(bits)
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;

    fn gradient(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x * 7 + y * 3) % 256) as u8]))
    }

    fn naive_dct(input: &[f64]) -> Vec<f64> {
        let n = input.len();
        (0..n)
            .map(|k| {
                input
                    .iter()
                    .enumerate()
                    .map(|(i, x)| x * (PI * (2 * i + 1) as f64 * k as f64 / (2 * n) as f64).cos())
                    .sum()
            })
            .collect()
    }

    #[test]
    fn test_flat_image_all_ones() {
        let image = GrayImage::from_pixel(64, 64, Luma([128]));
        let fp = phash(&image).unwrap();
        assert_eq!(fp.bits(), u64::MAX);
        assert_eq!(fp.to_string(), "1".repeat(64));
    }

    #[test]
    fn test_black_image_all_ones() {
        let image = GrayImage::new(17, 40);
        assert_eq!(phash(&image).unwrap().bits(), u64::MAX);
    }

    #[test]
    fn test_deterministic() {
        let image = gradient(123, 77);
        let a = phash(&image).unwrap();
        let b = phash(&image).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_step_edge_not_flat() {
        let image = GrayImage::from_fn(200, 150, |x, _| Luma([if x < 100 { 0 } else { 255 }]));
        let fp = phash(&image).unwrap();
        assert_ne!(fp.bits(), u64::MAX);
        assert_ne!(fp.bits(), 0);
        // 直流分量远大于阈值
        assert!(fp.bit(0));
    }

    #[test]
    fn test_empty_image() {
        let image = GrayImage::new(0, 10);
        assert!(matches!(phash(&image), Err(EncodeError::EmptyImage { width: 0, height: 10 })));
    }

    #[test]
    fn test_tiny_image() {
        let image = GrayImage::from_pixel(1, 1, Luma([42]));
        assert_eq!(phash(&image).unwrap().bits(), u64::MAX);
    }

    #[test]
    fn test_resize_identity() {
        let image = gradient(32, 32);
        let grid = resize_linear(image.as_raw(), 32, 32);
        for (a, b) in grid.iter().zip(image.as_raw()) {
            assert_eq!(*a, *b as f32);
        }
    }

    #[test]
    fn test_resize_downscale_averages_pairs() {
        // 64 -> 32 时每个目标点恰好落在两个源点中间
        let image = GrayImage::from_fn(64, 64, |x, _| Luma([if x % 2 == 0 { 10 } else { 20 }]));
        let grid = resize_linear(image.as_raw(), 64, 64);
        assert!(grid.iter().all(|&v| v == 15.));
    }

    #[test]
    fn test_dct_matches_naive() {
        let input: Vec<f64> = (0..32).map(|i| ((i * 37) % 11) as f64 - 3.5).collect();
        let mut fast = vec![0.; 32];
        dct_unscaled(&input, &mut fast);
        for (a, b) in fast.iter().zip(naive_dct(&input)) {
            assert!((a - b).abs() < 1e-9, "{a} != {b}");
        }
    }

    #[test]
    fn test_dct_constant_is_exact() {
        let input = [3.; 32];
        let mut out = [0.; 32];
        dct_ortho(&input, &mut out);
        assert!((out[0] - 3. * 32f64.sqrt()).abs() < 1e-12);
        assert!(out[1..].iter().all(|&v| v == 0.));
    }

    #[test]
    fn test_quantize_row_major() {
        // 交流系数之和为 0，阈值为 0，只有 (1, 0) 和 (2, 5) 低于阈值
        let mut coeffs = [0f32; DCT_SIZE * DCT_SIZE];
        coeffs[1] = 5.;
        coeffs[DCT_SIZE] = -3.;
        coeffs[2 * DCT_SIZE + 5] = -2.;
        // 8x8 块之外的系数不参与计算
        coeffs[9 * DCT_SIZE + 9] = -100.;

        let fp = quantize(&coeffs);
        let expected = "11111111\
                        01111111\
                        11111011\
                        11111111\
                        11111111\
                        11111111\
                        11111111\
                        11111111";
        assert_eq!(fp.to_string(), expected);
        assert!(!fp.bit(8));
        assert!(!fp.bit(2 * BLOCK_SIZE + 5));
        assert!(fp.bit(5 * BLOCK_SIZE + 2));
    }

    #[test]
    fn test_quantize_threshold_excludes_dc() {
        // dc 很大但不影响阈值：(sum - dc) / 64 = (1 + 2) / 64
        let mut coeffs = [0f32; DCT_SIZE * DCT_SIZE];
        coeffs[0] = 1000.;
        coeffs[3] = 1.;
        coeffs[DCT_SIZE + 7] = 2.;

        let fp = quantize(&coeffs);
        let expected = (1u64 << 63) | (1 << (63 - 3)) | (1 << (63 - 15));
        assert_eq!(fp.bits(), expected);
    }

    #[test]
    fn test_parse_roundtrip() {
        let s = "1111111100000000100000001001111101001111101000000011001001011110";
        let fp: Fingerprint = s.parse().unwrap();
        assert_eq!(fp.to_string(), s);
        assert!(fp.bit(0));
        assert!(!fp.bit(8));
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!("0101".parse::<Fingerprint>(), Err(ParseFingerprintError::Length(4)));
        let bad = format!("{}2", "0".repeat(63));
        assert_eq!(bad.parse::<Fingerprint>(), Err(ParseFingerprintError::Char('2')));
        assert!("".parse::<Fingerprint>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let fp = Fingerprint::from_bits(0b1011);
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}1011\"", "0".repeat(60)));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }
}
