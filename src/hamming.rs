use crate::phash::Fingerprint;

/// 计算两个 64 位指纹的汉明距离
#[inline(always)]
pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// 统计 `candidates` 中与 `query` 距离不超过 `max_distance` 的数量
pub fn count_within<'a, I>(query: &Fingerprint, candidates: I, max_distance: u32) -> usize
where
    I: IntoIterator<Item = &'a Fingerprint>,
{
    candidates.into_iter().filter(|fp| query.distance(fp) <= max_distance).count()
}
