use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

/// 指纹字符串格式错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFingerprintError {
    #[error("指纹长度必须为 64 位，实际为 {0} 位")]
    Length(usize),
    #[error("指纹包含非法字符 {0:?}")]
    Char(char),
}

/// 图片无法读取或解码
#[derive(Debug, Error)]
#[error("无法解码图片 {identifier}: {source}")]
pub struct DecodeError {
    pub identifier: String,
    #[source]
    pub source: Box<dyn StdError + Send + Sync>,
}

impl DecodeError {
    pub fn new(
        identifier: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self { identifier: identifier.into(), source: source.into() }
    }
}

/// 解码成功但无法生成指纹
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("图片尺寸为空 ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
}

/// 单张图片的指纹计算失败，两种情况的存储策略相同
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// 存储层错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库迁移失败: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("存储请求超时 ({0:?})")]
    Timeout(Duration),
    #[error("记录 {identifier} 的指纹已损坏: {source}")]
    Corrupt {
        identifier: String,
        #[source]
        source: ParseFingerprintError,
    },
    #[error("页码从 1 开始，收到 {0}")]
    InvalidPage(u64),
    #[error("存储不可用: {0}")]
    Unavailable(String),
}

/// 查询参数不合法
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("距离阈值必须在 0..=64 之间，收到 {0}")]
    Distance(i64),
    #[error("分页大小必须大于 0")]
    PageSize,
}

/// 导致整个搜索无法进行的错误
#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("无法统计记录数量: {0}")]
    Count(#[source] StoreError),
}
