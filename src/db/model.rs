use serde::Serialize;

use crate::error::StoreError;
use crate::phash::Fingerprint;

/// 图片记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    /// 图片标识，通常为文件路径
    pub identifier: String,
    /// 图片指纹，为空表示无法计算指纹
    pub fingerprint: Option<Fingerprint>,
}

impl Record {
    pub fn new(identifier: impl Into<String>, fingerprint: Option<Fingerprint>) -> Self {
        Self { identifier: identifier.into(), fingerprint }
    }
}

/// 数据库中的一行：`(path, fingerprint)`
pub type RecordRow = (String, Option<String>);

impl TryFrom<RecordRow> for Record {
    type Error = StoreError;

    fn try_from((path, fingerprint): RecordRow) -> Result<Self, Self::Error> {
        // 空字符串同样视为缺失
        let fingerprint = match fingerprint.as_deref() {
            None | Some("") => None,
            Some(s) => Some(
                s.parse()
                    .map_err(|source| StoreError::Corrupt { identifier: path.clone(), source })?,
            ),
        };
        Ok(Self { identifier: path, fingerprint })
    }
}
