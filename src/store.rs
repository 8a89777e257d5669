//! 记录存储
//!
//! 流水线和搜索只依赖 [`RecordStore`]，默认实现为 SQLite。

use std::future::Future;
use std::path::Path;
use std::sync::RwLock;

use crate::db::{self, Database, Record, crud};
use crate::error::StoreError;

pub trait RecordStore: Send + Sync + 'static {
    /// 批量写入记录，返回写入数量
    fn insert_many(&self, records: &[Record])
    -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// 记录总数
    fn count_all(&self) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// 跳过 `skip` 条后最多返回 `limit` 条记录，多次调用之间的顺序保持稳定
    fn find_page(
        &self,
        skip: u64,
        limit: u64,
    ) -> impl Future<Output = Result<Vec<Record>, StoreError>> + Send;
}

pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    /// 打开数据库，不存在时自动创建
    pub async fn open(filename: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = db::init_db(filename).await?;
        Ok(Self { db })
    }

    pub async fn close(&self) {
        self.db.close().await
    }
}

impl RecordStore for SqliteStore {
    async fn insert_many(&self, records: &[Record]) -> Result<u64, StoreError> {
        Ok(crud::add_records(&self.db, records).await?)
    }

    async fn count_all(&self) -> Result<u64, StoreError> {
        Ok(crud::count_records(&self.db).await?)
    }

    async fn find_page(&self, skip: u64, limit: u64) -> Result<Vec<Record>, StoreError> {
        crud::get_records(&self.db, limit, skip)
            .await?
            .into_iter()
            .map(Record::try_from)
            .collect()
    }
}

/// 内存存储，按插入顺序保存记录
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<Record>) -> Self {
        Self { records: RwLock::new(records) }
    }

    /// 当前所有记录的拷贝
    pub fn records(&self) -> Result<Vec<Record>, StoreError> {
        Ok(self.records.read().map_err(poisoned)?.clone())
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("lock poisoned".to_owned())
}

impl RecordStore for MemoryStore {
    async fn insert_many(&self, records: &[Record]) -> Result<u64, StoreError> {
        self.records.write().map_err(poisoned)?.extend_from_slice(records);
        Ok(records.len() as u64)
    }

    async fn count_all(&self) -> Result<u64, StoreError> {
        Ok(self.records.read().map_err(poisoned)?.len() as u64)
    }

    async fn find_page(&self, skip: u64, limit: u64) -> Result<Vec<Record>, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.iter().skip(skip as usize).take(limit as usize).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phash::Fingerprint;

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(format!("{i}.jpg"), Some(Fingerprint::from_bits(i as u64))))
            .collect()
    }

    #[tokio::test]
    async fn test_memory_store_pages() {
        let store = MemoryStore::new();
        assert_eq!(store.insert_many(&records(25)).await.unwrap(), 25);
        assert_eq!(store.count_all().await.unwrap(), 25);

        let page = store.find_page(20, 10).await.unwrap();
        assert_eq!(page.len(), 5);
        assert_eq!(page[0].identifier, "20.jpg");
        assert!(store.find_page(30, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_keeps_order() {
        let store = MemoryStore::with_records(records(3));
        store.insert_many(&[Record::new("x.png", None)]).await.unwrap();
        let all = store.records().unwrap();
        let names: Vec<_> = all.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(names, ["0.jpg", "1.jpg", "2.jpg", "x.png"]);
        assert_eq!(all[3].fingerprint, None);
    }
}
