//! 分页扫描的相似图片搜索

use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{StreamExt, stream};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::db::Record;
use crate::error::{QueryError, SearchError, StoreError};
use crate::phash::{FINGERPRINT_BITS, Fingerprint};
use crate::store::RecordStore;

/// 一次搜索请求
#[derive(Debug, Clone, Copy)]
pub struct Query {
    pub fingerprint: Fingerprint,
    pub max_distance: u32,
    pub page_size: u64,
}

impl Query {
    /// 距离阈值必须在 `0..=64` 之间，分页大小必须大于 0
    pub fn new(
        fingerprint: Fingerprint,
        max_distance: i64,
        page_size: u64,
    ) -> Result<Self, QueryError> {
        if !(0..=FINGERPRINT_BITS as i64).contains(&max_distance) {
            return Err(QueryError::Distance(max_distance));
        }
        if page_size == 0 {
            return Err(QueryError::PageSize);
        }
        Ok(Self { fingerprint, max_distance: max_distance as u32, page_size })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Match {
    pub identifier: String,
    pub fingerprint: Fingerprint,
    pub distance: u32,
}

/// 读取失败的页面，搜索会在此处中止
#[derive(Debug, Serialize)]
pub struct PageFailure {
    pub page: u64,
    #[serde(serialize_with = "serialize_error")]
    pub error: StoreError,
}

fn serialize_error<S: serde::Serializer>(err: &StoreError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(err)
}

#[derive(Debug, Serialize)]
pub struct SearchReport {
    /// 按距离升序排列，距离相同时保持扫描顺序
    pub matches: Vec<Match>,
    pub total_records: u64,
    pub page_count: u64,
    pub pages_scanned: u64,
    pub records_scanned: u64,
    pub failure: Option<PageFailure>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl SearchReport {
    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    /// 所有页面都已扫描
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && !self.cancelled && self.pages_scanned == self.page_count
    }
}

/// 对一组记录做暴力扫描，跳过没有指纹的记录
pub fn scan<I>(records: I, query: &Fingerprint, max_distance: u32) -> Vec<Match>
where
    I: IntoIterator<Item = Record>,
{
    records
        .into_iter()
        .filter_map(|record| {
            let fingerprint = record.fingerprint?;
            let distance = fingerprint.distance(query);
            (distance <= max_distance).then(|| Match {
                identifier: record.identifier,
                fingerprint,
                distance,
            })
        })
        .collect()
}

/// 按页读取存储，每次请求都带有超时
pub struct Paginator<'a, S> {
    store: &'a S,
    page_size: u64,
    timeout: Duration,
}

impl<'a, S: RecordStore> Paginator<'a, S> {
    pub fn new(store: &'a S, page_size: u64, timeout: Duration) -> Self {
        Self { store, page_size: page_size.max(1), timeout }
    }

    /// `total` 条记录需要的页数
    pub fn page_count(&self, total: u64) -> u64 {
        total.div_ceil(self.page_size)
    }

    /// 读取第 `page` 页，页码从 1 开始
    pub async fn page(&self, page: u64) -> Result<Vec<Record>, StoreError> {
        if page == 0 {
            return Err(StoreError::InvalidPage(page));
        }
        let skip = (page - 1) * self.page_size;
        match timeout(self.timeout, self.store.find_page(skip, self.page_size)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

pub struct Searcher<S> {
    store: Arc<S>,
    timeout: Duration,
    cancel: CancellationToken,
    pb: ProgressBar,
}

impl<S: RecordStore> Searcher<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            timeout: Duration::from_secs(12),
            cancel: CancellationToken::new(),
            pb: ProgressBar::hidden(),
        }
    }

    /// 单次存储请求的超时时间
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn progress(mut self, pb: ProgressBar) -> Self {
        self.pb = pb;
        self
    }

    /// 逐页扫描所有记录
    pub async fn search(&self, query: &Query) -> Result<SearchReport, SearchError> {
        self.search_concurrent(query, 1).await
    }

    /// 最多同时读取 `concurrency` 页，结果仍按页码顺序在当前任务中汇总
    ///
    /// 任何一页读取失败都会中止搜索，已扫描的结果和失败信息一起返回。
    pub async fn search_concurrent(
        &self,
        query: &Query,
        concurrency: usize,
    ) -> Result<SearchReport, SearchError> {
        let start = Instant::now();
        let total_records = match timeout(self.timeout, self.store.count_all()).await {
            Ok(result) => result.map_err(SearchError::Count)?,
            Err(_) => return Err(SearchError::Count(StoreError::Timeout(self.timeout))),
        };

        let paginator = Paginator::new(&*self.store, query.page_size, self.timeout);
        let page_count = paginator.page_count(total_records);
        debug!("共 {} 条记录，{} 页", total_records, page_count);
        self.pb.set_length(page_count);

        let mut report = SearchReport {
            matches: vec![],
            total_records,
            page_count,
            pages_scanned: 0,
            records_scanned: 0,
            failure: None,
            cancelled: false,
            elapsed: Duration::ZERO,
        };

        let paginator = &paginator;
        let mut pages = pin!(
            stream::iter(1..=page_count)
                .map(|page| async move { (page, paginator.page(page).await) })
                .buffered(concurrency.max(1))
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                next = pages.next() => next,
            };
            let Some((page, result)) = next else {
                break;
            };
            match result {
                Ok(records) => {
                    report.records_scanned += records.len() as u64;
                    report.pages_scanned += 1;
                    report.matches.extend(scan(records, &query.fingerprint, query.max_distance));
                    self.pb.inc(1);
                    self.pb.set_message(format!("{} 个结果", report.matches.len()));
                }
                Err(error) => {
                    warn!("读取第 {} 页失败，搜索中止: {}", page, error);
                    report.failure = Some(PageFailure { page, error });
                    break;
                }
            }
        }

        report.matches.sort_by_key(|m| m.distance);
        report.elapsed = start.elapsed();
        info!(
            "搜索完成: 扫描 {}/{} 页，{} 条记录，找到 {} 个结果，耗时 {:.2}s",
            report.pages_scanned,
            report.page_count,
            report.records_scanned,
            report.match_count(),
            report.elapsed.as_secs_f32()
        );
        Ok(report)
    }
}
