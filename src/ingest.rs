//! 指纹入库流水线
//!
//! 标识按批次分组，每个批次由一个 worker 计算指纹并一次性写入存储。
//! 同时运行的 worker 数量受信号量限制，达到上限时生产者会等待。

use std::any::Any;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{FutureExt, Stream, StreamExt};
use indicatif::ProgressBar;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet, spawn_blocking};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::db::Record;
use crate::error::StoreError;
use crate::source::ImageDecoder;
use crate::store::RecordStore;

/// 无法计算指纹的图片如何入库
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// 写入一条没有指纹的记录
    #[default]
    Store,
    /// 不写入
    Skip,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// 每个批次的图片数量
    pub batch_size: usize,
    /// 同时运行的 worker 上限
    pub max_workers: usize,
    pub failure_policy: FailurePolicy,
    /// 单次批量写入的超时时间
    pub store_timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 10000,
            max_workers: num_cpus::get(),
            failure_policy: FailurePolicy::Store,
            store_timeout: Duration::from_secs(60),
        }
    }
}

/// 单张图片的指纹计算失败
#[derive(Debug, Clone, Serialize)]
pub struct EncodeFailure {
    pub identifier: String,
    pub reason: String,
}

/// 写入失败的批次，`identifiers` 可用于重新提交
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    /// 批次序号，worker 异常退出时为空
    pub batch: Option<usize>,
    pub identifiers: Vec<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    /// 从输入中读取的标识数量
    pub identifiers: usize,
    /// 因取消而未提交的标识数量
    pub skipped: usize,
    pub batches_attempted: usize,
    pub batches_failed: usize,
    pub records_inserted: u64,
    pub encode_failures: Vec<EncodeFailure>,
    pub failed_batches: Vec<BatchFailure>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl IngestSummary {
    pub fn encode_failure_count(&self) -> usize {
        self.encode_failures.len()
    }

    /// 所有批次都已提交并写入成功
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.batches_failed == 0
    }

    fn absorb(&mut self, report: BatchReport) {
        self.records_inserted += report.inserted;
        self.encode_failures.extend(report.encode_failures);
        if let Some(failure) = report.failure {
            self.batches_failed += 1;
            self.failed_batches.push(failure);
        }
    }

    fn absorb_panic(&mut self, err: JoinError) {
        error!("worker 异常退出: {}", err);
        self.batches_failed += 1;
        self.failed_batches.push(BatchFailure {
            batch: None,
            identifiers: vec![],
            error: err.to_string(),
        });
    }
}

/// 等待处理的一批标识
struct Batch {
    index: usize,
    identifiers: Vec<String>,
}

struct BatchReport {
    inserted: u64,
    encode_failures: Vec<EncodeFailure>,
    failure: Option<BatchFailure>,
}

impl BatchReport {
    /// 整个批次都没有写入，所有标识都需要重新提交
    fn failed(index: usize, identifiers: &[String], error: String) -> Self {
        Self {
            inserted: 0,
            encode_failures: vec![],
            failure: Some(BatchFailure { batch: Some(index), identifiers: identifiers.to_vec(), error }),
        }
    }
}

pub struct Ingestor<D, S> {
    decoder: Arc<D>,
    store: Arc<S>,
    config: IngestConfig,
    cancel: CancellationToken,
    pb: ProgressBar,
}

impl<D: ImageDecoder, S: RecordStore> Ingestor<D, S> {
    pub fn new(decoder: Arc<D>, store: Arc<S>, mut config: IngestConfig) -> Self {
        config.batch_size = config.batch_size.max(1);
        config.max_workers = config.max_workers.max(1);
        Self {
            decoder,
            store,
            config,
            cancel: CancellationToken::new(),
            pb: ProgressBar::hidden(),
        }
    }

    /// 取消后不再提交新的批次，已提交的批次会继续完成
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn progress(mut self, pb: ProgressBar) -> Self {
        self.pb = pb;
        self
    }

    /// 处理 `identifiers` 中的所有图片，等待所有批次完成后返回统计信息
    pub async fn ingest<I>(&self, identifiers: I) -> IngestSummary
    where
        I: Stream<Item = String>,
    {
        let start = Instant::now();
        let batch_size = self.config.batch_size;
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let mut workers = JoinSet::new();
        let mut summary = IngestSummary::default();
        // 批次按实际输入增长，不按 batch_size 预留
        let mut batch = Vec::new();
        let mut identifiers = pin!(identifiers);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                next = identifiers.next() => next,
            };
            let Some(identifier) = next else {
                break;
            };
            summary.identifiers += 1;
            batch.push(identifier);

            if batch.len() == batch_size {
                let full = mem::take(&mut batch);
                let full = Batch { index: summary.batches_attempted, identifiers: full };
                if let Err(rejected) = self.dispatch(&semaphore, &mut workers, full).await {
                    summary.skipped += rejected.identifiers.len();
                    summary.cancelled = true;
                    break;
                }
                summary.batches_attempted += 1;
                while let Some(joined) = workers.try_join_next() {
                    match joined {
                        Ok(report) => summary.absorb(report),
                        Err(e) => summary.absorb_panic(e),
                    }
                }
            }
        }

        if summary.cancelled {
            summary.skipped += batch.len();
        } else if !batch.is_empty() {
            let last = Batch { index: summary.batches_attempted, identifiers: batch };
            match self.dispatch(&semaphore, &mut workers, last).await {
                Ok(()) => summary.batches_attempted += 1,
                Err(rejected) => {
                    summary.skipped += rejected.identifiers.len();
                    summary.cancelled = true;
                }
            }
        }

        if summary.cancelled {
            warn!("入库已取消，等待 {} 个进行中的批次完成", workers.len());
        }
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(report) => summary.absorb(report),
                Err(e) => summary.absorb_panic(e),
            }
        }

        summary.elapsed = start.elapsed();
        info!(
            "入库完成: {} 个批次，失败 {} 个，写入 {} 条记录，{} 张图片无法计算指纹，耗时 {:.2}s",
            summary.batches_attempted,
            summary.batches_failed,
            summary.records_inserted,
            summary.encode_failure_count(),
            summary.elapsed.as_secs_f32()
        );
        summary
    }

    /// 等待空闲的 worker 后提交批次，取消时原样返回批次
    async fn dispatch(
        &self,
        semaphore: &Arc<Semaphore>,
        workers: &mut JoinSet<BatchReport>,
        batch: Batch,
    ) -> Result<(), Batch> {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(batch),
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return Err(batch),
            },
        };

        debug!("提交批次 {} ({} 张图片)", batch.index, batch.identifiers.len());
        let Batch { index, identifiers } = batch;
        let identifiers: Arc<[String]> = identifiers.into();
        let decoder = self.decoder.clone();
        let store = self.store.clone();
        let config = self.config.clone();
        let pb = self.pb.clone();
        workers.spawn(async move {
            let _permit = permit;
            let worker = run_batch(index, identifiers.clone(), decoder, store, &config, &pb);
            match AssertUnwindSafe(worker).catch_unwind().await {
                Ok(report) => report,
                Err(payload) => {
                    let reason = panic_message(&*payload);
                    error!("批次 {} 的 worker 异常退出: {}", index, reason);
                    pb.inc(identifiers.len() as u64);
                    BatchReport::failed(index, &identifiers, reason)
                }
            }
        });
        Ok(())
    }
}

async fn run_batch<D, S>(
    index: usize,
    identifiers: Arc<[String]>,
    decoder: Arc<D>,
    store: Arc<S>,
    config: &IngestConfig,
    pb: &ProgressBar,
) -> BatchReport
where
    D: ImageDecoder,
    S: RecordStore,
{
    let size = identifiers.len() as u64;
    let policy = config.failure_policy;

    let encoded = spawn_blocking({
        let identifiers = identifiers.clone();
        move || encode_batch(&*decoder, &identifiers, policy)
    })
    .await;
    let (records, encode_failures) = match encoded {
        Ok(encoded) => encoded,
        Err(e) => {
            error!("批次 {} 计算指纹失败: {}", index, e);
            pb.inc(size);
            return BatchReport::failed(index, &identifiers, e.to_string());
        }
    };
    for failure in &encode_failures {
        pb.println(format!("计算指纹失败: {}", failure.reason));
    }

    let result = if records.is_empty() {
        Ok(0)
    } else {
        match timeout(config.store_timeout, store.insert_many(&records)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(config.store_timeout)),
        }
    };
    pb.inc(size);

    match result {
        Ok(inserted) => {
            pb.set_message(format!("批次 {} 写入 {} 条记录", index, inserted));
            BatchReport { inserted, encode_failures, failure: None }
        }
        Err(e) => {
            error!("批次 {} 写入失败: {}", index, e);
            let identifiers = records
                .into_iter()
                .map(|record| record.identifier)
                .chain(encode_failures.iter().filter_map(|failure| match policy {
                    FailurePolicy::Skip => Some(failure.identifier.clone()),
                    FailurePolicy::Store => None,
                }))
                .collect();
            BatchReport {
                inserted: 0,
                encode_failures,
                failure: Some(BatchFailure {
                    batch: Some(index),
                    identifiers,
                    error: e.to_string(),
                }),
            }
        }
    }
}

/// 按原顺序计算一批图片的指纹
///
/// 解码器在某张图片上 panic 时，该图片按计算失败处理，不影响同批次的其他图片。
fn encode_batch<D: ImageDecoder>(
    decoder: &D,
    identifiers: &[String],
    policy: FailurePolicy,
) -> (Vec<Record>, Vec<EncodeFailure>) {
    let mut records = Vec::with_capacity(identifiers.len());
    let mut failures = vec![];
    for identifier in identifiers {
        let reason = match panic::catch_unwind(AssertUnwindSafe(|| decoder.fingerprint(identifier)))
        {
            Ok(Ok(fingerprint)) => {
                records.push(Record::new(identifier.as_str(), Some(fingerprint)));
                continue;
            }
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("计算 {} 的指纹时 panic: {}", identifier, panic_message(&*payload)),
        };
        failures.push(EncodeFailure { identifier: identifier.clone(), reason });
        if policy == FailurePolicy::Store {
            records.push(Record::new(identifier.as_str(), None));
        }
    }
    (records, failures)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
