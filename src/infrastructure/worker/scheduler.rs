//! Page Scheduler - 页面流水线的有界准入
//!
//! 按大纲顺序维护待准入队列；在飞数达到上限时停止准入，
//! 任一流水线结束后才释放名额

use futures_util::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinSet;

/// 一个已结束的页面流水线
#[derive(Debug)]
pub struct Finished<T> {
    pub page_index: u32,
    /// 流水线 panic 时为 Err
    pub result: Result<T, String>,
}

/// Page Scheduler
pub struct PageScheduler<T> {
    limit: usize,
    pending: VecDeque<u32>,
    running: JoinSet<(u32, Result<T, String>)>,
    admitted: usize,
    peak_in_flight: usize,
}

impl<T: Send + 'static> PageScheduler<T> {
    pub fn new(limit: usize, pages: impl IntoIterator<Item = u32>) -> Self {
        Self {
            limit: limit.max(1),
            pending: pages.into_iter().collect(),
            running: JoinSet::new(),
            admitted: 0,
            peak_in_flight: 0,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.running.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// 累计准入数
    pub fn admitted(&self) -> usize {
        self.admitted
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight
    }

    pub fn can_admit(&self) -> bool {
        !self.pending.is_empty() && self.running.len() < self.limit
    }

    /// 所有页面都已准入且全部结束
    pub fn is_finished(&self) -> bool {
        self.pending.is_empty() && self.running.is_empty()
    }

    /// 准入下一页，名额已满或无待准入页面时返回 None
    pub fn admit_next<F, Fut>(&mut self, start: F) -> Option<u32>
    where
        F: FnOnce(u32) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        if !self.can_admit() {
            return None;
        }
        let page_index = self.pending.pop_front()?;
        let pipeline = start(page_index);
        self.running.spawn(async move {
            let result = AssertUnwindSafe(pipeline)
                .catch_unwind()
                .await
                .map_err(|_| "page pipeline panicked".to_string());
            (page_index, result)
        });
        self.admitted += 1;
        self.peak_in_flight = self.peak_in_flight.max(self.running.len());
        Some(page_index)
    }

    /// 丢弃尚未准入的页面（取消时），返回丢弃数
    pub fn clear_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// 等待任一在飞流水线结束；没有在飞流水线时返回 None
    pub async fn join_next(&mut self) -> Option<Finished<T>> {
        loop {
            match self.running.join_next().await? {
                Ok((page_index, result)) => return Some(Finished { page_index, result }),
                Err(e) => {
                    tracing::error!(error = %e, "Page task aborted");
                }
            }
        }
    }
}
