//! Bounded-concurrency batch operations.

use std::future::Future;
use std::sync::Arc;

use reqwest::StatusCode;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::{Created, RegistryClient};
use crate::error::{HandleError, HandleResult};
use crate::record::Record;

/// Outcome of one batch input.
#[derive(Debug)]
pub struct BatchItem<T> {
    /// Position in the input.
    pub index: usize,
    /// Suffix the caller supplied, if any.
    pub suffix: Option<String>,
    pub result: HandleResult<T>,
}

/// Per-item outcomes, in input order.
#[derive(Debug)]
pub struct BatchReport<T> {
    pub items: Vec<BatchItem<T>>,
}

impl<T> BatchReport<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &BatchItem<T>> {
        self.items.iter().filter(|item| item.result.is_ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &BatchItem<T>> {
        self.items.iter().filter(|item| item.result.is_err())
    }

    pub fn all_succeeded(&self) -> bool {
        self.items.iter().all(|item| item.result.is_ok())
    }
}

impl RegistryClient {
    /// Create many records. A `None` suffix is minted per item.
    pub async fn create_many(
        &self,
        records: Vec<(Record, Option<String>)>,
    ) -> BatchReport<Created> {
        let jobs: Vec<_> = records
            .into_iter()
            .map(|(record, suffix)| {
                let client = self.clone();
                let requested = suffix.clone();
                let job = async move { client.create(record, requested.as_deref()).await };
                (suffix, job)
            })
            .collect();

        self.run_bounded("create", jobs).await
    }

    /// Delete many records.
    pub async fn delete_many(&self, suffixes: Vec<String>) -> BatchReport<StatusCode> {
        let jobs: Vec<_> = suffixes
            .into_iter()
            .map(|suffix| {
                let client = self.clone();
                let target = suffix.clone();
                let job = async move { client.delete(&target).await };
                (Some(suffix), job)
            })
            .collect();

        self.run_bounded("delete", jobs).await
    }

    async fn run_bounded<T, Fut>(
        &self,
        operation: &'static str,
        jobs: Vec<(Option<String>, Fut)>,
    ) -> BatchReport<T>
    where
        T: Send + 'static,
        Fut: Future<Output = HandleResult<T>> + Send + 'static,
    {
        let total = jobs.len();
        let sem = Arc::new(Semaphore::new(self.batch_concurrency));
        let mut join_set = JoinSet::new();

        let mut suffixes = Vec::with_capacity(total);
        let mut pending = Vec::with_capacity(total);
        for (suffix, job) in jobs {
            suffixes.push(suffix);
            pending.push(job);
        }

        for (index, job) in pending.into_iter().enumerate() {
            let Ok(permit) = sem.clone().acquire_owned().await else {
                break;
            };
            join_set.spawn(async move {
                let _permit = permit;
                (index, job.await)
            });
        }

        let mut slots: Vec<Option<HandleResult<T>>> = (0..total).map(|_| None).collect();
        let mut join_failure = None;
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => join_failure = Some(e.to_string()),
            }
        }

        let items: Vec<BatchItem<T>> = slots
            .into_iter()
            .zip(suffixes)
            .enumerate()
            .map(|(index, (slot, suffix))| {
                let result = slot.unwrap_or_else(|| {
                    Err(HandleError::Internal {
                        message: format!(
                            "{} worker for item {} did not report: {}",
                            operation,
                            index,
                            join_failure.as_deref().unwrap_or("not started")
                        ),
                    })
                });
                if let Err(e) = &result {
                    warn!(operation, index, suffix = ?suffix, error = %e, "batch item failed");
                }
                BatchItem {
                    index,
                    suffix,
                    result,
                }
            })
            .collect();

        let report = BatchReport { items };
        info!(
            operation,
            total,
            failed = report.failed().count(),
            "batch finished"
        );
        report
    }
}
