//! # Retry batches
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s applied to a list of items.
//! Every asynchronous stage fans out over all surviving items at once and the
//! next stage starts only when every one of them has resolved. An item whose
//! operation fails is dropped from the list and handed to the failure handler;
//! the rest keep flowing.
//!
//! [`RetryBatch`] runs a pipeline over the full input, then once more over
//! exactly the items that failed, and stops there.

use std::future::Future;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use sim_core::{Result, SimError};

type AsyncOp<T, R> = Box<dyn Fn(T) -> BoxFuture<'static, Result<R>> + Send + Sync>;

/// One transform step of a [`Pipeline`].
pub enum Stage<T> {
    /// Infallible synchronous transform.
    Map(Box<dyn Fn(T) -> T + Send + Sync>),
    /// The async result replaces the item.
    Pipe { name: &'static str, op: AsyncOp<T, T> },
    /// The async result is discarded and the original item kept.
    Peek { name: &'static str, op: AsyncOp<T, ()> },
    /// Items matching the predicate are dropped without a report.
    DiscardIf(Box<dyn Fn(&T) -> bool + Send + Sync>),
}

/// What a failure handler is told about a dropped item.
pub struct Failure<'a, T> {
    pub stage: &'static str,
    pub error: &'a SimError,
    /// Every item the failing stage was run over.
    pub items: &'a [T],
    pub item: &'a T,
}

/// Which pass of a [`RetryBatch`] a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    First,
    Retry,
}

pub struct Pipeline<T> {
    stages: Vec<Stage<T>>,
}

impl<T> Default for Pipeline<T> {
    fn default() -> Self {
        Self { stages: Vec::new() }
    }
}

impl<T> Pipeline<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map<F>(mut self, f: F) -> Self
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        self.stages.push(Stage::Map(Box::new(f)));
        self
    }

    pub fn pipe<F, Fut>(mut self, name: &'static str, f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.stages.push(Stage::Pipe {
            name,
            op: Box::new(move |item| f(item).boxed()),
        });
        self
    }

    pub fn peek<F, Fut>(mut self, name: &'static str, f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.stages.push(Stage::Peek {
            name,
            op: Box::new(move |item| f(item).boxed()),
        });
        self
    }

    pub fn discard_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.stages.push(Stage::DiscardIf(Box::new(predicate)));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage over `items` and return the survivors.
    pub async fn run(
        &self,
        mut items: Vec<T>,
        on_fail: &(dyn Fn(Failure<'_, T>) + Send + Sync),
    ) -> Vec<T> {
        for stage in &self.stages {
            if items.is_empty() {
                break;
            }
            items = match stage {
                Stage::Map(f) => items.into_iter().map(f).collect(),
                Stage::DiscardIf(predicate) => items.into_iter().filter(|i| !predicate(i)).collect(),
                Stage::Pipe { name, op } => {
                    let results = join_all(items.iter().cloned().map(op)).await;
                    let mut survivors = Vec::with_capacity(items.len());
                    for (item, result) in items.iter().zip(results) {
                        match result {
                            Ok(next) => survivors.push(next),
                            Err(error) => on_fail(Failure {
                                stage: *name,
                                error: &error,
                                items: &items,
                                item,
                            }),
                        }
                    }
                    survivors
                }
                Stage::Peek { name, op } => {
                    let results = join_all(items.iter().cloned().map(op)).await;
                    let mut survivors = Vec::with_capacity(items.len());
                    for (item, result) in items.iter().zip(results) {
                        match result {
                            Ok(()) => survivors.push(item.clone()),
                            Err(error) => on_fail(Failure {
                                stage: *name,
                                error: &error,
                                items: &items,
                                item,
                            }),
                        }
                    }
                    survivors
                }
            };
        }
        items
    }
}

/// Result of a [`RetryBatch`] run.
#[derive(Debug, Clone)]
pub struct BatchOutcome<T> {
    /// Items that made it through the first pass.
    pub survivors: Vec<T>,
    /// Failed items that made it through the retry pass.
    pub recovered: Vec<T>,
    /// Items that failed both passes.
    pub failed: Vec<T>,
}

impl<T> BatchOutcome<T> {
    pub fn is_clean(&self) -> bool {
        self.recovered.is_empty() && self.failed.is_empty()
    }
}

/// A pipeline with exactly one retry pass over the items that failed.
pub struct RetryBatch<T> {
    pipeline: Pipeline<T>,
}

impl<T> RetryBatch<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(pipeline: Pipeline<T>) -> Self {
        Self { pipeline }
    }

    pub async fn run(
        &self,
        items: Vec<T>,
        on_fail: &(dyn Fn(Failure<'_, T>, Pass) + Send + Sync),
    ) -> BatchOutcome<T> {
        let retries: Mutex<Vec<T>> = Mutex::new(Vec::new());
        let survivors = self
            .pipeline
            .run(items, &|failure: Failure<'_, T>| {
                retries.lock().push(failure.item.clone());
                on_fail(failure, Pass::First);
            })
            .await;

        let retries = retries.into_inner();
        if retries.is_empty() {
            return BatchOutcome {
                survivors,
                recovered: Vec::new(),
                failed: Vec::new(),
            };
        }

        let failed: Mutex<Vec<T>> = Mutex::new(Vec::new());
        let recovered = self
            .pipeline
            .run(retries, &|failure: Failure<'_, T>| {
                failed.lock().push(failure.item.clone());
                on_fail(failure, Pass::Retry);
            })
            .await;

        BatchOutcome {
            survivors,
            recovered,
            failed: failed.into_inner(),
        }
    }
}
