//! Ordered composition of asynchronous pipeline stages.
//!
//! A [`StageChain`] is a list of stage descriptors run in order over one
//! `&mut RequestContext`:
//!
//! * [`chain_with`](StageChain::chain_with) stages run only while everything
//!   before them succeeded;
//! * [`chain_with_on_error`](StageChain::chain_with_on_error) stages consume a
//!   pending error exactly once and resume normal chaining with their result;
//! * [`on_finally`](StageChain::on_finally) hooks fire exactly once per
//!   execution, including when the execution future is dropped mid-flight.
//!
//! Stage closures receive the context by reference and must only capture
//! owned data (typically `Arc`s), e.g.
//!
//! ```ignore
//! let flows = self.flows.clone();
//! chain.chain_with("api-flow", move |ctx| {
//!     Box::pin(async move { flows.api.execute(ctx, ExecutionPhase::Request).await })
//! });
//! ```
use futures_util::future::BoxFuture;

use crate::core::{
    context::RequestContext,
    error::{ExecutionError, StageResult},
};

type StageFn = Box<dyn for<'c> FnOnce(&'c mut RequestContext) -> BoxFuture<'c, StageResult> + Send>;
type RecoverFn = Box<
    dyn for<'c> FnOnce(&'c mut RequestContext, ExecutionError) -> BoxFuture<'c, StageResult> + Send,
>;
type StartHook = Box<dyn FnOnce() + Send>;
type FinallyHook = Box<dyn FnOnce(ChainOutcome) + Send>;

/// How an execution of the chain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    Completed,
    Failed,
    /// The execution future was dropped before finishing.
    Cancelled,
}

enum Stage {
    Next { name: &'static str, run: StageFn },
    Recover { name: &'static str, run: RecoverFn },
}

#[derive(Default)]
pub struct StageChain {
    stages: Vec<Stage>,
    on_start: Vec<StartHook>,
    on_finally: Vec<FinallyHook>,
}

impl StageChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage that runs only if every previous stage succeeded.
    pub fn chain_with<F>(mut self, name: &'static str, run: F) -> Self
    where
        F: for<'c> FnOnce(&'c mut RequestContext) -> BoxFuture<'c, StageResult> + Send + 'static,
    {
        self.stages.push(Stage::Next {
            name,
            run: Box::new(run),
        });
        self
    }

    /// Append an error handler. It runs only when an error is pending and
    /// its result replaces that error.
    pub fn chain_with_on_error<F>(mut self, name: &'static str, run: F) -> Self
    where
        F: for<'c> FnOnce(&'c mut RequestContext, ExecutionError) -> BoxFuture<'c, StageResult>
            + Send
            + 'static,
    {
        self.stages.push(Stage::Recover {
            name,
            run: Box::new(run),
        });
        self
    }

    /// Run `hook` when execution starts, before the first stage.
    pub fn on_start(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_start.push(Box::new(hook));
        self
    }

    /// Run `hook` exactly once when execution ends, however it ends.
    pub fn on_finally(mut self, hook: impl FnOnce(ChainOutcome) + Send + 'static) -> Self {
        self.on_finally.push(Box::new(hook));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn execute(self, ctx: &mut RequestContext) -> StageResult {
        let StageChain {
            stages,
            on_start,
            on_finally,
        } = self;

        for hook in on_start {
            hook();
        }
        let mut finally = FinallyGuard {
            hooks: on_finally,
            outcome: ChainOutcome::Cancelled,
        };

        let mut result: StageResult = Ok(());
        for stage in stages {
            result = match (stage, result) {
                (Stage::Next { name, run }, Ok(())) => {
                    tracing::trace!("Running stage {}", name);
                    run(ctx).await
                }
                (Stage::Next { .. }, Err(error)) => Err(error),
                (Stage::Recover { name, run }, Err(error)) => {
                    tracing::trace!("Stage {} handling error: {}", name, error);
                    run(ctx, error).await
                }
                (Stage::Recover { .. }, Ok(())) => Ok(()),
            };
        }

        finally.outcome = if result.is_ok() {
            ChainOutcome::Completed
        } else {
            ChainOutcome::Failed
        };
        drop(finally);
        result
    }
}

struct FinallyGuard {
    hooks: Vec<FinallyHook>,
    outcome: ChainOutcome,
}

impl Drop for FinallyGuard {
    fn drop(&mut self) {
        for hook in self.hooks.drain(..) {
            hook(self.outcome);
        }
    }
}
