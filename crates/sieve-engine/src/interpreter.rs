//! Per-record run loop: steps in order, early exit on breaking statuses and
//! bounded retry with a fresh proxy on recheckable ones.

use std::sync::Arc;

use sieve_script::{ScriptProgram, Step};
use sieve_types::{BotStatus, RunSettings, StepOutcome};
use tokio_util::sync::CancellationToken;

use crate::context::{BotInput, ExecutionContext};
use crate::operations::{self, Environment};
use crate::proxy::ProxyPool;
use crate::stats::RunStats;

/// Final classification of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub status: BotStatus,
    pub captures: Vec<(String, String)>,
    pub attempts: usize,
}

pub struct Interpreter {
    program: Arc<ScriptProgram>,
    env: Environment,
    verbose: bool,
}

impl Interpreter {
    pub fn new(program: Arc<ScriptProgram>, env: Environment) -> Self {
        Self {
            program,
            env,
            verbose: false,
        }
    }

    /// Log step failures at `warn` instead of `debug`.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn program(&self) -> &ScriptProgram {
        &self.program
    }

    pub fn settings(&self) -> &RunSettings {
        &self.env.settings
    }

    /// Run the script for `record` until it lands in a final status.
    ///
    /// Returns `None` when `cancel` fired before the record was classified.
    pub async fn run_once(
        &self,
        record: &str,
        pool: &ProxyPool,
        stats: &RunStats,
        cancel: &CancellationToken,
    ) -> Option<RunOutcome> {
        let policy = &self.env.settings.retry;
        let mut captures = Vec::new();

        for attempt in 1..=policy.max_attempts {
            let proxy = pool.next();
            let mut ctx = ExecutionContext::new(
                BotInput::new(record),
                Arc::clone(&proxy),
                pool.has_proxies(),
                &self.program.settings.custom_inputs,
            );

            let finished = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                _ = self.run_steps(&mut ctx) => true,
            };
            ctx.release().await;
            if !finished {
                tracing::debug!(record, attempt, "Attempt cancelled");
                return None;
            }

            let status = ctx.status().clone();
            if !policy.is_recheckable(&status) {
                return Some(RunOutcome {
                    status,
                    captures: ctx.into_captures(),
                    attempts: attempt,
                });
            }

            stats.record_recheck(&status);
            if status == BotStatus::Ban {
                proxy.mark_unhealthy();
            }
            tracing::debug!(record, attempt, status = %status, proxy = %proxy, "Rechecking with a new proxy");
            captures = ctx.into_captures();
        }

        tracing::debug!(record, attempts = policy.max_attempts, "Attempts exhausted");
        Some(RunOutcome {
            status: BotStatus::ToCheck,
            captures,
            attempts: policy.max_attempts,
        })
    }

    async fn run_steps(&self, ctx: &mut ExecutionContext) {
        let policy = &self.env.settings.retry;
        for step in &self.program.steps {
            match operations::execute(&step.operation, ctx, &self.env).await {
                StepOutcome::Completed => {}
                StepOutcome::Retry { reason } => {
                    self.log_failure(step, &reason);
                    ctx.set_status(BotStatus::Retry);
                }
                StepOutcome::ProxyFault { reason } => {
                    self.log_failure(step, &reason);
                    ctx.proxy().mark_unhealthy();
                    ctx.set_status(BotStatus::Retry);
                }
            }
            if policy.is_breaking(ctx.status()) {
                break;
            }
        }
    }

    fn log_failure(&self, step: &Step, reason: &str) {
        let kind = step.operation.kind();
        if self.verbose {
            tracing::warn!(line = step.line, operation = kind, reason, "Step failed");
        } else {
            tracing::debug!(line = step.line, operation = kind, reason, "Step failed");
        }
    }
}
