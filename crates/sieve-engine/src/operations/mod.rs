//! Execution of compiled script operations against an [`ExecutionContext`].
//!
//! Each operation kind lives in its own module and returns `Result<()>`;
//! [`execute`] folds that into a [`StepOutcome`] so no failure ever escapes a
//! step.

mod browser_action;
mod extract;
mod function;
mod keycheck;
mod page;
mod request;
mod set;

use std::sync::Arc;

use sieve_script::Operation;
use sieve_types::{Result, RunSettings, SieveError, StepOutcome};

use crate::browser::{BrowserDriver, BrowserSession};
use crate::context::ExecutionContext;
use crate::transport::Transport;

pub use function::{random_string, UserAgents};

/// Shared, read-only services every operation may use.
#[derive(Clone)]
pub struct Environment {
    pub transport: Arc<dyn Transport>,
    pub browser: Arc<dyn BrowserDriver>,
    pub settings: Arc<RunSettings>,
    pub user_agents: Arc<UserAgents>,
}

/// Run one operation and classify how it ended.
pub async fn execute(
    operation: &Operation,
    ctx: &mut ExecutionContext,
    env: &Environment,
) -> StepOutcome {
    let result = match operation {
        Operation::Request(op) => request::run(op, ctx, env).await,
        Operation::Extract(op) => extract::run(op, ctx),
        Operation::Function(op) => function::run(op, ctx, env).await,
        Operation::Keycheck(op) => keycheck::run(op, ctx),
        Operation::Set(op) => {
            set::run(op, ctx);
            Ok(())
        }
        Operation::Browser(action) => browser_action::run(*action, ctx, env).await,
        Operation::Page(op) => page::run(op, ctx).await,
    };
    StepOutcome::from_result(result)
}

/// Store `value` into `target` unless it is empty.
fn store_non_empty(
    ctx: &mut ExecutionContext,
    target: Option<&sieve_script::OutputTarget>,
    value: String,
) {
    if value.is_empty() {
        return;
    }
    if let Some(target) = target {
        ctx.store_output(target, value);
    }
}

/// The open browser session, or an error naming `action` when there is none.
fn session<'a>(ctx: &'a mut ExecutionContext, action: &str) -> Result<&'a mut Box<dyn BrowserSession>> {
    ctx.browser.as_mut().ok_or_else(|| SieveError::Browser {
        action: action.to_string(),
        message: "browser is not open".into(),
    })
}
