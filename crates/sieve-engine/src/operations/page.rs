use std::time::Duration;

use sieve_script::{PageAction, PageOp};
use sieve_types::{Result, SieveError};

use super::{session, store_non_empty};
use crate::context::ExecutionContext;
use crate::template::resolve;

pub(super) async fn run(op: &PageOp, ctx: &mut ExecutionContext) -> Result<()> {
    let output = op.output.as_ref();
    match &op.action {
        PageAction::Click { selector } => {
            let selector = resolve(selector, ctx);
            session(ctx, "click")?.click(&selector).await?;
        }
        PageAction::Evaluate { expression } => {
            let expression = resolve(expression, ctx);
            let value = session(ctx, "evaluate")?.evaluate(&expression).await?;
            store_non_empty(ctx, output, value);
        }
        PageAction::GetAttribute {
            selector,
            attribute,
        } => {
            let selector = resolve(selector, ctx);
            let attribute = resolve(attribute, ctx);
            let value = session(ctx, "getAttribute")?
                .attribute(&selector, &attribute)
                .await?;
            store_non_empty(ctx, output, value);
        }
        PageAction::GetAddress => {
            let address = session(ctx, "getAddress")?.address().await?;
            store_non_empty(ctx, output, address.clone());
            ctx.set_variable("data.address", address);
        }
        PageAction::GetContent => {
            let content = session(ctx, "getContent")?.content().await?;
            store_non_empty(ctx, output, content.clone());
            ctx.set_variable("data.source", content);
        }
        PageAction::GoTo { url } => {
            let url = resolve(url, ctx);
            session(ctx, "goTo")?.goto(&url).await?;
        }
        PageAction::PressKey { key } => {
            let key = resolve(key, ctx);
            session(ctx, "pressKey")?.press_key(&key).await?;
        }
        PageAction::Reload => session(ctx, "reload")?.reload().await?,
        PageAction::SendKey { selector, text } => {
            let selector = resolve(selector, ctx);
            let text = resolve(text, ctx);
            let delay = Duration::from_millis(op.key_delay_ms);
            session(ctx, "sendKey")?
                .type_text(&selector, &text, delay)
                .await?;
        }
        PageAction::SetHeaders => {
            let headers: Vec<(String, String)> = op
                .headers
                .iter()
                .filter_map(|line| line.split_once(':'))
                .map(|(name, value)| (name.trim().to_string(), resolve(value.trim(), ctx)))
                .collect();
            session(ctx, "setHeaders")?.set_extra_headers(&headers).await?;
        }
        PageAction::WaitForResponse { url } => {
            let url = resolve(url, ctx);
            let response = session(ctx, "waitForResponse")?
                .wait_for_response(&url)
                .await?;
            ctx.set_variable("data.address", response.url);
            ctx.set_variable("data.responseCode", response.status.to_string());
            ctx.headers = response.headers;
            store_non_empty(ctx, output, response.body.clone());
            ctx.set_variable("data.source", response.body);
        }
        PageAction::WaitForSelector { selector } => {
            let selector = resolve(selector, ctx);
            session(ctx, "waitForSelector")?
                .wait_for_selector(&selector)
                .await?;
        }
        PageAction::WaitForTimeout { millis } => {
            let millis = resolve(millis, ctx);
            let millis: u64 = millis.trim().parse().map_err(|_| {
                SieveError::operation("WAITFORTIMEOUT", format!("'{}' is not a number of milliseconds", millis))
            })?;
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }
    Ok(())
}
