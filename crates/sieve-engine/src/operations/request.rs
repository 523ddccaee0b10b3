use std::sync::Arc;

use sieve_script::{BodyKind, RequestOp};
use sieve_types::{Result, SieveError};
use url::Url;

use super::Environment;
use crate::context::ExecutionContext;
use crate::template::resolve;
use crate::transport::{HttpBody, HttpRequest};

pub(super) async fn run(op: &RequestOp, ctx: &mut ExecutionContext, env: &Environment) -> Result<()> {
    let address = resolve(&op.url, ctx);
    let url = Url::parse(&address)
        .map_err(|e| SieveError::operation("REQUEST", format!("invalid url '{}': {}", address, e)))?;

    let headers = op
        .headers
        .iter()
        .map(|(name, value)| (name.clone(), resolve(value, ctx)))
        .collect();

    for cookie in &op.cookies {
        let pair = resolve(cookie, ctx);
        ctx.cookies.insert_pair(&url, &pair);
    }
    let cookie_header = ctx.cookies.header_for(&url);

    let body = match (op.contents.first(), op.body_kind) {
        (None, _) => None,
        (Some(content), BodyKind::Standard) => Some(HttpBody::Text {
            content: resolve(content, ctx),
            content_type: op.content_type.clone(),
        }),
        (Some(_), BodyKind::Multipart) => Some(HttpBody::Multipart(
            op.contents
                .iter()
                .filter_map(|field| {
                    let field = resolve(field, ctx);
                    field
                        .split_once(':')
                        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                })
                .collect(),
        )),
    };

    let request = HttpRequest {
        method: op.method.clone(),
        url: url.clone(),
        headers,
        cookie_header,
        body,
    };
    let proxy = (ctx.use_proxy && !ctx.proxy().is_direct()).then(|| Arc::clone(ctx.proxy()));
    let response = env
        .transport
        .send(request, proxy.as_deref(), op.read_response)
        .await?;

    let response_url = Url::parse(&response.final_url).unwrap_or(url);
    for (name, value) in &response.headers {
        if name.eq_ignore_ascii_case("set-cookie") {
            ctx.cookies.store_set_cookie(&response_url, value);
        }
    }

    ctx.set_variable("data.address", response.final_url);
    ctx.set_variable("data.responseCode", response.status.to_string());
    ctx.headers = response.headers;
    if let Some(target) = &op.output {
        ctx.store_output(target, response.body.clone());
    }
    ctx.set_variable("data.source", response.body);
    Ok(())
}
