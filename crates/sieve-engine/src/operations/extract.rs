use sieve_script::{ExtractOp, Extraction};
use sieve_types::Result;

use super::store_non_empty;
use crate::context::ExecutionContext;
use crate::selection;
use crate::template::resolve;

pub(super) fn run(op: &ExtractOp, ctx: &mut ExecutionContext) -> Result<()> {
    let source = resolve(&op.source, ctx);
    let selected = match &op.extraction {
        Extraction::LeftRight { left, right } => {
            selection::left_right(&source, &resolve(left, ctx), &resolve(right, ctx))
        }
        Extraction::Css {
            selector,
            attribute,
        } => selection::css(&source, &resolve(selector, ctx), &resolve(attribute, ctx))?,
        Extraction::XPath {
            selector,
            attribute,
        } => selection::xpath(&source, &resolve(selector, ctx), &resolve(attribute, ctx))?,
        Extraction::Json { path } => selection::json_path(&source, &resolve(path, ctx))?,
        Extraction::Regex { pattern, group } => {
            selection::regex_group(&source, &resolve(pattern, ctx), &resolve(group, ctx))?
        }
    };

    tracing::trace!(kind = extraction_kind(&op.extraction), len = selected.len(), "Extracted");
    store_non_empty(ctx, op.output.as_ref(), selected.trim().to_string());
    Ok(())
}

fn extraction_kind(extraction: &Extraction) -> &'static str {
    match extraction {
        Extraction::LeftRight { .. } => "LR",
        Extraction::Css { .. } => "CSS",
        Extraction::XPath { .. } => "XPATH",
        Extraction::Json { .. } => "JSON",
        Extraction::Regex { .. } => "REGEX",
    }
}
