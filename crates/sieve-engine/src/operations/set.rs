use sieve_script::SetOp;

use crate::context::ExecutionContext;
use crate::template::resolve;

pub(super) fn run(op: &SetOp, ctx: &mut ExecutionContext) {
    match op {
        SetOp::Capture { name, value } => {
            let value = resolve(value, ctx);
            ctx.set_capture(name, value.clone());
            ctx.set_variable(name, value);
        }
        SetOp::Variable { name, value } => {
            let value = resolve(value, ctx);
            ctx.set_variable(name, value);
        }
        SetOp::UseProxy(enabled) => ctx.use_proxy = *enabled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BotInput;
    use crate::proxy::ProxyEntry;
    use sieve_types::BotStatus;
    use std::sync::Arc;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(BotInput::new("bob:pw"), Arc::new(ProxyEntry::direct()), true, &[])
    }

    #[test]
    fn set_variable_and_capture() {
        let mut c = ctx();
        run(
            &SetOp::Variable {
                name: "greeting".into(),
                value: "hi <input.user>".into(),
            },
            &mut c,
        );
        run(
            &SetOp::Capture {
                name: "Who".into(),
                value: "<greeting>".into(),
            },
            &mut c,
        );
        assert_eq!(c.variable("GREETING"), Some("hi bob"));
        assert_eq!(c.captures(), &[("Who".to_string(), "hi bob".to_string())]);
        assert_eq!(c.variable("who"), Some("hi bob"));
    }

    #[test]
    fn set_bot_status_variable() {
        let mut c = ctx();
        run(
            &SetOp::Variable {
                name: "botStatus".into(),
                value: "FAILURE".into(),
            },
            &mut c,
        );
        assert_eq!(c.status(), &BotStatus::Failure);
    }

    #[test]
    fn toggle_use_proxy() {
        let mut c = ctx();
        run(&SetOp::UseProxy(false), &mut c);
        assert!(!c.use_proxy);
    }
}
