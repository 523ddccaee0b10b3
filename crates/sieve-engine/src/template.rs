//! `<name>` / `<name[key]>` placeholder substitution.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::context::ExecutionContext;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<([^ ].*?)(?:\[([^ ].*?)\])?>").expect("placeholder pattern is valid")
});

/// Replace every placeholder in `text` with its value from `ctx`.
///
/// Substituted values are not rescanned. Unknown names resolve to an empty
/// string.
pub fn resolve(text: &str, ctx: &ExecutionContext) -> String {
    if !text.contains('<') {
        return text.to_string();
    }
    PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| {
            let name = &caps[1];
            let key = caps.get(2).map(|m| m.as_str());
            lookup(name, key, ctx)
        })
        .into_owned()
}

fn lookup(name: &str, key: Option<&str>, ctx: &ExecutionContext) -> String {
    if name.eq_ignore_ascii_case("data.headers") {
        return keyed(ctx.headers.iter().map(|(n, v)| (n.as_str(), v.as_str())), key, ": ");
    }
    if name.eq_ignore_ascii_case("data.cookies") {
        return keyed(ctx.cookies.pairs(), key, "=");
    }
    ctx.variable(name).unwrap_or_default().to_string()
}

fn keyed<'a>(
    mut pairs: impl Iterator<Item = (&'a str, &'a str)>,
    key: Option<&str>,
    joiner: &str,
) -> String {
    match key {
        Some(key) => pairs
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.to_string())
            .unwrap_or_default(),
        None => pairs
            .map(|(name, value)| format!("{}{}{}", name, joiner, value))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BotInput;
    use crate::proxy::ProxyEntry;
    use std::sync::Arc;
    use url::Url;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(BotInput::new("bob:hunter2"), Arc::new(ProxyEntry::direct()), false, &[])
    }

    #[test]
    fn resolves_variables_case_insensitively() {
        let c = ctx();
        assert_eq!(resolve("u=<input.user>&p=<INPUT.PASS>", &c), "u=bob&p=hunter2");
    }

    #[test]
    fn unknown_names_resolve_empty() {
        assert_eq!(resolve("[<nope>]", &ctx()), "[]");
    }

    #[test]
    fn single_character_names() {
        let mut c = ctx();
        c.set_variable("x", "1");
        assert_eq!(resolve("<x>", &c), "1");
    }

    #[test]
    fn headers_by_key_and_joined() {
        let mut c = ctx();
        c.headers = vec![
            ("Content-Type".into(), "text/html".into()),
            ("X-Id".into(), "7".into()),
            ("x-id".into(), "8".into()),
        ];
        assert_eq!(resolve("<data.headers[x-id]>", &c), "7");
        assert_eq!(resolve("<data.headers[missing]>", &c), "");
        assert_eq!(
            resolve("<data.headers>", &c),
            "Content-Type: text/html\nX-Id: 7\nx-id: 8"
        );
    }

    #[test]
    fn cookies_by_key_and_joined() {
        let mut c = ctx();
        let url = Url::parse("https://example.com/").unwrap();
        c.cookies.insert_pair(&url, "sid=abc");
        c.cookies.insert_pair(&url, "theme=dark");
        assert_eq!(resolve("<data.cookies[SID]>", &c), "abc");
        assert_eq!(resolve("<data.cookies>", &c), "sid=abc\ntheme=dark");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let mut c = ctx();
        c.set_variable("a", "<input.user>");
        assert_eq!(resolve("<a>", &c), "<input.user>");
    }

    #[test]
    fn leading_space_is_not_a_placeholder() {
        let c = ctx();
        assert_eq!(resolve("a < b and c > d", &c), "a < b and c > d");
    }

    #[test]
    fn idempotent_without_placeholders() {
        let c = ctx();
        let once = resolve("plain text", &c);
        assert_eq!(resolve(&once, &c), once);
    }
}
