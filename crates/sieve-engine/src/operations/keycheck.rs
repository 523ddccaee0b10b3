use regex::Regex;
use sieve_script::{ChainMode, Comparison, Key, KeycheckOp, Keychain};
use sieve_types::{BotStatus, Result, SieveError};

use crate::context::ExecutionContext;
use crate::template::resolve;

/// Every keychain is evaluated; the last one that matches decides the status.
pub(super) fn run(op: &KeycheckOp, ctx: &mut ExecutionContext) -> Result<()> {
    let mut matched = None;
    for keychain in &op.keychains {
        if chain_matches(keychain, ctx)? {
            matched = Some(&keychain.status);
        }
    }

    match matched {
        Some(status) => {
            tracing::trace!(status = %status, "Keychain matched");
            ctx.set_status(status.clone());
        }
        None if op.ban_on_no_match => ctx.set_status(BotStatus::Ban),
        None => {}
    }
    Ok(())
}

fn chain_matches(keychain: &Keychain, ctx: &ExecutionContext) -> Result<bool> {
    match keychain.mode {
        ChainMode::Or => {
            for key in &keychain.keys {
                if key_matches(key, ctx)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        ChainMode::And => {
            for key in &keychain.keys {
                if !key_matches(key, ctx)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

fn key_matches(key: &Key, ctx: &ExecutionContext) -> Result<bool> {
    let source = resolve(&key.source, ctx);
    let value = resolve(&key.value, ctx);
    compare(&source, key.comparison, &value)
}

fn compare(source: &str, comparison: Comparison, value: &str) -> Result<bool> {
    Ok(match comparison {
        Comparison::LessThan => number(source)? < number(value)?,
        Comparison::GreaterThan => number(source)? > number(value)?,
        Comparison::EqualTo => source == value,
        Comparison::NotEqualTo => source != value,
        Comparison::Contains => source.contains(value),
        Comparison::DoesNotContain => !source.contains(value),
        Comparison::MatchesRegex => pattern(value)?.is_match(source),
        Comparison::DoesNotMatchRegex => !pattern(value)?.is_match(source),
    })
}

fn number(text: &str) -> Result<i64> {
    text.trim()
        .parse()
        .map_err(|_| SieveError::operation("KEYCHECK", format!("'{}' is not an integer", text)))
}

fn pattern(text: &str) -> Result<Regex> {
    Regex::new(text).map_err(|e| SieveError::operation("KEYCHECK", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BotInput;
    use crate::proxy::ProxyEntry;
    use std::sync::Arc;

    fn ctx(record: &str) -> ExecutionContext {
        ExecutionContext::new(BotInput::new(record), Arc::new(ProxyEntry::direct()), false, &[])
    }

    fn key(source: &str, comparison: Comparison, value: &str) -> Key {
        Key {
            source: source.into(),
            comparison,
            value: value.into(),
        }
    }

    fn admin_check(ban_on_no_match: bool) -> KeycheckOp {
        KeycheckOp {
            keychains: vec![Keychain {
                status: BotStatus::Success,
                mode: ChainMode::Or,
                keys: vec![key("<input.user>", Comparison::EqualTo, "admin")],
            }],
            ban_on_no_match,
        }
    }

    #[test]
    fn matching_keychain_sets_status() {
        let mut c = ctx("admin:pw");
        run(&admin_check(true), &mut c).unwrap();
        assert_eq!(c.status(), &BotStatus::Success);
    }

    #[test]
    fn no_match_with_ban_flag_is_ban() {
        let mut c = ctx("bob:pw");
        run(&admin_check(true), &mut c).unwrap();
        assert_eq!(c.status(), &BotStatus::Ban);

        let mut c = ctx("bob:pw");
        run(&admin_check(false), &mut c).unwrap();
        assert_eq!(c.status(), &BotStatus::None);
    }

    #[test]
    fn last_matching_keychain_wins() {
        let mut c = ctx("admin:pw");
        c.set_variable("data.source", "Welcome back, premium member");
        let op = KeycheckOp {
            keychains: vec![
                Keychain {
                    status: BotStatus::Success,
                    mode: ChainMode::Or,
                    keys: vec![key("<data.source>", Comparison::Contains, "Welcome")],
                },
                Keychain {
                    status: BotStatus::Custom("PREMIUM".into()),
                    mode: ChainMode::And,
                    keys: vec![
                        key("<data.source>", Comparison::Contains, "premium"),
                        key("<data.source>", Comparison::MatchesRegex, r"member$"),
                    ],
                },
                Keychain {
                    status: BotStatus::Failure,
                    mode: ChainMode::Or,
                    keys: vec![key("<data.source>", Comparison::Contains, "invalid")],
                },
            ],
            ban_on_no_match: true,
        };
        run(&op, &mut c).unwrap();
        assert_eq!(c.status(), &BotStatus::Custom("PREMIUM".into()));
    }

    #[test]
    fn numeric_comparisons() {
        assert!(compare("3", Comparison::LessThan, "10").unwrap());
        assert!(compare("-1", Comparison::LessThan, "0").unwrap());
        assert!(!compare("10", Comparison::GreaterThan, "10").unwrap());
        assert!(compare("abc", Comparison::GreaterThan, "1").is_err());
    }

    #[test]
    fn text_comparisons() {
        assert!(compare("abc", Comparison::NotEqualTo, "abd").unwrap());
        assert!(compare("abc", Comparison::DoesNotContain, "z").unwrap());
        assert!(compare("abc123", Comparison::DoesNotMatchRegex, r"^\d").unwrap());
        assert!(compare("x", Comparison::MatchesRegex, "(").is_err());
    }

    #[test]
    fn empty_and_chain_matches() {
        let mut c = ctx("a:b");
        let op = KeycheckOp {
            keychains: vec![Keychain {
                status: BotStatus::Failure,
                mode: ChainMode::And,
                keys: vec![],
            }],
            ban_on_no_match: false,
        };
        run(&op, &mut c).unwrap();
        assert_eq!(c.status(), &BotStatus::Failure);
    }

    #[test]
    fn or_chain_short_circuits_before_bad_key() {
        let mut c = ctx("admin:pw");
        let op = KeycheckOp {
            keychains: vec![Keychain {
                status: BotStatus::Success,
                mode: ChainMode::Or,
                keys: vec![
                    key("<input.user>", Comparison::EqualTo, "admin"),
                    key("<input.user>", Comparison::LessThan, "nan"),
                ],
            }],
            ban_on_no_match: false,
        };
        run(&op, &mut c).unwrap();
        assert_eq!(c.status(), &BotStatus::Success);
    }
}
