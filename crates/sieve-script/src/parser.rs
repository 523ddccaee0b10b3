use sieve_types::{BotStatus, Result, ScriptSettings, SieveError};

use crate::ast::*;
use crate::tokens::{flag, parse_bool, Tokens};

/// Split the source into the settings JSON lines and the script lines.
///
/// Blank lines are dropped. An optional leading `[SETTINGS]` marker is
/// skipped; when a `[SCRIPT]` marker exists everything before it is the
/// settings block, otherwise the whole text is script.
fn split_sections(source: &str) -> (Vec<(usize, &str)>, Vec<(usize, &str)>) {
    let mut lines: Vec<(usize, &str)> = source
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l))
        .filter(|(_, l)| !l.trim().is_empty())
        .collect();

    if lines
        .first()
        .is_some_and(|(_, l)| l.trim().eq_ignore_ascii_case("[SETTINGS]"))
    {
        lines.remove(0);
    }

    match lines
        .iter()
        .position(|(_, l)| l.trim().eq_ignore_ascii_case("[SCRIPT]"))
    {
        Some(marker) => {
            let script = lines.split_off(marker + 1);
            lines.pop();
            (lines, script)
        }
        None => (Vec::new(), lines),
    }
}

fn parse_settings(lines: &[(usize, &str)]) -> Result<ScriptSettings> {
    let json: String = lines.iter().map(|(_, l)| l.trim()).collect();
    if json.is_empty() {
        return Ok(ScriptSettings::default());
    }
    serde_json::from_str(&json).map_err(|e| SieveError::Compile {
        line: lines.first().map(|(n, _)| *n).unwrap_or(1),
        message: format!("invalid settings block: {}", e),
    })
}

/// Fold continuation lines (leading whitespace) into the previous logical
/// line and drop `!` comments.
fn logical_lines(lines: &[(usize, &str)]) -> Vec<(usize, String)> {
    let mut out: Vec<(usize, String)> = Vec::new();
    for (number, line) in lines {
        if line.starts_with('!') {
            continue;
        }
        if line.starts_with(char::is_whitespace) {
            if let Some((_, previous)) = out.last_mut() {
                previous.push(' ');
                previous.push_str(line.trim());
                continue;
            }
        }
        out.push((*number, line.trim().to_string()));
    }
    out
}

fn parse_step(line: usize, text: &str) -> Option<Step> {
    let mut tokens = Tokens::new(text);
    let label = match tokens.peek_word() {
        Some(word) if word.starts_with('#') => {
            tokens.word();
            Some(word[1..].to_string())
        }
        _ => None,
    };
    let kind = tokens.word()?;

    let operation = match kind.to_ascii_lowercase().as_str() {
        "request" => parse_request(&mut tokens),
        "parse" | "extract" => parse_extract(&mut tokens),
        "function" => parse_function(&mut tokens),
        "keycheck" => parse_keycheck(&mut tokens),
        "browseraction" => parse_browser_action(&mut tokens),
        "pageaction" => parse_page_action(&mut tokens),
        "set" => parse_set(&mut tokens),
        _ => None,
    };

    match operation {
        Some(operation) => Some(Step {
            line,
            label,
            operation,
        }),
        None => {
            tracing::debug!(line, kind, "Skipping unrecognised script line");
            None
        }
    }
}

fn skip_token(operation: &str, token: &str) {
    tracing::debug!(operation, token, "Ignoring unknown token");
}

/// Consume the rest of the line looking for `-> VAR|CAP name`.
fn trailing_output(operation: &str, tokens: &mut Tokens<'_>) -> Option<OutputTarget> {
    let mut output = None;
    while let Some(token) = tokens.word() {
        if token == "->" {
            output = tokens.output();
        } else {
            skip_token(operation, token);
        }
    }
    output
}

// ---------------------------------------------------------------------------
// Per-operation grammars
// ---------------------------------------------------------------------------

fn parse_request(tokens: &mut Tokens<'_>) -> Option<Operation> {
    let method = tokens.word()?.to_ascii_uppercase();
    let url = tokens.literal()?;
    let mut op = RequestOp::new(method, url);

    while let Some(token) = tokens.word() {
        match token.to_ascii_uppercase().as_str() {
            "HEADER" => {
                if let Some(header) = tokens.literal() {
                    add_header(&mut op, &header);
                }
            }
            "COOKIE" => {
                if let Some((name, value)) = tokens.literal().as_deref().and_then(|c| c.split_once(':')) {
                    op.cookies.push(format!("{}={}", name.trim(), value.trim()));
                }
            }
            "CONTENT" | "STRINGCONTENT" => {
                if let Some(content) = tokens.literal() {
                    op.contents.push(content);
                }
            }
            "CONTENTTYPE" => {
                if let Some(content_type) = tokens.literal() {
                    op.content_type = content_type
                        .split(';')
                        .next()
                        .unwrap_or_default()
                        .trim()
                        .to_string();
                }
            }
            "MULTIPART" => op.body_kind = BodyKind::Multipart,
            "->" => op.output = tokens.output(),
            _ => match flag(token, "READRESPONSESOURCE") {
                Some(read) => op.read_response = read,
                None => skip_token("REQUEST", token),
            },
        }
    }

    Some(Operation::Request(op))
}

fn add_header(op: &mut RequestOp, header: &str) {
    let Some((name, value)) = header.split_once(':') else {
        return;
    };
    let (name, value) = (name.trim(), value.trim());
    if name.eq_ignore_ascii_case("cookie") {
        op.cookies.extend(
            value
                .split(';')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        );
    } else if !name.eq_ignore_ascii_case("accept-encoding") {
        op.headers.push((name.to_string(), value.to_string()));
    }
}

fn parse_extract(tokens: &mut Tokens<'_>) -> Option<Operation> {
    let source = tokens.literal()?;
    let mut extraction = None;
    let mut output = None;

    while let Some(token) = tokens.word() {
        match token.to_ascii_uppercase().as_str() {
            "LR" => {
                extraction = Some(Extraction::LeftRight {
                    left: tokens.literal()?,
                    right: tokens.literal()?,
                })
            }
            "CSS" => {
                extraction = Some(Extraction::Css {
                    selector: tokens.literal()?,
                    attribute: tokens.literal()?,
                })
            }
            "XPATH" => {
                extraction = Some(Extraction::XPath {
                    selector: tokens.literal()?,
                    attribute: tokens.literal()?,
                })
            }
            "JSON" => {
                extraction = Some(Extraction::Json {
                    path: tokens.literal()?,
                })
            }
            "REGEX" => {
                extraction = Some(Extraction::Regex {
                    pattern: tokens.literal()?,
                    group: tokens.literal().unwrap_or_else(|| "0".to_string()),
                })
            }
            "->" => output = tokens.output(),
            _ => {
                if flag(token, "JTOKENPARSING").is_none() {
                    skip_token("PARSE", token);
                }
            }
        }
    }

    Some(Operation::Extract(ExtractOp {
        source,
        extraction: extraction?,
        output,
    }))
}

fn parse_function(tokens: &mut Tokens<'_>) -> Option<Operation> {
    let action = match tokens.word()?.to_ascii_uppercase().as_str() {
        "BASE64DECODE" => FunctionAction::Base64Decode(tokens.literal()?),
        "BASE64ENCODE" => FunctionAction::Base64Encode(tokens.literal()?),
        "CLEARCOOKIES" => FunctionAction::ClearCookies,
        "CONSTANT" => FunctionAction::Constant(tokens.literal()?),
        "CURRENTUNIXTIME" => FunctionAction::CurrentUnixTime,
        "DELAY" => FunctionAction::Delay(tokens.literal()?),
        "GETRANDOMUA" => {
            let kind = match tokens.peek_word() {
                Some("->") | None => String::new(),
                Some(_) => tokens.literal()?,
            };
            FunctionAction::RandomUserAgent(kind)
        }
        "HASH" => FunctionAction::Hash {
            algorithm: HashAlgorithm::parse(tokens.word()?)?,
            input: tokens.literal()?,
        },
        "HTMLDECODE" => FunctionAction::HtmlDecode(tokens.literal()?),
        "HTMLENCODE" => FunctionAction::HtmlEncode(tokens.literal()?),
        "URLDECODE" => FunctionAction::UrlDecode(tokens.literal()?),
        "URLENCODE" => FunctionAction::UrlEncode(tokens.literal()?),
        "LENGTH" => FunctionAction::Length(tokens.literal()?),
        "RANDOMSTRING" => FunctionAction::RandomString(tokens.literal()?),
        "TOLOWERCASE" => FunctionAction::ToLowercase(tokens.literal()?),
        "TOUPPERCASE" => FunctionAction::ToUppercase(tokens.literal()?),
        _ => return None,
    };
    let output = trailing_output("FUNCTION", tokens);
    Some(Operation::Function(FunctionOp { action, output }))
}

fn parse_keycheck(tokens: &mut Tokens<'_>) -> Option<Operation> {
    let mut op = KeycheckOp::default();

    while let Some(token) = tokens.word() {
        match token.to_ascii_uppercase().as_str() {
            "KEYCHAIN" => {
                let Some(word) = tokens.word() else { break };
                let status = if word.eq_ignore_ascii_case("CUSTOM") {
                    BotStatus::parse(&tokens.literal().unwrap_or_default())
                } else {
                    BotStatus::parse(word)
                };
                let mode = match tokens.peek_word() {
                    Some(w) if w.eq_ignore_ascii_case("and") => {
                        tokens.word();
                        ChainMode::And
                    }
                    Some(w) if w.eq_ignore_ascii_case("or") => {
                        tokens.word();
                        ChainMode::Or
                    }
                    _ => ChainMode::Or,
                };
                op.keychains.push(Keychain {
                    status,
                    mode,
                    keys: Vec::new(),
                });
            }
            "KEY" => {
                let Some(first) = tokens.literal() else { break };
                let key = match tokens.peek_word().and_then(Comparison::parse) {
                    Some(comparison) => {
                        tokens.word();
                        Key {
                            source: first,
                            comparison,
                            value: tokens.literal().unwrap_or_default(),
                        }
                    }
                    None => Key {
                        source: DEFAULT_KEY_SOURCE.to_string(),
                        comparison: Comparison::Contains,
                        value: first,
                    },
                };
                match op.keychains.last_mut() {
                    Some(chain) => chain.keys.push(key),
                    None => tracing::debug!("Dropping KEY declared before any KEYCHAIN"),
                }
            }
            _ => match flag(token, "BANONTOCHECK") {
                Some(ban) => op.ban_on_no_match = ban,
                None => skip_token("KEYCHECK", token),
            },
        }
    }

    Some(Operation::Keycheck(op))
}

fn parse_set(tokens: &mut Tokens<'_>) -> Option<Operation> {
    let op = match tokens.word()?.to_ascii_uppercase().as_str() {
        "CAP" => SetOp::Capture {
            name: tokens.literal()?,
            value: tokens.literal().unwrap_or_default(),
        },
        "VAR" => SetOp::Variable {
            name: tokens.literal()?,
            value: tokens.literal().unwrap_or_default(),
        },
        "USEPROXY" => SetOp::UseProxy(parse_bool(tokens.word()?)?),
        _ => return None,
    };
    Some(Operation::Set(op))
}

fn parse_browser_action(tokens: &mut Tokens<'_>) -> Option<Operation> {
    let action = match tokens.word()?.to_ascii_uppercase().as_str() {
        "OPEN" => BrowserAction::Open,
        "CLOSE" => BrowserAction::Close,
        "CLEARCOOKIES" => BrowserAction::ClearCookies,
        "GETCOOKIES" => BrowserAction::GetCookies,
        "SETCOOKIES" => BrowserAction::SetCookies,
        _ => return None,
    };
    Some(Operation::Browser(action))
}

fn parse_page_action(tokens: &mut Tokens<'_>) -> Option<Operation> {
    let action = match tokens.word()?.to_ascii_uppercase().as_str() {
        "CLICK" => PageAction::Click {
            selector: tokens.literal()?,
        },
        "EVALUATE" => PageAction::Evaluate {
            expression: tokens.literal()?,
        },
        "GETATTRIBUTE" => PageAction::GetAttribute {
            selector: tokens.literal()?,
            attribute: tokens.literal()?,
        },
        "GETADDRESS" => PageAction::GetAddress,
        "GETCONTENT" => PageAction::GetContent,
        "GOTO" => PageAction::GoTo {
            url: tokens.literal()?,
        },
        "PRESSKEY" => PageAction::PressKey {
            key: tokens.literal()?,
        },
        "RELOAD" => PageAction::Reload,
        "SENDKEY" => PageAction::SendKey {
            selector: tokens.literal()?,
            text: tokens.literal()?,
        },
        "SETHEADERS" => PageAction::SetHeaders,
        "WAITFORRESPONSE" => PageAction::WaitForResponse {
            url: tokens.literal()?,
        },
        "WAITFORSELECTOR" => PageAction::WaitForSelector {
            selector: tokens.literal()?,
        },
        "WAITFORTIMEOUT" => PageAction::WaitForTimeout {
            millis: tokens.literal()?,
        },
        _ => return None,
    };

    let mut op = PageOp {
        action,
        headers: Vec::new(),
        key_delay_ms: 0,
        output: None,
    };

    while let Some(token) = tokens.word() {
        match token.to_ascii_uppercase().as_str() {
            "DELAY" => match tokens.literal().and_then(|d| d.trim().parse().ok()) {
                Some(delay) => op.key_delay_ms = delay,
                None => skip_token("PAGEACTION", token),
            },
            "HEADER" => {
                if let Some(header) = tokens.literal() {
                    op.headers.push(header);
                }
            }
            "->" => op.output = tokens.output(),
            _ => skip_token("PAGEACTION", token),
        }
    }

    Some(Operation::Page(op))
}

/// Compile script source into a [`ScriptProgram`].
///
/// Only a malformed settings block is an error; unknown lines and tokens are
/// skipped and reported at `debug` level.
pub fn compile(source: &str) -> Result<ScriptProgram> {
    let (settings_lines, script_lines) = split_sections(source);
    let settings = parse_settings(&settings_lines)?;

    let steps: Vec<Step> = logical_lines(&script_lines)
        .into_iter()
        .filter_map(|(line, text)| parse_step(line, &text))
        .collect();

    tracing::debug!(steps = steps.len(), name = %settings.name, "Script compiled");
    Ok(ScriptProgram { settings, steps })
}
