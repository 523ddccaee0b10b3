//! Text selection engines used by `PARSE`.
//!
//! Each engine takes the resolved source text and returns the selected string.
//! "Nothing matched" is an empty string; only malformed input or expressions
//! are errors.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use serde_json_path::JsonPath;
use sieve_types::{Result, SieveError};
use sxd_document::dom::{ChildOfElement, Document, Element};
use sxd_document::Package;
use sxd_xpath::nodeset::Node;

fn selection_error(kind: &str, message: impl std::fmt::Display) -> SieveError {
    SieveError::Selection {
        kind: kind.to_string(),
        message: message.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Left / right
// ---------------------------------------------------------------------------

/// Text between the first `left` and the next `right` after it.
pub fn left_right(source: &str, left: &str, right: &str) -> String {
    let Some(start) = source.find(left) else {
        return String::new();
    };
    let rest = &source[start + left.len()..];
    match rest.find(right) {
        Some(end) => rest[..end].to_string(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// CSS
// ---------------------------------------------------------------------------

/// First element matching `selector`; `innerHTML`, `outerHTML` and
/// `textContent` read the element, any other name reads that attribute.
pub fn css(source: &str, selector: &str, attribute: &str) -> Result<String> {
    let selector = Selector::parse(selector).map_err(|e| selection_error("CSS", e))?;
    let document = Html::parse_document(source);
    let Some(element) = document.select(&selector).next() else {
        return Ok(String::new());
    };
    Ok(css_attribute(element, attribute))
}

fn css_attribute(element: ElementRef<'_>, attribute: &str) -> String {
    match attribute.to_ascii_lowercase().as_str() {
        "innerhtml" => element.inner_html(),
        "outerhtml" => element.html(),
        "textcontent" => element.text().collect(),
        _ => element.value().attr(attribute).unwrap_or_default().to_string(),
    }
}

// ---------------------------------------------------------------------------
// XPath
// ---------------------------------------------------------------------------

/// First node matching `expression`; `innerHTML`, `outerHTML` and `innerText`
/// read an element, any other name reads that attribute. Non-element results
/// (text, attributes, numbers) are returned as their string value.
pub fn xpath(source: &str, expression: &str, attribute: &str) -> Result<String> {
    let package = to_package(&Html::parse_document(source));
    let document = package.as_document();
    let value = sxd_xpath::evaluate_xpath(&document, expression)
        .map_err(|e| selection_error("XPath", e))?;

    let nodes = match value {
        sxd_xpath::Value::Nodeset(nodes) => nodes,
        other => return Ok(other.string()),
    };
    Ok(match nodes.document_order_first() {
        Some(Node::Element(element)) => xpath_attribute(element, attribute),
        Some(other) => other.string_value(),
        None => String::new(),
    })
}

/// Copy an html5ever tree into an sxd document so XPath can query it.
fn to_package(html: &Html) -> Package {
    let package = Package::new();
    {
        let document = package.as_document();
        let root = copy_element(document, html.root_element());
        document.root().append_child(root);
    }
    package
}

fn copy_element<'d>(document: Document<'d>, source: ElementRef<'_>) -> Element<'d> {
    let element = document.create_element(source.value().name());
    for (name, value) in source.value().attrs() {
        element.set_attribute_value(name, value);
    }
    for child in source.children() {
        match child.value() {
            scraper::Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    element.append_child(copy_element(document, child));
                }
            }
            scraper::Node::Text(text) => element.append_child(document.create_text(&text.text)),
            scraper::Node::Comment(comment) => {
                element.append_child(document.create_comment(&comment.comment))
            }
            _ => {}
        }
    }
    element
}

fn xpath_attribute(element: Element<'_>, attribute: &str) -> String {
    match attribute.to_ascii_lowercase().as_str() {
        "innerhtml" => {
            let mut out = String::new();
            for child in element.children() {
                write_child(&mut out, child);
            }
            out
        }
        "outerhtml" => {
            let mut out = String::new();
            write_element(&mut out, element);
            out
        }
        "innertext" => Node::Element(element).string_value(),
        _ => element.attribute_value(attribute).unwrap_or_default().to_string(),
    }
}

fn write_element(out: &mut String, element: Element<'_>) {
    let name = element.name().local_part();
    out.push('<');
    out.push_str(name);
    for attribute in element.attributes() {
        out.push(' ');
        out.push_str(attribute.name().local_part());
        out.push_str("=\"");
        out.push_str(&html_escape::encode_double_quoted_attribute(attribute.value()));
        out.push('"');
    }
    out.push('>');
    for child in element.children() {
        write_child(out, child);
    }
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn write_child(out: &mut String, child: ChildOfElement<'_>) {
    match child {
        ChildOfElement::Element(e) => write_element(out, e),
        ChildOfElement::Text(t) => out.push_str(&html_escape::encode_text(t.text())),
        ChildOfElement::Comment(c) => {
            out.push_str("<!--");
            out.push_str(c.text());
            out.push_str("-->");
        }
        ChildOfElement::ProcessingInstruction(_) => {}
    }
}

// ---------------------------------------------------------------------------
// JSON path
// ---------------------------------------------------------------------------

/// First node selected by a JSONPath query: `$.a.b[0]`, `$..token`,
/// `$.items[*].id`, `$['k']`. A leading `$` may be omitted (`a.b`).
/// Strings are returned unquoted, objects and arrays as indented JSON, and
/// `null` or no match as an empty string.
pub fn json_path(source: &str, path: &str) -> Result<String> {
    let root: Value = serde_json::from_str(source).map_err(|e| selection_error("JSON", e))?;
    let query = JsonPath::parse(&rooted(path)).map_err(|e| selection_error("JSON", e))?;

    Ok(match query.query(&root).first() {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(value @ (Value::Object(_) | Value::Array(_))) => serde_json::to_string_pretty(value)?,
        Some(other) => other.to_string(),
    })
}

fn rooted(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('$') {
        path.to_string()
    } else if path.is_empty() || path.starts_with('[') {
        format!("${}", path)
    } else {
        format!("$.{}", path)
    }
}

// ---------------------------------------------------------------------------
// Regex
// ---------------------------------------------------------------------------

/// The named or numbered `group` of the first match of `pattern`.
pub fn regex_group(source: &str, pattern: &str, group: &str) -> Result<String> {
    let re = Regex::new(pattern).map_err(|e| selection_error("Regex", e))?;
    let Some(caps) = re.captures(source) else {
        return Ok(String::new());
    };
    let m = match group.trim().parse::<usize>() {
        Ok(index) => caps.get(index),
        Err(_) => caps.name(group.trim()),
    };
    Ok(m.map(|m| m.as_str().to_string()).unwrap_or_default())
}
