use serde::{Deserialize, Serialize};
use sieve_types::{BotStatus, ScriptSettings};

/// A compiled script: settings plus the ordered steps to run per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptProgram {
    pub settings: ScriptSettings,
    pub steps: Vec<Step>,
}

impl ScriptProgram {
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.steps.iter().map(|s| &s.operation)
    }
}

/// One operation together with where it came from in the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based line number of the first physical line.
    pub line: usize,
    pub label: Option<String>,
    pub operation: Operation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Request(RequestOp),
    Extract(ExtractOp),
    Function(FunctionOp),
    Keycheck(KeycheckOp),
    Set(SetOp),
    Browser(BrowserAction),
    Page(PageOp),
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Request(_) => "REQUEST",
            Operation::Extract(_) => "PARSE",
            Operation::Function(_) => "FUNCTION",
            Operation::Keycheck(_) => "KEYCHECK",
            Operation::Set(_) => "SET",
            Operation::Browser(_) => "BROWSERACTION",
            Operation::Page(_) => "PAGEACTION",
        }
    }
}

/// `-> VAR "name"` or `-> CAP "name"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTarget {
    pub name: String,
    pub capture: bool,
}

// ---------------------------------------------------------------------------
// REQUEST
// ---------------------------------------------------------------------------

pub const DEFAULT_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOp {
    pub method: String,
    pub url: String,
    /// Header templates, in declaration order.
    pub headers: Vec<(String, String)>,
    /// Cookie templates in `name=value` form.
    pub cookies: Vec<String>,
    /// Body templates; `Standard` uses the first one, `Multipart` all of
    /// them as `name:value` pairs.
    pub contents: Vec<String>,
    pub content_type: String,
    pub body_kind: BodyKind,
    pub read_response: bool,
    pub output: Option<OutputTarget>,
}

impl RequestOp {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            cookies: Vec::new(),
            contents: Vec::new(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            body_kind: BodyKind::Standard,
            read_response: true,
            output: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyKind {
    Standard,
    Multipart,
}

// ---------------------------------------------------------------------------
// PARSE
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractOp {
    pub source: String,
    pub extraction: Extraction,
    pub output: Option<OutputTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Extraction {
    LeftRight { left: String, right: String },
    Css { selector: String, attribute: String },
    XPath { selector: String, attribute: String },
    Json { path: String },
    Regex { pattern: String, group: String },
}

// ---------------------------------------------------------------------------
// FUNCTION
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionOp {
    pub action: FunctionAction,
    pub output: Option<OutputTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FunctionAction {
    Base64Decode(String),
    Base64Encode(String),
    ClearCookies,
    Constant(String),
    CurrentUnixTime,
    /// Milliseconds, resolved as a template at run time.
    Delay(String),
    RandomUserAgent(String),
    Hash { algorithm: HashAlgorithm, input: String },
    HtmlDecode(String),
    HtmlEncode(String),
    UrlDecode(String),
    UrlEncode(String),
    Length(String),
    RandomString(String),
    ToLowercase(String),
    ToUppercase(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "md5" => Some(HashAlgorithm::Md5),
            "sha1" => Some(HashAlgorithm::Sha1),
            "sha256" => Some(HashAlgorithm::Sha256),
            "sha384" => Some(HashAlgorithm::Sha384),
            "sha512" => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// KEYCHECK
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeycheckOp {
    pub keychains: Vec<Keychain>,
    /// Classify as `ban` when no keychain matched.
    pub ban_on_no_match: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keychain {
    pub status: BotStatus,
    pub mode: ChainMode,
    pub keys: Vec<Key>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainMode {
    /// Any key matching is enough.
    Or,
    /// Every key must match.
    And,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    pub source: String,
    pub comparison: Comparison,
    pub value: String,
}

/// Source template a `KEY` checks when it names no explicit source.
pub const DEFAULT_KEY_SOURCE: &str = "<data.source>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    LessThan,
    GreaterThan,
    EqualTo,
    NotEqualTo,
    Contains,
    DoesNotContain,
    MatchesRegex,
    DoesNotMatchRegex,
}

impl Comparison {
    pub fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "lessthan" => Some(Comparison::LessThan),
            "greaterthan" => Some(Comparison::GreaterThan),
            "equalto" => Some(Comparison::EqualTo),
            "notequalto" => Some(Comparison::NotEqualTo),
            "contains" => Some(Comparison::Contains),
            "doesnotcontain" => Some(Comparison::DoesNotContain),
            "matchesregex" => Some(Comparison::MatchesRegex),
            "doesnotmatchregex" => Some(Comparison::DoesNotMatchRegex),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// SET
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SetOp {
    Capture { name: String, value: String },
    Variable { name: String, value: String },
    UseProxy(bool),
}

// ---------------------------------------------------------------------------
// BROWSERACTION / PAGEACTION
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrowserAction {
    Open,
    Close,
    ClearCookies,
    GetCookies,
    SetCookies,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageOp {
    pub action: PageAction,
    /// Header templates in `name: value` form, applied by `SETHEADERS`.
    pub headers: Vec<String>,
    /// Delay between typed characters for `SENDKEY`.
    pub key_delay_ms: u64,
    pub output: Option<OutputTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PageAction {
    Click { selector: String },
    Evaluate { expression: String },
    GetAttribute { selector: String, attribute: String },
    GetAddress,
    GetContent,
    GoTo { url: String },
    PressKey { key: String },
    Reload,
    SendKey { selector: String, text: String },
    SetHeaders,
    WaitForResponse { url: String },
    WaitForSelector { selector: String },
    WaitForTimeout { millis: String },
}
