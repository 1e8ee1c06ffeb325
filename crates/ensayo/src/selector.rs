//! Selector parsing and matching.
//!
//! Selectors are immutable once built and validated up front, so a typo fails
//! with [`EnsayoError::InvalidSelector`] before any waiting starts.
//!
//! Supported CSS subset:
//!
//! ```text
//! tag  *  #id  .class  [attr]  [attr=v]  [attr~=v]  [attr^=v]  [attr$=v]  [attr*=v]
//! :not(list)  :has-text("text")  :checked  :disabled  :enabled
//! descendant (space) and child (>) combinators, comma-separated lists
//! ```
//!
//! Matching works against any DOM implementing [`Element`].

use crate::result::{EnsayoError, EnsayoResult};
use serde::{Deserialize, Serialize};

/// Longest accepted selector source
pub const MAX_SELECTOR_LEN: usize = 10 * 1024;

// =============================================================================
// ELEMENT ABSTRACTION
// =============================================================================

/// Read-only view of a DOM element used for matching
pub trait Element: Clone {
    /// Lowercase tag name
    fn local_name(&self) -> String;
    /// Attribute value
    fn attribute(&self, name: &str) -> Option<String>;
    /// Concatenated descendant text
    fn text_content(&self) -> String;
    /// Parent element, `None` at the root
    fn parent_element(&self) -> Option<Self>;
    /// Child elements in document order
    fn children(&self) -> Vec<Self>;

    /// Checkbox/radio state
    fn is_checked(&self) -> bool {
        self.attribute("checked").is_some()
    }
}

/// Collapse whitespace runs and lowercase, for text matching
#[must_use]
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// =============================================================================
// SELECTOR
// =============================================================================

/// Declarative element descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "engine", content = "value", rename_all = "snake_case")]
pub enum Selector {
    /// CSS subset
    Css(CssSelector),
    /// Deepest elements whose text contains the value (case-insensitive)
    Text(String),
    /// `data-testid` attribute equals the value
    TestId(String),
    /// XPath expression, evaluated by real browsers only
    XPath(String),
}

impl Selector {
    /// Parse a prefixed selector: `text=`, `xpath=`, `data-testid=`, `css=`,
    /// a bare `//` XPath, or plain CSS.
    pub fn parse(source: &str) -> EnsayoResult<Self> {
        check_length(source)?;
        let trimmed = source.trim();
        if let Some(text) = trimmed.strip_prefix("text=") {
            return Self::text(unquote(text));
        }
        if let Some(id) = trimmed.strip_prefix("data-testid=") {
            return Self::test_id(unquote(id));
        }
        if let Some(xpath) = trimmed.strip_prefix("xpath=") {
            return Self::xpath(xpath);
        }
        if trimmed.starts_with("//") || trimmed.starts_with("(//") {
            return Self::xpath(trimmed);
        }
        let css = trimmed.strip_prefix("css=").unwrap_or(trimmed);
        Self::css(css)
    }

    /// Parse a CSS selector
    pub fn css(source: &str) -> EnsayoResult<Self> {
        CssSelector::parse(source).map(Self::Css)
    }

    /// Text selector
    pub fn text(text: impl Into<String>) -> EnsayoResult<Self> {
        let text = text.into();
        non_empty(&text, "text")?;
        Ok(Self::Text(text))
    }

    /// Test-id selector
    pub fn test_id(id: impl Into<String>) -> EnsayoResult<Self> {
        let id = id.into();
        non_empty(&id, "test id")?;
        Ok(Self::TestId(id))
    }

    /// XPath selector
    pub fn xpath(expr: impl Into<String>) -> EnsayoResult<Self> {
        let expr = expr.into();
        non_empty(&expr, "xpath")?;
        check_length(&expr)?;
        Ok(Self::XPath(expr))
    }

    /// Whether `el` itself satisfies this selector.
    ///
    /// `Text` matches any element containing the text; [`query_all`] narrows
    /// to the deepest ones. `XPath` never matches here.
    pub fn matches<E: Element>(&self, el: &E) -> bool {
        match self {
            Self::Css(css) => css.matches(el),
            Self::Text(text) => normalize_text(&el.text_content()).contains(&normalize_text(text)),
            Self::TestId(id) => el.attribute("data-testid").as_deref() == Some(id.as_str()),
            Self::XPath(_) => false,
        }
    }

    /// Whether this selector can be evaluated by [`query_all`]
    #[must_use]
    pub const fn is_portable(&self) -> bool {
        !matches!(self, Self::XPath(_))
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Css(css) => write!(f, "{}", css.source),
            Self::Text(text) => write!(f, "text={text:?}"),
            Self::TestId(id) => write!(f, "data-testid={id}"),
            Self::XPath(expr) => write!(f, "xpath={expr}"),
        }
    }
}

impl std::str::FromStr for Selector {
    type Err = EnsayoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// All elements under `root` (inclusive) matching `selector`, in document order
pub fn query_all<E: Element>(root: &E, selector: &Selector) -> Vec<E> {
    let mut out = Vec::new();
    collect(root, selector, &mut out);
    if let Selector::Text(text) = selector {
        let needle = normalize_text(text);
        out.retain(|el| {
            !el.children()
                .iter()
                .any(|child| normalize_text(&child.text_content()).contains(&needle))
        });
    }
    out
}

fn collect<E: Element>(el: &E, selector: &Selector, out: &mut Vec<E>) {
    if selector.matches(el) {
        out.push(el.clone());
    }
    for child in el.children() {
        collect(&child, selector, out);
    }
}

fn invalid(selector: &str, reason: impl Into<String>) -> EnsayoError {
    EnsayoError::InvalidSelector {
        selector: selector.to_string(),
        reason: reason.into(),
    }
}

fn check_length(source: &str) -> EnsayoResult<()> {
    if source.len() > MAX_SELECTOR_LEN {
        return Err(invalid(
            &source.chars().take(64).collect::<String>(),
            format!("longer than {MAX_SELECTOR_LEN} bytes"),
        ));
    }
    Ok(())
}

fn non_empty(value: &str, what: &str) -> EnsayoResult<()> {
    if value.trim().is_empty() {
        return Err(invalid(value, format!("empty {what}")));
    }
    Ok(())
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

// =============================================================================
// CSS AST
// =============================================================================

/// Parsed CSS selector list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CssSelector {
    source: String,
    groups: Vec<Complex>,
}

/// Compounds joined by combinators; each step records how it links to the
/// previous one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Complex {
    steps: Vec<Step>,
}

/// One compound plus its combinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    combinator: Combinator,
    compound: Compound,
}

/// Relationship to the previous compound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    /// Any ancestor (whitespace)
    Descendant,
    /// Direct parent (`>`)
    Child,
}

/// Tag plus simple filters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compound {
    tag: Option<String>,
    filters: Vec<Filter>,
}

/// Simple selector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    /// `#id`
    Id {
        /// Expected id
        value: String,
    },
    /// `.class`
    Class {
        /// Expected class
        value: String,
    },
    /// `[name op value]`
    Attr {
        /// Attribute name
        name: String,
        /// Operator and operand, `None` for presence
        test: Option<(AttrOp, String)>,
    },
    /// `:not(...)`
    Not {
        /// Excluded selectors
        groups: Vec<Complex>,
    },
    /// `:has-text("...")`
    HasText {
        /// Normalized needle
        value: String,
    },
    /// `:checked`
    Checked,
    /// `:disabled`
    Disabled,
    /// `:enabled`
    Enabled,
}

/// Attribute comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrOp {
    /// `=`
    Equals,
    /// `~=`
    Includes,
    /// `^=`
    Prefix,
    /// `$=`
    Suffix,
    /// `*=`
    Substring,
}

impl AttrOp {
    fn test(self, actual: &str, expected: &str) -> bool {
        match self {
            Self::Equals => actual == expected,
            Self::Includes => actual.split_whitespace().any(|w| w == expected),
            Self::Prefix => !expected.is_empty() && actual.starts_with(expected),
            Self::Suffix => !expected.is_empty() && actual.ends_with(expected),
            Self::Substring => !expected.is_empty() && actual.contains(expected),
        }
    }
}

impl CssSelector {
    /// Parse and validate CSS source
    pub fn parse(source: &str) -> EnsayoResult<Self> {
        check_length(source)?;
        non_empty(source, "selector")?;
        let mut parser = Parser::new(source);
        let groups = parser.selector_list()?;
        parser.skip_ws();
        if !parser.at_end() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(Self {
            source: source.trim().to_string(),
            groups,
        })
    }

    /// Original source text
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the selector uses `:has-text`, which browsers lack natively
    #[must_use]
    pub fn needs_text_engine(&self) -> bool {
        fn in_groups(groups: &[Complex]) -> bool {
            groups.iter().any(|g| {
                g.steps.iter().any(|s| {
                    s.compound.filters.iter().any(|f| match f {
                        Filter::HasText { .. } => true,
                        Filter::Not { groups } => in_groups(groups),
                        _ => false,
                    })
                })
            })
        }
        in_groups(&self.groups)
    }

    /// Whether `el` matches any group
    pub fn matches<E: Element>(&self, el: &E) -> bool {
        matches_groups(&self.groups, el)
    }
}

fn matches_groups<E: Element>(groups: &[Complex], el: &E) -> bool {
    groups.iter().any(|g| matches_steps(&g.steps, el))
}

fn matches_steps<E: Element>(steps: &[Step], el: &E) -> bool {
    let Some((last, rest)) = steps.split_last() else {
        return false;
    };
    if !last.compound.matches(el) {
        return false;
    }
    if rest.is_empty() {
        return true;
    }
    match last.combinator {
        Combinator::Child => el
            .parent_element()
            .is_some_and(|parent| matches_steps(rest, &parent)),
        Combinator::Descendant => {
            let mut current = el.parent_element();
            while let Some(ancestor) = current {
                if matches_steps(rest, &ancestor) {
                    return true;
                }
                current = ancestor.parent_element();
            }
            false
        }
    }
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none() && self.filters.is_empty()
    }

    fn matches<E: Element>(&self, el: &E) -> bool {
        if let Some(tag) = &self.tag {
            if tag != "*" && !el.local_name().eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        self.filters.iter().all(|f| f.matches(el))
    }
}

impl Filter {
    fn matches<E: Element>(&self, el: &E) -> bool {
        match self {
            Self::Id { value } => el.attribute("id").as_deref() == Some(value.as_str()),
            Self::Class { value } => el
                .attribute("class")
                .is_some_and(|c| c.split_whitespace().any(|w| w == value)),
            Self::Attr { name, test } => match (el.attribute(name), test) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(actual), Some((op, expected))) => op.test(&actual, expected),
            },
            Self::Not { groups } => !matches_groups(groups, el),
            Self::HasText { value } => normalize_text(&el.text_content()).contains(value.as_str()),
            Self::Checked => el.is_checked(),
            Self::Disabled => el.attribute("disabled").is_some(),
            Self::Enabled => el.attribute("disabled").is_none(),
        }
    }
}

// =============================================================================
// PARSER
// =============================================================================

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: &str) -> EnsayoError {
        invalid(self.source, format!("{reason} at offset {}", self.pos))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn selector_list(&mut self) -> EnsayoResult<Vec<Complex>> {
        let mut groups = vec![self.complex()?];
        loop {
            self.skip_ws();
            if !self.eat(',') {
                return Ok(groups);
            }
            groups.push(self.complex()?);
        }
    }

    fn complex(&mut self) -> EnsayoResult<Complex> {
        self.skip_ws();
        let first = self.compound()?;
        let mut steps = vec![Step {
            combinator: Combinator::Descendant,
            compound: first,
        }];
        loop {
            let had_ws = self.skip_ws();
            let combinator = if self.eat('>') {
                self.skip_ws();
                Combinator::Child
            } else if had_ws && self.starts_compound() {
                Combinator::Descendant
            } else {
                return Ok(Complex { steps });
            };
            let compound = self.compound()?;
            steps.push(Step {
                combinator,
                compound,
            });
        }
    }

    fn starts_compound(&self) -> bool {
        self.peek()
            .is_some_and(|c| is_ident_char(c) || matches!(c, '*' | '#' | '.' | '[' | ':'))
    }

    fn compound(&mut self) -> EnsayoResult<Compound> {
        let mut compound = Compound::default();
        if self.eat('*') {
            compound.tag = Some("*".to_string());
        } else if self.peek().is_some_and(is_ident_char) {
            compound.tag = Some(self.ident()?.to_lowercase());
        }
        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    compound.filters.push(Filter::Id {
                        value: self.ident()?,
                    });
                }
                Some('.') => {
                    self.pos += 1;
                    compound.filters.push(Filter::Class {
                        value: self.ident()?,
                    });
                }
                Some('[') => {
                    self.pos += 1;
                    compound.filters.push(self.attribute()?);
                }
                Some(':') => {
                    self.pos += 1;
                    compound.filters.push(self.pseudo()?);
                }
                _ => break,
            }
        }
        if compound.is_empty() {
            return Err(self.error("expected a selector"));
        }
        Ok(compound)
    }

    fn ident(&mut self) -> EnsayoResult<String> {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected an identifier"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn string(&mut self) -> EnsayoResult<String> {
        let Some(quote) = self.bump().filter(|c| *c == '"' || *c == '\'') else {
            return Err(self.error("expected a quoted string"));
        };
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('\\') => match self.bump() {
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
            }
        }
    }

    fn attribute(&mut self) -> EnsayoResult<Filter> {
        self.skip_ws();
        let name = self.ident()?.to_lowercase();
        self.skip_ws();
        if self.eat(']') {
            return Ok(Filter::Attr { name, test: None });
        }
        let op = match self.bump() {
            Some('=') => AttrOp::Equals,
            Some(c @ ('~' | '^' | '$' | '*')) if self.eat('=') => match c {
                '~' => AttrOp::Includes,
                '^' => AttrOp::Prefix,
                '$' => AttrOp::Suffix,
                _ => AttrOp::Substring,
            },
            _ => return Err(self.error("expected an attribute operator")),
        };
        self.skip_ws();
        let value = if matches!(self.peek(), Some('"' | '\'')) {
            self.string()?
        } else {
            self.ident()?
        };
        self.skip_ws();
        if !self.eat(']') {
            return Err(self.error("expected ']'"));
        }
        Ok(Filter::Attr {
            name,
            test: Some((op, value)),
        })
    }

    fn pseudo(&mut self) -> EnsayoResult<Filter> {
        let name = self.ident()?.to_lowercase();
        match name.as_str() {
            "checked" => Ok(Filter::Checked),
            "disabled" => Ok(Filter::Disabled),
            "enabled" => Ok(Filter::Enabled),
            "not" => {
                self.open_paren()?;
                let groups = self.selector_list()?;
                self.close_paren()?;
                Ok(Filter::Not { groups })
            }
            "has-text" => {
                self.open_paren()?;
                let text = self.string()?;
                self.close_paren()?;
                let value = normalize_text(&text);
                if value.is_empty() {
                    return Err(self.error(":has-text() needs non-empty text"));
                }
                Ok(Filter::HasText { value })
            }
            other => Err(self.error(&format!("unsupported pseudo-class ':{other}'"))),
        }
    }

    fn open_paren(&mut self) -> EnsayoResult<()> {
        if !self.eat('(') {
            return Err(self.error("expected '('"));
        }
        self.skip_ws();
        Ok(())
    }

    fn close_paren(&mut self) -> EnsayoResult<()> {
        self.skip_ws();
        if !self.eat(')') {
            return Err(self.error("expected ')'"));
        }
        Ok(())
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::rc::Rc;

    #[derive(Debug)]
    struct Node {
        tag: &'static str,
        attrs: Vec<(&'static str, &'static str)>,
        text: &'static str,
        children: Vec<Rc<Node>>,
    }

    /// Test element: node plus its ancestor path
    #[derive(Debug, Clone)]
    struct El {
        path: Vec<Rc<Node>>,
    }

    impl El {
        fn node(&self) -> &Rc<Node> {
            self.path.last().unwrap()
        }
    }

    impl Element for El {
        fn local_name(&self) -> String {
            self.node().tag.to_string()
        }

        fn attribute(&self, name: &str) -> Option<String> {
            self.node()
                .attrs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| (*v).to_string())
        }

        fn text_content(&self) -> String {
            fn walk(node: &Node, out: &mut String) {
                out.push_str(node.text);
                for child in &node.children {
                    walk(child, out);
                }
            }
            let mut out = String::new();
            walk(self.node(), &mut out);
            out
        }

        fn parent_element(&self) -> Option<Self> {
            (self.path.len() > 1).then(|| Self {
                path: self.path[..self.path.len() - 1].to_vec(),
            })
        }

        fn children(&self) -> Vec<Self> {
            self.node()
                .children
                .iter()
                .map(|child| {
                    let mut path = self.path.clone();
                    path.push(Rc::clone(child));
                    Self { path }
                })
                .collect()
        }
    }

    fn node(
        tag: &'static str,
        attrs: Vec<(&'static str, &'static str)>,
        text: &'static str,
        children: Vec<Rc<Node>>,
    ) -> Rc<Node> {
        Rc::new(Node {
            tag,
            attrs,
            text,
            children,
        })
    }

    fn page() -> El {
        let form = node(
            "form",
            vec![("id", "input-example")],
            "",
            vec![
                node(
                    "input",
                    vec![("type", "text"), ("disabled", "")],
                    "",
                    vec![],
                ),
                node("button", vec![("type", "button")], "Enable", vec![]),
            ],
        );
        let checkbox = node(
            "div",
            vec![("id", "checkbox")],
            "",
            vec![node(
                "input",
                vec![("type", "checkbox"), ("class", "box big")],
                " A checkbox",
                vec![],
            )],
        );
        let body = node(
            "body",
            vec![],
            "",
            vec![
                node("h3", vec![], "Dynamic Controls", vec![]),
                checkbox,
                form,
                node("p", vec![("data-testid", "status")], "It's gone!", vec![]),
            ],
        );
        El { path: vec![body] }
    }

    fn select(source: &str) -> Vec<String> {
        let selector = Selector::parse(source).unwrap();
        query_all(&page(), &selector)
            .iter()
            .map(|el| el.local_name())
            .collect()
    }

    mod parse_tests {
        use super::*;

        #[test]
        fn test_parse_prefixes() {
            assert!(matches!(Selector::parse("text=Enable").unwrap(), Selector::Text(t) if t == "Enable"));
            assert!(matches!(Selector::parse("text=\"Enable\"").unwrap(), Selector::Text(t) if t == "Enable"));
            assert!(matches!(Selector::parse("//div[@id='x']").unwrap(), Selector::XPath(_)));
            assert!(matches!(Selector::parse("data-testid=status").unwrap(), Selector::TestId(_)));
            assert!(matches!(Selector::parse("css=#x").unwrap(), Selector::Css(_)));
        }

        #[test]
        fn test_rejects_invalid() {
            for bad in [
                "",
                "   ",
                "div[",
                "div >",
                "#",
                "button:has-text(Enable)",
                ":hover",
                "a[href^]",
                "a,",
                "text=",
            ] {
                let err = Selector::parse(bad).unwrap_err();
                assert!(
                    matches!(err, EnsayoError::InvalidSelector { .. }),
                    "{bad:?} gave {err:?}"
                );
            }
        }

        #[test]
        fn test_rejects_oversized() {
            let huge = "a".repeat(MAX_SELECTOR_LEN + 1);
            assert!(Selector::parse(&huge).is_err());
        }

        #[test]
        fn test_display_roundtrips_source() {
            let sel = Selector::parse("  input[type=\"text\"]:not([disabled]) ").unwrap();
            assert_eq!(sel.to_string(), "input[type=\"text\"]:not([disabled])");
        }

        #[test]
        fn test_needs_text_engine() {
            let Selector::Css(css) = Selector::parse("form :not(button:has-text('x'))").unwrap() else {
                panic!("expected css");
            };
            assert!(css.needs_text_engine());
            let Selector::Css(css) = Selector::parse("form button").unwrap() else {
                panic!("expected css");
            };
            assert!(!css.needs_text_engine());
        }
    }

    mod match_tests {
        use super::*;

        #[test]
        fn test_tag_id_class() {
            assert_eq!(select("h3"), vec!["h3"]);
            assert_eq!(select("#checkbox"), vec!["div"]);
            assert_eq!(select(".big"), vec!["input"]);
            assert_eq!(select("input.box.big"), vec!["input"]);
        }

        #[test]
        fn test_attribute_operators() {
            assert_eq!(select("input[type=checkbox]"), vec!["input"]);
            assert_eq!(select("[class~=box]"), vec!["input"]);
            assert_eq!(select("[type^=che]"), vec!["input"]);
            assert_eq!(select("[type$=box]"), vec!["input"]);
            assert_eq!(select("[type*=eck]"), vec!["input"]);
            assert_eq!(select("[disabled]"), vec!["input"]);
        }

        #[test]
        fn test_enabled_text_input_filter() {
            assert!(select("input[type=\"text\"]:not([disabled])").is_empty());
            assert_eq!(select("input[type=\"text\"]:disabled"), vec!["input"]);
            assert_eq!(select("input:enabled").len(), 1);
        }

        #[test]
        fn test_has_text() {
            assert_eq!(select("button:has-text(\"Enable\")"), vec!["button"]);
            assert_eq!(select("button:has-text('enable')"), vec!["button"]);
            assert!(select("button:has-text(\"Disable\")").is_empty());
        }

        #[test]
        fn test_combinators() {
            assert_eq!(select("#input-example > button"), vec!["button"]);
            assert_eq!(select("body input"), vec!["input", "input"]);
            assert!(select("body > input").is_empty());
            assert_eq!(select("body > form > input").len(), 1);
        }

        #[test]
        fn test_selector_list_document_order() {
            assert_eq!(select("p, h3"), vec!["h3", "p"]);
        }

        #[test]
        fn test_text_selector_picks_deepest() {
            assert_eq!(select("text=gone"), vec!["p"]);
            assert_eq!(select("text=Dynamic controls"), vec!["h3"]);
        }

        #[test]
        fn test_test_id() {
            assert_eq!(select("data-testid=status"), vec!["p"]);
        }

        #[test]
        fn test_xpath_not_portable() {
            let sel = Selector::parse("//p").unwrap();
            assert!(!sel.is_portable());
            assert!(query_all(&page(), &sel).is_empty());
        }
    }

    mod property_tests {
        use super::*;

        proptest! {
            #[test]
            fn prop_parse_never_panics(source in ".{0,64}") {
                let _ = Selector::parse(&source);
            }

            #[test]
            fn prop_identifiers_parse(tag in "[a-z][a-z0-9]{0,8}", class in "[a-z][a-z0-9_-]{0,8}") {
                let source = format!("{tag}.{class} > #{class}");
                let parsed = Selector::css(&source).unwrap();
                prop_assert_eq!(parsed.to_string(), source);
            }
        }
    }
}
