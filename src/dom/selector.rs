//! A CSS selector subset: type/universal, `#id`, `.class`, attribute
//! selectors (`[a]`, `=`, `~=`, `^=`, `$=`, `*=`), descendant and child
//! combinators, and comma-separated lists.

use super::NodeId;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid selector '{input}': {reason}")]
pub struct SelectorError {
    pub input: String,
    pub reason: String,
}

/// What the matcher needs to know about a document.
pub trait SelectorSubject {
    fn tag(&self, id: NodeId) -> Option<&str>;
    fn attr(&self, id: NodeId, name: &str) -> Option<&str>;
    fn parent_element(&self, id: NodeId) -> Option<NodeId>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectorList(Vec<Complex>);

#[derive(Debug, Clone, PartialEq)]
struct Complex {
    /// Rightmost compound last. The combinator attached to a compound
    /// relates it to the compound on its left.
    parts: Vec<(Combinator, Compound)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrSelector>,
}

#[derive(Debug, Clone, PartialEq)]
struct AttrSelector {
    name: String,
    op: Option<(AttrOp, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AttrOp {
    Equals,
    Includes,
    Prefix,
    Suffix,
    Contains,
}

impl FromStr for SelectorList {
    type Err = SelectorError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let fail = |reason: &str| SelectorError {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let mut list = Vec::new();
        for group in split_groups(input) {
            let group = group.trim();
            if group.is_empty() {
                return Err(fail("empty selector"));
            }
            list.push(parse_complex(group).map_err(|reason| fail(&reason))?);
        }
        if list.is_empty() {
            return Err(fail("empty selector"));
        }
        Ok(SelectorList(list))
    }
}

impl SelectorList {
    pub fn matches<S: SelectorSubject + ?Sized>(&self, subject: &S, id: NodeId) -> bool {
        self.0.iter().any(|c| c.matches(subject, id))
    }
}

impl Complex {
    fn matches<S: SelectorSubject + ?Sized>(&self, subject: &S, id: NodeId) -> bool {
        match_from(subject, &self.parts, self.parts.len() - 1, id)
    }
}

fn match_from<S: SelectorSubject + ?Sized>(
    subject: &S,
    parts: &[(Combinator, Compound)],
    index: usize,
    id: NodeId,
) -> bool {
    let (combinator, compound) = &parts[index];
    if !compound.matches(subject, id) {
        return false;
    }
    if index == 0 {
        return true;
    }
    match combinator {
        Combinator::Child => subject
            .parent_element(id)
            .is_some_and(|parent| match_from(subject, parts, index - 1, parent)),
        Combinator::Descendant => {
            let mut ancestor = subject.parent_element(id);
            while let Some(current) = ancestor {
                if match_from(subject, parts, index - 1, current) {
                    return true;
                }
                ancestor = subject.parent_element(current);
            }
            false
        }
    }
}

impl Compound {
    fn matches<S: SelectorSubject + ?Sized>(&self, subject: &S, id: NodeId) -> bool {
        let Some(tag) = subject.tag(id) else {
            return false;
        };
        if let Some(expected) = &self.tag {
            if !expected.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(expected) = &self.id {
            if subject.attr(id, "id") != Some(expected.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let classes = subject.attr(id, "class").unwrap_or("");
            if !self
                .classes
                .iter()
                .all(|c| classes.split_whitespace().any(|have| have == c))
            {
                return false;
            }
        }
        self.attrs.iter().all(|a| a.matches(subject.attr(id, &a.name)))
    }
}

impl AttrSelector {
    fn matches(&self, value: Option<&str>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match &self.op {
            None => true,
            Some((AttrOp::Equals, expected)) => value == expected,
            Some((AttrOp::Includes, expected)) => value.split_whitespace().any(|v| v == expected),
            Some((AttrOp::Prefix, expected)) => !expected.is_empty() && value.starts_with(expected.as_str()),
            Some((AttrOp::Suffix, expected)) => !expected.is_empty() && value.ends_with(expected.as_str()),
            Some((AttrOp::Contains, expected)) => !expected.is_empty() && value.contains(expected.as_str()),
        }
    }
}

/// Split on commas that are not inside brackets or quotes.
fn split_groups(input: &str) -> Vec<&str> {
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                groups.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    groups.push(&input[start..]);
    groups
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn parse_complex(input: &str) -> Result<Complex, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut pos = 0;
    let mut parts = Vec::new();
    let mut pending = Combinator::Descendant;

    while pos < chars.len() {
        let c = chars[pos];
        if c.is_whitespace() {
            pos += 1;
            continue;
        }
        if c == '>' {
            if parts.is_empty() {
                return Err("selector starts with a combinator".into());
            }
            pending = Combinator::Child;
            pos += 1;
            continue;
        }
        let compound = parse_compound(&chars, &mut pos)?;
        parts.push((pending, compound));
        pending = Combinator::Descendant;
    }

    if parts.is_empty() {
        return Err("empty selector".into());
    }
    if pending == Combinator::Child {
        return Err("dangling combinator".into());
    }
    Ok(Complex { parts })
}

fn parse_ident(chars: &[char], pos: &mut usize) -> Result<String, String> {
    let start = *pos;
    while *pos < chars.len() && is_ident_char(chars[*pos]) {
        *pos += 1;
    }
    if start == *pos {
        return Err(format!("expected identifier at {}", start));
    }
    Ok(chars[start..*pos].iter().collect())
}

fn parse_compound(chars: &[char], pos: &mut usize) -> Result<Compound, String> {
    let mut compound = Compound::default();
    let start = *pos;

    if chars[*pos] == '*' {
        *pos += 1;
    } else if is_ident_char(chars[*pos]) {
        compound.tag = Some(parse_ident(chars, pos)?.to_ascii_lowercase());
    }

    while *pos < chars.len() {
        match chars[*pos] {
            '#' => {
                *pos += 1;
                compound.id = Some(parse_ident(chars, pos)?);
            }
            '.' => {
                *pos += 1;
                compound.classes.push(parse_ident(chars, pos)?);
            }
            '[' => {
                *pos += 1;
                compound.attrs.push(parse_attr(chars, pos)?);
            }
            ':' => return Err("pseudo-classes are not supported".into()),
            c if c.is_whitespace() || c == '>' => break,
            c => return Err(format!("unexpected '{}'", c)),
        }
    }

    if *pos == start {
        return Err("empty compound selector".into());
    }
    Ok(compound)
}

fn skip_ws(chars: &[char], pos: &mut usize) {
    while *pos < chars.len() && chars[*pos].is_whitespace() {
        *pos += 1;
    }
}

fn parse_attr(chars: &[char], pos: &mut usize) -> Result<AttrSelector, String> {
    skip_ws(chars, pos);
    let name = parse_ident(chars, pos)?.to_ascii_lowercase();
    skip_ws(chars, pos);

    let op = match chars.get(*pos) {
        Some(']') => {
            *pos += 1;
            return Ok(AttrSelector { name, op: None });
        }
        Some('=') => {
            *pos += 1;
            AttrOp::Equals
        }
        Some(c @ ('~' | '^' | '$' | '*')) if chars.get(*pos + 1) == Some(&'=') => {
            let op = match c {
                '~' => AttrOp::Includes,
                '^' => AttrOp::Prefix,
                '$' => AttrOp::Suffix,
                _ => AttrOp::Contains,
            };
            *pos += 2;
            op
        }
        _ => return Err("malformed attribute selector".into()),
    };

    skip_ws(chars, pos);
    let value = match chars.get(*pos) {
        Some(&q @ ('"' | '\'')) => {
            *pos += 1;
            let start = *pos;
            while *pos < chars.len() && chars[*pos] != q {
                *pos += 1;
            }
            if *pos >= chars.len() {
                return Err("unterminated string".into());
            }
            let value: String = chars[start..*pos].iter().collect();
            *pos += 1;
            value
        }
        Some(_) => {
            let start = *pos;
            while *pos < chars.len() && chars[*pos] != ']' && !chars[*pos].is_whitespace() {
                *pos += 1;
            }
            chars[start..*pos].iter().collect()
        }
        None => return Err("unterminated attribute selector".into()),
    };

    skip_ws(chars, pos);
    if chars.get(*pos) != Some(&']') {
        return Err("expected ']'".into());
    }
    *pos += 1;
    Ok(AttrSelector {
        name,
        op: Some((op, value)),
    })
}
