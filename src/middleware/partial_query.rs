//! Partial responses: reduce a JSON origin body to the fields a caller asks for.
//!
//! # Mask grammar
//! ```text
//! mask   := item ("," item)*
//! item   := path [ "(" mask ")" | "[" mask "]" ]
//! path   := key (("." | "/") key)*
//! key    := name | "*"
//! ```
//! `a,b.c` keeps `a` and `c` inside `b`; `items(id,name)` keeps `id` and
//! `name` of every element of `items`; `*` matches every key at its level.
//! Arrays are masked element by element. Objects that end up empty below the
//! top level are dropped.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::middleware::{Flow, Stage};
use crate::proxy::context::RequestContext;
use crate::proxy::error::ProxyError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MaskError {
    #[error("empty field name at position {0}")]
    EmptyField(usize),

    #[error("unexpected '{found}' at position {pos}")]
    Unexpected { found: char, pos: usize },

    #[error("unclosed group opened at position {0}")]
    Unclosed(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Key {
    Name(String),
    Any,
}

/// A parsed field mask. `None` as a sub-mask keeps the whole value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMask {
    fields: Vec<(Key, Option<FieldMask>)>,
}

impl FieldMask {
    pub fn parse(expr: &str) -> Result<Self, MaskError> {
        let mut parser = Parser {
            chars: expr.chars().collect(),
            pos: 0,
        };
        let mask = parser.list(None)?;
        if let Some(c) = parser.peek() {
            return Err(MaskError::Unexpected {
                found: c,
                pos: parser.pos,
            });
        }
        Ok(mask)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Apply to a whole document. Scalars pass through unchanged.
    pub fn apply(&self, value: &Value) -> Value {
        match value {
            Value::Object(object) => Value::Object(self.select(object)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .filter_map(|item| project(item, Some(self)))
                    .collect(),
            ),
            scalar => scalar.clone(),
        }
    }

    fn select(&self, object: &Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::new();
        for (key, sub) in &self.fields {
            match key {
                Key::Name(name) => {
                    if out.contains_key(name) {
                        continue;
                    }
                    if let Some(projected) = object.get(name).and_then(|v| project(v, sub.as_ref())) {
                        out.insert(name.clone(), projected);
                    }
                }
                Key::Any => {
                    for (name, value) in object {
                        if out.contains_key(name) {
                            continue;
                        }
                        if let Some(projected) = project(value, sub.as_ref()) {
                            out.insert(name.clone(), projected);
                        }
                    }
                }
            }
        }
        out
    }

    fn merge(&mut self, key: Key, sub: Option<FieldMask>) {
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => match sub {
                None => *existing = None,
                Some(incoming) => {
                    // a `None` here already keeps the whole value
                    if let Some(current) = existing {
                        for (k, s) in incoming.fields {
                            current.merge(k, s);
                        }
                    }
                }
            },
            None => self.fields.push((key, sub)),
        }
    }

    fn insert_path(&mut self, mut path: Vec<Key>, sub: Option<FieldMask>) {
        let first = path.remove(0);
        if path.is_empty() {
            self.merge(first, sub);
        } else {
            let mut nested = FieldMask::default();
            nested.insert_path(path, sub);
            self.merge(first, Some(nested));
        }
    }
}

fn project(value: &Value, mask: Option<&FieldMask>) -> Option<Value> {
    let Some(mask) = mask else {
        return Some(value.clone());
    };
    match value {
        Value::Object(object) => {
            let selected = mask.select(object);
            (!selected.is_empty()).then_some(Value::Object(selected))
        }
        Value::Array(items) => Some(Value::Array(
            items.iter().filter_map(|item| project(item, Some(mask))).collect(),
        )),
        _ => None,
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    /// `close` is the bracket that ends this list, if nested.
    fn list(&mut self, close: Option<char>) -> Result<FieldMask, MaskError> {
        let mut mask = FieldMask::default();
        loop {
            let path = self.path()?;
            self.skip_ws();
            let sub = match self.peek() {
                Some(open @ ('(' | '[')) => {
                    let opened = self.pos;
                    self.pos += 1;
                    let closing = if open == '(' { ')' } else { ']' };
                    let inner = self.list(Some(closing))?;
                    match self.peek() {
                        Some(c) if c == closing => self.pos += 1,
                        _ => return Err(MaskError::Unclosed(opened)),
                    }
                    Some(inner)
                }
                _ => None,
            };
            mask.insert_path(path, sub);
            self.skip_ws();

            match self.peek() {
                Some(',') => self.pos += 1,
                None => return Ok(mask),
                Some(c) if Some(c) == close => return Ok(mask),
                Some(c) => return Err(MaskError::Unexpected { found: c, pos: self.pos }),
            }
        }
    }

    fn path(&mut self) -> Result<Vec<Key>, MaskError> {
        let mut path = vec![self.key()?];
        while let Some('.' | '/') = self.peek() {
            self.pos += 1;
            path.push(self.key()?);
        }
        Ok(path)
    }

    fn key(&mut self) -> Result<Key, MaskError> {
        self.skip_ws();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, ',' | '.' | '/' | '(' | ')' | '[' | ']') {
                break;
            }
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        let name = name.trim();
        match name {
            "" => Err(MaskError::EmptyField(start)),
            "*" => Ok(Key::Any),
            _ => Ok(Key::Name(name.to_string())),
        }
    }
}

/// Applies the request's field mask to a JSON origin body.
///
/// Bodies that are not JSON are passed through untouched.
pub struct PartialQueryStage;

#[async_trait]
impl Stage for PartialQueryStage {
    fn name(&self) -> &'static str {
        "partial_query"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, ProxyError> {
        if !ctx.route.partial_query.enabled {
            return Ok(Flow::Next);
        }
        let (Some(mask), Some(result)) = (ctx.filter.as_ref(), ctx.result.as_mut()) else {
            return Ok(Flow::Next);
        };

        let body = result.bytes().await?;
        let document: Value = match serde_json::from_slice(&body) {
            Ok(document) => document,
            Err(e) => {
                debug!(route = %ctx.route.id, error = %e, "Origin body is not JSON, filter skipped");
                return Ok(Flow::Next);
            }
        };

        match serde_json::to_vec(&mask.apply(&document)) {
            Ok(filtered) => result.replace_body(filtered.into(), "application/json"),
            Err(e) => debug!(route = %ctx.route.id, error = %e, "Failed to encode filtered body"),
        }
        Ok(Flow::Next)
    }
}
