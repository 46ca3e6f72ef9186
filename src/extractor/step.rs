//! Minimal STEP (ISO-10303-21) instance parser, scoped to the handful of
//! attribute shapes the Extractor needs: strings, enumerations, references,
//! nulls, and nested lists. This is not a general STEP/EXPRESS reader — it
//! does not resolve schema types or validate arity, it only tokenizes the
//! `DATA` section into `(entity_type, attributes)` pairs keyed by instance id.

use std::collections::HashMap;

use crate::error::{BimAtlasError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum StepValue {
    String(String),
    Enum(String),
    Ref(u64),
    Null,
    List(Vec<StepValue>),
}

impl StepValue {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            StepValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_ref_id(&self) -> Option<u64> {
        match self {
            StepValue::Ref(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[StepValue]> {
        match self {
            StepValue::List(items) => Some(items),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepInstance {
    pub id: u64,
    pub entity_type: String,
    pub attributes: Vec<StepValue>,
}

#[derive(Debug, Clone, Default)]
pub struct StepModel {
    instances: HashMap<u64, StepInstance>,
}

impl StepModel {
    pub fn get(&self, id: u64) -> Option<&StepInstance> {
        self.instances.get(&id)
    }

    pub fn all(&self) -> impl Iterator<Item = &StepInstance> {
        self.instances.values()
    }

    pub fn of_type<'a>(&'a self, entity_type: &'a str) -> impl Iterator<Item = &'a StepInstance> {
        self.all().filter(move |i| i.entity_type == entity_type)
    }
}

/// Parse the `DATA` section of a STEP file. Header sections are ignored —
/// this crate has no use for `FILE_DESCRIPTION`/`FILE_SCHEMA`.
pub fn parse_step(text: &str) -> Result<StepModel> {
    let mut instances = HashMap::new();

    for raw_stmt in split_statements(text) {
        let stmt = raw_stmt.trim();
        if stmt.is_empty() || !stmt.starts_with('#') {
            continue;
        }
        let eq_pos = stmt.find('=').ok_or_else(|| {
            BimAtlasError::Extraction(format!("malformed STEP statement (no '='): {stmt}"))
        })?;
        let id_part = &stmt[1..eq_pos];
        let id: u64 = id_part.trim().parse().map_err(|_| {
            BimAtlasError::Extraction(format!("malformed STEP instance id: {id_part}"))
        })?;

        let rest = stmt[eq_pos + 1..].trim();
        let open = rest.find('(').ok_or_else(|| {
            BimAtlasError::Extraction(format!("malformed STEP statement (no '('): {stmt}"))
        })?;
        let entity_type = rest[..open].trim().to_uppercase();
        let args_str = rest[open..].trim();
        let args_str = args_str
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| {
                BimAtlasError::Extraction(format!("malformed STEP argument list: {stmt}"))
            })?;

        let attributes = parse_attribute_list(args_str)?;
        instances.insert(
            id,
            StepInstance {
                id,
                entity_type,
                attributes,
            },
        );
    }

    Ok(StepModel { instances })
}

/// Split the raw text into `;`-terminated statements, respecting quoted
/// strings so a semicolon inside a name never splits a statement early.
fn split_statements(text: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_string = !in_string;
                current.push(c);
            }
            ';' if !in_string => {
                statements.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        statements.push(current);
    }
    statements
}

fn parse_attribute_list(s: &str) -> Result<Vec<StepValue>> {
    let tokens = split_top_level(s);
    tokens.iter().map(|t| parse_value(t.trim())).collect()
}

/// Split a comma-separated argument list at the top nesting level only.
fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_string = false;

    for c in s.chars() {
        match c {
            '\'' => {
                in_string = !in_string;
                current.push(c);
            }
            '(' if !in_string => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_string => {
                depth -= 1;
                current.push(c);
            }
            ',' if !in_string && depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current);
    }
    parts
}

fn parse_value(tok: &str) -> Result<StepValue> {
    if tok.is_empty() || tok == "$" {
        return Ok(StepValue::Null);
    }
    if let Some(stripped) = tok.strip_prefix('#') {
        let id: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| BimAtlasError::Extraction(format!("malformed STEP reference: {tok}")))?;
        return Ok(StepValue::Ref(id));
    }
    if tok.starts_with('\'') && tok.ends_with('\'') && tok.len() >= 2 {
        return Ok(StepValue::String(tok[1..tok.len() - 1].to_string()));
    }
    if tok.starts_with('.') && tok.ends_with('.') && tok.len() >= 2 {
        return Ok(StepValue::Enum(tok[1..tok.len() - 1].to_string()));
    }
    if tok.starts_with('(') && tok.ends_with(')') {
        let inner = &tok[1..tok.len() - 1];
        return Ok(StepValue::List(parse_attribute_list(inner)?));
    }
    // Numeric or unrecognized scalar — keep as an opaque string so callers
    // that don't care (e.g. geometric coordinates handled by the
    // tessellator) aren't blocked by it.
    Ok(StepValue::String(tok.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_entity() {
        let model = parse_step("#1=IFCWALL('2O2Fr$t4X7Zf8NOew3FL9r',$,'Wall A',$,$,#2,$,$);").unwrap();
        let inst = model.get(1).unwrap();
        assert_eq!(inst.entity_type, "IFCWALL");
        assert_eq!(inst.attributes[0].as_string(), Some("2O2Fr$t4X7Zf8NOew3FL9r"));
        assert_eq!(inst.attributes[1], StepValue::Null);
        assert_eq!(inst.attributes[5].as_ref_id(), Some(2));
    }

    #[test]
    fn parses_nested_list_attribute() {
        let model = parse_step("#1=IFCRELAGGREGATES('g',$,$,$,#2,(#3,#4));").unwrap();
        let inst = model.get(1).unwrap();
        let list = inst.attributes[5].as_list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].as_ref_id(), Some(3));
        assert_eq!(list[1].as_ref_id(), Some(4));
    }

    #[test]
    fn semicolon_inside_string_does_not_split_statement() {
        let model = parse_step("#1=IFCWALL('2O2Fr$t4X7Zf8NOew3FL9r',$,'Wall; A',$,$,$,$,$);").unwrap();
        assert_eq!(
            model.get(1).unwrap().attributes[2].as_string(),
            Some("Wall; A")
        );
    }

    #[test]
    fn rejects_missing_parens() {
        assert!(parse_step("#1=IFCWALL;").is_err());
    }
}
