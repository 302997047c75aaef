use crate::error::{HybridError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const CONNECTIVE_SYMBOLS: &[char] = &['.', ':', ';', '-', '/', '\\'];

/// Maps DSL connective symbols such as `.` or `::` to relation IRIs.
///
/// Serialized as a plain JSON object, `{".": "http://example.org/types#hasSensor"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectiveMapping {
    map: HashMap<String, String>,
}

impl ConnectiveMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a mapping, validating every entry.
    pub fn from_pairs<I, S, R>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, R)>,
        S: Into<String>,
        R: Into<String>,
    {
        let mut mapping = Self::new();
        for (symbol, relation) in pairs {
            mapping.insert(symbol, relation)?;
        }
        Ok(mapping)
    }

    /// Adds or replaces the relation of `symbol`, returning the old one.
    ///
    /// # Errors
    ///
    /// `Config` when `symbol` is not a run of one repeated connective
    /// character or `relation` is not an absolute IRI.
    pub fn insert(&mut self, symbol: impl Into<String>, relation: impl Into<String>) -> Result<Option<String>> {
        let symbol = symbol.into();
        let relation = relation.into();
        validate_symbol(&symbol)?;
        validate_relation(&relation)?;
        Ok(self.map.insert(symbol, relation))
    }

    pub fn get(&self, symbol: &str) -> Option<&str> {
        self.map.get(symbol).map(String::as_str)
    }

    /// Checks entries that arrived through deserialization.
    pub fn validate(&self) -> Result<()> {
        for (symbol, relation) in &self.map {
            validate_symbol(symbol)?;
            validate_relation(relation)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

fn validate_symbol(symbol: &str) -> Result<()> {
    let mut chars = symbol.chars();
    let valid = match chars.next() {
        Some(first) => CONNECTIVE_SYMBOLS.contains(&first) && chars.all(|c| c == first),
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(HybridError::Config(format!(
            "'{}' is not a connective; use a run of one of . : ; - / \\",
            symbol
        )))
    }
}

fn validate_relation(relation: &str) -> Result<()> {
    let absolute = relation
        .split_once(':')
        .is_some_and(|(scheme, rest)| !scheme.is_empty() && !rest.is_empty());
    if !absolute || relation.contains(|c: char| c.is_whitespace() || c == '<' || c == '>') {
        return Err(HybridError::Config(format!("'{}' is not an absolute IRI", relation)));
    }
    Ok(())
}
