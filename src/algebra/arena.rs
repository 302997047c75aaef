//! Arena of triple patterns indexed by variable.

use crate::algebra::TriplePattern;
use std::collections::HashMap;

/// Stable handle of a triple inside a [`PatternArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TripleId(usize);

impl TripleId {
    /// Position of the triple in pattern order.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Triple patterns in source order. Removed triples leave a hole so ids stay
/// valid while a query is being rewritten.
#[derive(Debug, Clone, Default)]
pub struct PatternArena {
    nodes: Vec<Option<TriplePattern>>,
    by_variable: HashMap<String, Vec<TripleId>>,
}

impl PatternArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, triple: TriplePattern) -> TripleId {
        let id = TripleId(self.nodes.len());
        for variable in triple.variables() {
            let ids = self.by_variable.entry(variable.to_string()).or_default();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        self.nodes.push(Some(triple));
        id
    }

    pub fn get(&self, id: TripleId) -> Option<&TriplePattern> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn remove(&mut self, id: TripleId) -> Option<TriplePattern> {
        let triple = self.nodes.get_mut(id.0)?.take()?;
        for variable in triple.variables() {
            if let Some(ids) = self.by_variable.get_mut(variable) {
                ids.retain(|other| *other != id);
            }
        }
        Some(triple)
    }

    /// Live triples in pattern order.
    pub fn iter(&self) -> impl Iterator<Item = (TripleId, &TriplePattern)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(idx, node)| node.as_ref().map(|triple| (TripleId(idx), triple)))
    }

    /// Live triples mentioning `variable` in any position.
    pub fn with_variable(&self, variable: &str) -> &[TripleId] {
        self.by_variable.get(variable).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Live triples `?subject <predicate> ?o`.
    pub fn with_subject_and_predicate(&self, subject: &str, predicate: &str) -> Vec<TripleId> {
        self.with_variable(subject)
            .iter()
            .copied()
            .filter(|id| {
                self.get(*id).is_some_and(|t| {
                    t.subject.as_variable() == Some(subject) && t.predicate.is_iri(predicate)
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::Term;

    #[test]
    fn test_index_tracks_inserts_and_removals() {
        let mut arena = PatternArena::new();
        let a = arena.insert(TriplePattern::new(
            Term::variable("s"),
            Term::iri("http://ex/p"),
            Term::variable("o"),
        ));
        let b = arena.insert(TriplePattern::new(
            Term::variable("o"),
            Term::iri("http://ex/q"),
            Term::variable("o"),
        ));
        assert_eq!(arena.with_variable("o"), &[a, b]);
        assert_eq!(arena.with_subject_and_predicate("o", "http://ex/q"), vec![b]);

        arena.remove(a);
        assert_eq!(arena.with_variable("o"), &[b]);
        assert!(arena.with_variable("s").is_empty());
        assert_eq!(arena.len(), 1);
        assert!(arena.get(a).is_none());
        assert_eq!(arena.iter().map(|(id, _)| id).collect::<Vec<_>>(), vec![b]);
    }
}
