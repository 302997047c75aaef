//! Compiles parsed DSL path queries into hybrid queries.
//!
//! Every path becomes a chain of graph nodes linked by the relations of its
//! connectives, ending in the canonical time-series linkage
//! (`hasTimeseries` / `hasDataPoint` / `hasTimestamp` / `hasValue`). All
//! paths share the `?timestamp` variable, so their series are only combined
//! at equal timestamps. A path on the right of a comparison is linked the
//! same way but left out of the projection.

use crate::algebra::{Expression, GraphQuery, HybridQuery, Projection, Term, TextPattern, TriplePattern};
use crate::core::{Comparator, Value, RDF_TYPE};
use crate::dsl::ConnectiveMapping;
use crate::error::{HybridError, Result};
use crate::parsing::dsl::{
    Condition, ConditionOperand, ConditionOperator, ConditionedPath, DslPathQuery, PathExpr, PathSegment,
    SegmentLabel,
};
use crate::splitter::Vocabulary;
use log::debug;
use std::collections::{HashMap, HashSet};

/// Variable shared by the timestamps of every compiled path.
pub const TIMESTAMP_VARIABLE: &str = "timestamp";

/// Label resolution settings and the connective mapping used to compile
/// DSL queries.
#[derive(Debug, Clone, Default)]
pub struct DslCompiler {
    name_predicate: Option<String>,
    class_namespace: Option<String>,
    connectives: ConnectiveMapping,
    vocabulary: Vocabulary,
}

impl DslCompiler {
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self { vocabulary, ..Self::default() }
    }

    /// Predicate linking nodes to their human-readable names.
    pub fn set_name_predicate(&mut self, predicate: impl Into<String>) {
        self.name_predicate = Some(predicate.into());
    }

    /// Namespace class segments are resolved in, `rdf:type <ns + Name>`.
    pub fn set_class_namespace(&mut self, namespace: impl Into<String>) {
        self.class_namespace = Some(namespace.into());
    }

    pub fn add_connective(&mut self, symbol: impl Into<String>, relation: impl Into<String>) -> Result<()> {
        self.connectives.insert(symbol, relation)?;
        Ok(())
    }

    pub fn set_connective_mapping(&mut self, mapping: ConnectiveMapping) -> Result<()> {
        mapping.validate()?;
        self.connectives = mapping;
        Ok(())
    }

    pub fn set_vocabulary(&mut self, vocabulary: Vocabulary) {
        self.vocabulary = vocabulary;
    }

    pub fn name_predicate(&self) -> Option<&str> {
        self.name_predicate.as_deref()
    }

    pub fn connectives(&self) -> &ConnectiveMapping {
        &self.connectives
    }

    /// Compiles `query` into a hybrid query.
    ///
    /// # Errors
    ///
    /// - `UnresolvedLabel` when a segment label cannot be resolved with the
    ///   configured name predicate and class namespace
    /// - `UnknownConnective` when a connective has no mapped relation
    /// - `ParseError` when a `like` pattern is not a string
    pub fn compile(&self, query: &DslPathQuery) -> Result<HybridQuery> {
        let mut compilation = Compilation::new(self);
        for path in &query.paths {
            compilation.path(path)?;
        }
        let graph = compilation.finish(query);
        debug!("Compiled DSL query into:\n{}", graph);

        let hybrid = HybridQuery::new(graph);
        Ok(match query.aggregation {
            Some(aggregation) => hybrid.with_aggregation(aggregation),
            None => hybrid,
        })
    }
}

/// Variables created for the last segment of a path.
struct Leaf {
    node: String,
    value: String,
    /// Bound to the path's display name once the leaf is projected
    path_name: Option<String>,
}

struct Compilation<'c> {
    compiler: &'c DslCompiler,
    query: GraphQuery,
    taken: HashSet<String>,
    /// Path prefix (connectives and labels) to node variable
    nodes: HashMap<String, String>,
    glue_nodes: HashMap<String, String>,
    /// `(variable, label)` pairs whose label constraint is already in place
    constrained: HashSet<(String, String)>,
    leaves: Vec<Leaf>,
}

impl<'c> Compilation<'c> {
    fn new(compiler: &'c DslCompiler) -> Self {
        Self {
            compiler,
            query: GraphQuery::new(),
            taken: HashSet::from([TIMESTAMP_VARIABLE.to_string()]),
            nodes: HashMap::new(),
            glue_nodes: HashMap::new(),
            constrained: HashSet::new(),
            leaves: Vec::new(),
        }
    }

    fn path(&mut self, path: &ConditionedPath) -> Result<()> {
        let node = self.chain(&path.path)?;
        let value = self.leaf(node, &path.path, true);
        if let Some(condition) = &path.condition {
            let filter = self.condition(&value, condition)?;
            self.query.filters.push(filter);
        }
        Ok(())
    }

    fn condition(&mut self, value: &str, condition: &Condition) -> Result<Expression> {
        let lhs = Expression::Variable(value.to_string());
        match (condition.operator, &condition.operand) {
            (ConditionOperator::Compare(comparator), ConditionOperand::Literal(literal)) => {
                Ok(Expression::compare(comparator, lhs, Expression::Constant(literal.clone())))
            }
            (ConditionOperator::Compare(comparator), ConditionOperand::Path(other)) => {
                let node = self.chain(other)?;
                let rhs = self.leaf(node, other, false);
                Ok(Expression::compare(comparator, lhs, Expression::Variable(rhs)))
            }
            (ConditionOperator::Like, ConditionOperand::Literal(Value::String(pattern))) => {
                Ok(Expression::Regex(Box::new(lhs), TextPattern::from_like(pattern)?))
            }
            (ConditionOperator::Like, operand) => {
                Err(HybridError::ParseError(format!("like needs a quoted pattern, found {:?}", operand)))
            }
        }
    }

    /// Links the nodes of `path`; returns the variable of the last one.
    fn chain(&mut self, path: &PathExpr) -> Result<String> {
        let mut key = String::new();
        let mut names: Vec<&str> = Vec::new();
        let mut previous: Option<String> = None;
        let compiler = self.compiler;

        for (idx, segment) in path.segments.iter().enumerate() {
            let connective = idx.checked_sub(1).and_then(|c| path.connectives.get(c)).map(String::as_str);
            let relation = match connective {
                Some(symbol) => Some(
                    compiler
                        .connectives
                        .get(symbol)
                        .ok_or_else(|| HybridError::UnknownConnective(symbol.to_string()))?,
                ),
                None => None,
            };
            let node = self.node(segment, connective, &mut key, &mut names)?;
            if let (Some(previous), Some(relation)) = (&previous, relation) {
                self.triple(Term::variable(previous), Term::iri(relation), Term::variable(&node));
            }
            previous = Some(node);
        }

        previous.ok_or_else(|| HybridError::ParseError("empty DSL path".to_string()))
    }

    /// The variable of `segment`. A glue resets the prefix, so segments after
    /// it are named and shared relative to the glued node.
    fn node<'p>(
        &mut self,
        segment: &'p PathSegment,
        connective: Option<&str>,
        key: &mut String,
        names: &mut Vec<&'p str>,
    ) -> Result<String> {
        let variable = match &segment.glue {
            Some(glue) => {
                key.clear();
                key.push_str(&format!("[{}]", glue));
                names.clear();
                names.push(glue);
                match self.glue_nodes.get(glue) {
                    Some(variable) => variable.clone(),
                    None => {
                        let variable = self.fresh(&sanitize(glue));
                        self.glue_nodes.insert(glue.clone(), variable.clone());
                        variable
                    }
                }
            }
            None => {
                key.push_str(connective.unwrap_or_default());
                key.push_str(&label_key(segment.label.as_ref()));
                names.push(segment.display_label());
                match self.nodes.get(key.as_str()) {
                    Some(variable) => variable.clone(),
                    None => {
                        let variable = self.fresh(&sanitize(&names.join("_")));
                        self.nodes.insert(key.clone(), variable.clone());
                        variable
                    }
                }
            }
        };
        if let Some(label) = &segment.label {
            self.constrain(&variable, label)?;
        }
        Ok(variable)
    }

    fn constrain(&mut self, variable: &str, label: &SegmentLabel) -> Result<()> {
        if !self.constrained.insert((variable.to_string(), label_key(Some(label)))) {
            return Ok(());
        }
        match label {
            SegmentLabel::Class(class) => self.constrain_class(variable, class),
            SegmentLabel::Name(name) => self.constrain_name(variable, name),
            SegmentLabel::ClassAndName(class, name) => {
                self.constrain_class(variable, class)?;
                self.constrain_name(variable, name)
            }
        }
    }

    fn constrain_class(&mut self, variable: &str, class: &str) -> Result<()> {
        let compiler = self.compiler;
        match (&compiler.class_namespace, &compiler.name_predicate) {
            (Some(namespace), _) => {
                self.triple(
                    Term::variable(variable),
                    Term::iri(RDF_TYPE),
                    Term::iri(format!("{}{}", namespace, class)),
                );
            }
            (None, Some(name_predicate)) => {
                let class_variable = self.fresh(&format!("{}_type", variable));
                self.triple(Term::variable(variable), Term::iri(RDF_TYPE), Term::variable(&class_variable));
                self.triple(
                    Term::variable(&class_variable),
                    Term::iri(name_predicate),
                    Term::Literal(Value::String(class.to_string())),
                );
            }
            (None, None) => {
                return Err(HybridError::UnresolvedLabel(format!(
                    "class {} needs a class namespace or a name predicate",
                    class
                )));
            }
        }
        Ok(())
    }

    fn constrain_name(&mut self, variable: &str, name: &str) -> Result<()> {
        let compiler = self.compiler;
        let Some(name_predicate) = &compiler.name_predicate else {
            return Err(HybridError::UnresolvedLabel(format!(
                "\"{}\" cannot be resolved without a name predicate",
                name
            )));
        };
        self.triple(
            Term::variable(variable),
            Term::iri(name_predicate),
            Term::Literal(Value::String(name.to_string())),
        );
        Ok(())
    }

    /// Links `node` to its series; returns the value variable. A leaf first
    /// reached unprojected gets its path name once a projected path ends there.
    fn leaf(&mut self, node: String, path: &PathExpr, projected: bool) -> String {
        let display = path.segments.iter().map(PathSegment::display_label).collect::<Vec<_>>().join("_");
        if let Some(idx) = self.leaves.iter().position(|leaf| leaf.node == node) {
            if projected && self.leaves[idx].path_name.is_none() {
                let path_variable = self.path_name(&node, display);
                self.leaves[idx].path_name = Some(path_variable);
            }
            return self.leaves[idx].value.clone();
        }
        let compiler = self.compiler;
        let vocabulary = &compiler.vocabulary;
        let timeseries = self.fresh(&format!("{}_timeseries", node));
        let datapoint = self.fresh(&format!("{}_datapoint", node));
        let value = self.fresh(&format!("{}_value", node));
        let path_name = projected.then(|| self.path_name(&node, display));

        self.triple(Term::variable(&node), Term::iri(&vocabulary.has_timeseries), Term::variable(&timeseries));
        self.triple(Term::variable(&timeseries), Term::iri(&vocabulary.has_data_point), Term::variable(&datapoint));
        self.triple(
            Term::variable(&datapoint),
            Term::iri(&vocabulary.has_timestamp),
            Term::variable(TIMESTAMP_VARIABLE),
        );
        self.triple(Term::variable(&datapoint), Term::iri(&vocabulary.has_value), Term::variable(&value));

        self.leaves.push(Leaf { node, value: value.clone(), path_name });
        value
    }

    fn path_name(&mut self, node: &str, display: String) -> String {
        let path_variable = self.fresh(&format!("{}__path_name", node));
        self.query.binds.push((Value::String(display), path_variable.clone()));
        path_variable
    }

    fn finish(mut self, query: &DslPathQuery) -> GraphQuery {
        if let Some((start, end)) = query.time_range {
            let timestamp = || Expression::Variable(TIMESTAMP_VARIABLE.to_string());
            self.query.filters.push(Expression::And(
                Box::new(Expression::compare(
                    Comparator::Ge,
                    timestamp(),
                    Expression::Constant(Value::DateTime(start)),
                )),
                Box::new(Expression::compare(Comparator::Le, timestamp(), Expression::Constant(Value::DateTime(end)))),
            ));
        }

        let projected: Vec<&Leaf> = self.leaves.iter().filter(|leaf| leaf.path_name.is_some()).collect();
        let mut projection: Vec<String> = projected.iter().filter_map(|leaf| leaf.path_name.clone()).collect();
        projection.push(TIMESTAMP_VARIABLE.to_string());
        projection.extend(projected.iter().map(|leaf| leaf.value.clone()));
        self.query.projection = Projection::Variables(projection);
        self.query
    }

    fn triple(&mut self, subject: Term, predicate: Term, object: Term) {
        let triple = TriplePattern::new(subject, predicate, object);
        if !self.query.patterns.iter().any(|(_, existing)| *existing == triple) {
            self.query.patterns.insert(triple);
        }
    }

    fn fresh(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut counter = 1;
        while self.taken.contains(&candidate) {
            counter += 1;
            candidate = format!("{}_{}", base, counter);
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}

fn label_key(label: Option<&SegmentLabel>) -> String {
    match label {
        Some(SegmentLabel::Class(class)) => class.clone(),
        Some(SegmentLabel::Name(name)) => format!("\"{}\"", name),
        Some(SegmentLabel::ClassAndName(class, name)) => format!("{}\"{}\"", class, name),
        None => String::new(),
    }
}

/// A SPARQL-safe variable name for `text`.
fn sanitize(text: &str) -> String {
    let mut name: String =
        text.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect();
    if name.is_empty() {
        name.push_str("node");
    } else if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}
