use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

pub type Expressions = BTreeSet<Expression>;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct Expression {
    key: String,
    operator: Operator,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    values: BTreeSet<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// Selects a set of workloads by label.
///
/// A selector without labels or expressions selects every workload. Label and
/// expression requirements are ANDed. Equality does not depend on the order in
/// which requirements were declared.
#[derive(
    Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Hash, Default, Deserialize, Serialize,
)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    match_labels: Map,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    match_expressions: Expressions,
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidSelector {
    #[error("empty label key in {0:?}")]
    EmptyKey(String),

    #[error("unbalanced parentheses in {0:?}")]
    Unbalanced(String),

    #[error("unsupported selector requirement: {0:?}")]
    Unsupported(String),

    #[error("invalid selector operator: {0:?}")]
    Operator(String),
}

// === Selector ===

impl Selector {
    pub fn from_expressions(exprs: impl IntoIterator<Item = Expression>) -> Self {
        Self {
            match_labels: Map::default(),
            match_expressions: exprs.into_iter().collect(),
        }
    }

    pub fn from_map(map: Map) -> Self {
        Self {
            match_labels: map,
            match_expressions: Expressions::default(),
        }
    }

    pub fn new(labels: Map, exprs: impl IntoIterator<Item = Expression>) -> Self {
        Self {
            match_labels: labels,
            match_expressions: exprs.into_iter().collect(),
        }
    }

    /// Returns true if the selector has no requirements and therefore selects
    /// everything.
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    pub fn match_labels(&self) -> &Map {
        &self.match_labels
    }

    pub fn match_expressions(&self) -> &Expressions {
        &self.match_expressions
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        for expr in self.match_expressions.iter() {
            if !expr.matches(labels.as_ref()) {
                return false;
            }
        }

        for (k, v) in self.match_labels.iter() {
            if labels.0.get(k) != Some(v) {
                return false;
            }
        }

        true
    }
}

/// Formats the selector in the Kubernetes label-selector syntax, e.g.
/// `app=db,tier in (backend,cache),!canary`.
impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in self.match_labels.iter() {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{k}={v}")?;
        }
        for expr in self.match_expressions.iter() {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            expr.fmt(f)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Selector {
    type Err = InvalidSelector;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut labels = Map::default();
        let mut exprs = Expressions::default();

        for req in split_requirements(s)? {
            let req = req.trim();
            if req.is_empty() {
                continue;
            }

            if let Some(key) = req.strip_prefix('!') {
                exprs.insert(Expression::new(key.trim(), Operator::DoesNotExist, None)?);
                continue;
            }

            if req.contains("!=") {
                return Err(InvalidSelector::Unsupported(req.to_string()));
            }

            if let Some((k, v)) = req.split_once("==").or_else(|| req.split_once('=')) {
                let k = k.trim();
                if k.is_empty() {
                    return Err(InvalidSelector::EmptyKey(req.to_string()));
                }
                labels.insert(k.to_string(), v.trim().to_string());
                continue;
            }

            if let Some(open) = req.find('(') {
                let (head, rest) = req.split_at(open);
                let values = rest
                    .strip_prefix('(')
                    .and_then(|r| r.strip_suffix(')'))
                    .ok_or_else(|| InvalidSelector::Unbalanced(req.to_string()))?
                    .split(',')
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                let mut words = head.split_whitespace();
                let (key, op) = match (words.next(), words.next(), words.next()) {
                    (Some(key), Some(op), None) => (key, op),
                    _ => return Err(InvalidSelector::Unsupported(req.to_string())),
                };
                let operator = match op {
                    "in" => Operator::In,
                    "notin" => Operator::NotIn,
                    op => return Err(InvalidSelector::Operator(op.to_string())),
                };
                exprs.insert(Expression::new(key, operator, values)?);
                continue;
            }

            if req.split_whitespace().count() != 1 {
                return Err(InvalidSelector::Unsupported(req.to_string()));
            }
            exprs.insert(Expression::new(req, Operator::Exists, None)?);
        }

        Ok(Self::new(labels, exprs))
    }
}

/// Splits a label-selector string on commas that are not enclosed in
/// parentheses.
fn split_requirements(s: &str) -> Result<Vec<&str>, InvalidSelector> {
    let mut reqs = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| InvalidSelector::Unbalanced(s.to_string()))?;
            }
            ',' if depth == 0 => {
                reqs.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(InvalidSelector::Unbalanced(s.to_string()));
    }
    reqs.push(&s[start..]);
    Ok(reqs)
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl std::iter::FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self::from_expressions(iter)
    }
}

// === Labels ===

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl From<Option<Map>> for Labels {
    #[inline]
    fn from(labels: Option<Map>) -> Self {
        labels.unwrap_or_default().into()
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

impl Serialize for Labels {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

// === Expression ===

impl Expression {
    /// Builds an expression, checking that `In`/`NotIn` carry values and that
    /// `Exists`/`DoesNotExist` do not.
    pub fn new(
        key: impl Into<String>,
        operator: Operator,
        values: impl IntoIterator<Item = String>,
    ) -> Result<Self, InvalidSelector> {
        let key = key.into();
        if key.is_empty() {
            return Err(InvalidSelector::EmptyKey(key));
        }
        let values = values.into_iter().collect::<BTreeSet<_>>();
        match operator {
            Operator::In | Operator::NotIn if values.is_empty() => {
                return Err(InvalidSelector::Unsupported(format!(
                    "{key} {operator:?} without values"
                )));
            }
            Operator::Exists | Operator::DoesNotExist if !values.is_empty() => {
                return Err(InvalidSelector::Unsupported(format!(
                    "{key} {operator:?} with values"
                )));
            }
            _ => {}
        }
        Ok(Self {
            key,
            operator,
            values,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    fn matches(&self, labels: &Map) -> bool {
        match self.operator {
            Operator::In => labels
                .get(&self.key)
                .map(|v| self.values.contains(v))
                .unwrap_or(false),
            Operator::NotIn => labels
                .get(&self.key)
                .map(|v| !self.values.contains(v))
                .unwrap_or(true),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = || self.values.iter().cloned().collect::<Vec<_>>().join(",");
        match self.operator {
            Operator::In => write!(f, "{} in ({})", self.key, values()),
            Operator::NotIn => write!(f, "{} notin ({})", self.key, values()),
            Operator::Exists => self.key.fmt(f),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

// === Operator ===

impl std::str::FromStr for Operator {
    type Err = InvalidSelector;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "In" => Ok(Self::In),
            "NotIn" => Ok(Self::NotIn),
            "Exists" => Ok(Self::Exists),
            "DoesNotExist" => Ok(Self::DoesNotExist),
            s => Err(InvalidSelector::Operator(s.to_string())),
        }
    }
}
