use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::intent::schema::{MetricKey, MetricKeyParseError};
use crate::records::ImplementationRecord;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl PredicateOp {
    // Two-character operators first so `<=` never parses as `<`.
    const TOKENS: [(&'static str, PredicateOp); 6] = [
        ("<=", PredicateOp::Le),
        (">=", PredicateOp::Ge),
        ("==", PredicateOp::Eq),
        ("!=", PredicateOp::Ne),
        ("<", PredicateOp::Lt),
        (">", PredicateOp::Gt),
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }

    pub fn apply(&self, value: f64, literal: f64) -> bool {
        match self {
            Self::Lt => value < literal,
            Self::Le => value <= literal,
            Self::Gt => value > literal,
            Self::Ge => value >= literal,
            Self::Eq => value == literal,
            Self::Ne => value != literal,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PredicateParseError {
    #[error("empty criteria clause")]
    Empty,
    #[error("no comparison operator in `{0}`")]
    MissingOperator(String),
    #[error(transparent)]
    UnknownField(#[from] MetricKeyParseError),
    #[error("literal `{0}` is not a finite number")]
    InvalidLiteral(String),
}

/// One `field <op> literal` comparison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Clause {
    pub field: MetricKey,
    pub op: PredicateOp,
    pub literal: f64,
}

impl Clause {
    pub fn new(field: MetricKey, op: PredicateOp, literal: f64) -> Self {
        Self { field, op, literal }
    }

    /// Missing or non-numeric fields never satisfy a clause.
    pub fn matches(&self, record: &ImplementationRecord) -> bool {
        record
            .numeric_metric(self.field)
            .map_or(false, |value| self.op.apply(value, self.literal))
    }
}

impl FromStr for Clause {
    type Err = PredicateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.is_empty() {
            return Err(PredicateParseError::Empty);
        }
        let Some(start) = text.find(['<', '>', '=', '!']) else {
            return Err(PredicateParseError::MissingOperator(text.to_string()));
        };
        let rest = &text[start..];
        let Some((token, op)) = PredicateOp::TOKENS
            .iter()
            .find(|(token, _)| rest.starts_with(token))
        else {
            return Err(PredicateParseError::MissingOperator(text.to_string()));
        };

        let field = MetricKey::from_str(&text[..start])?;
        let literal_text = rest[token.len()..].trim();
        let literal = literal_text
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| PredicateParseError::InvalidLiteral(literal_text.to_string()))?;
        Ok(Clause::new(field, *op, literal))
    }
}

impl Display for Clause {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.field, self.op.symbol(), self.literal)
    }
}

/// Conjunction of clauses. An empty predicate matches every record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    pub fn new(clauses: Vec<Clause>) -> Self {
        Self { clauses }
    }

    /// Parses `a < 1`, `a < 1 and b >= 2` or `a < 1 && b >= 2`.
    pub fn parse(expression: &str) -> Result<Self, PredicateParseError> {
        let mut clauses = Vec::new();
        for piece in split_conjunction(expression) {
            clauses.push(Clause::from_str(&piece)?);
        }
        if clauses.is_empty() {
            return Err(PredicateParseError::Empty);
        }
        Ok(Self { clauses })
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn matches(&self, record: &ImplementationRecord) -> bool {
        self.clauses.iter().all(|clause| clause.matches(record))
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.clauses.is_empty() {
            return write!(f, "*");
        }
        let joined = self
            .clauses
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" and ");
        write!(f, "{joined}")
    }
}

fn split_conjunction(expression: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    for chunk in expression.split("&&") {
        let mut current = Vec::new();
        for word in chunk.split_whitespace() {
            if word.eq_ignore_ascii_case("and") {
                pieces.push(current.join(" "));
                current.clear();
            } else {
                current.push(word);
            }
        }
        pieces.push(current.join(" "));
    }
    pieces.retain(|p| !p.trim().is_empty());
    pieces
}
