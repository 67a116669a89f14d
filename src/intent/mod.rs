pub mod loader;
pub mod predicate;
pub mod schema;

pub use loader::{load_intent, load_intent_str, MalformedIntentError};
pub use predicate::{Clause, Predicate, PredicateOp, PredicateParseError};
pub use schema::{
    AppliesTo, Comparison, Constraint, ConstraintType, DriftType, EffectivePeriod, MetricKey,
    PolicyIntent, SeverityBands, TargetGroup, TemporalRule,
};
