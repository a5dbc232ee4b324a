//! Predicates used by Condition, Switch, Filter and WhileLoop nodes.

pub mod condition;
pub mod operators;
pub mod type_coercion;

pub use condition::{Condition, Operand};
pub use operators::ComparisonOperator;
pub use type_coercion::{compare_values, lookup_path, number_value, to_f64, to_string};
