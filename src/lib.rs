pub mod check;
mod graph;
mod rc_value;

pub use check::{central_diff, check_gradient, GradCheckError, EPSILON};
pub use graph::{Graph, Value};
pub use rc_value::RcValue;
