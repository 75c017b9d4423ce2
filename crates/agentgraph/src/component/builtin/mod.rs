//! Built-in control components

mod endpoint;
mod for_each;
mod fork;
mod join;
mod logic;
mod passthrough;
mod variable;

pub use endpoint::Endpoint;
pub use for_each::{flatten, minimize, ForEach};
pub use fork::Fork;
pub use join::{collect_job_ids, Join};
pub use logic::{is_truthy, Logic, LogicOp};
pub use passthrough::Passthrough;
pub use variable::Variable;
