//! Flow combinators: compose [`agentflow_tool::Tool`]s into pipelines,
//! loops, and fan-outs without writing bespoke orchestration code for each
//! one.

pub mod dowhile;
pub mod error;
pub mod linear;
pub mod on_error;
pub mod parallel_list;

pub use dowhile::{DoWhile, DEFAULT_MAX_ITERATIONS};
pub use error::FlowError;
pub use linear::Linear;
pub use on_error::OnError;
pub use parallel_list::{CompletionStrategy, ErrorStrategy, ParallelList};
