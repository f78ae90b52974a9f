pub mod broker;
pub mod result_backend;
pub mod task_handler;

pub use broker::*;
pub use result_backend::*;
pub use task_handler::*;
