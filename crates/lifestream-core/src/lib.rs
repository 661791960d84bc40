pub mod sink;
pub mod types;

pub use sink::{LogSink, Sink};
pub use types::{ChangeRecord, Column, Value};
