pub mod compose;
pub mod docker;
pub mod lifecycle;
pub mod logs;
pub mod process;
pub mod progress;
pub mod provision;
pub mod runtime;
pub mod sketch;
pub mod status;
pub mod stream;
