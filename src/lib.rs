pub mod dispatch;
pub mod log;
pub mod memory;
pub mod plugin;
pub mod probe;
pub mod protocol;
pub mod transport;
