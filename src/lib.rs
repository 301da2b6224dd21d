pub mod chain;
pub mod lightning;
pub mod logging;
pub mod proto;
pub mod swap;
