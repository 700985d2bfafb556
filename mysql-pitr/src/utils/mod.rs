pub mod errors;
pub mod fsutil;
pub mod logger;
