pub mod collector;
pub mod manager;
pub mod pipeline;
