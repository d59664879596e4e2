pub mod manager;
pub mod queue;
pub mod tracker;
