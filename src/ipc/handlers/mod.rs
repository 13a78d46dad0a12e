pub mod board;
pub mod catalog;
pub mod core;
pub mod edit;
pub mod parameters;
