pub mod color;
pub mod config;
pub mod control;
pub mod events;
pub mod grid;
pub mod summary;
