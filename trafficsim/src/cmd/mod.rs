pub mod backend;
pub mod generator;
