pub mod config;
pub mod logging;
pub mod model;
pub mod repository;
pub mod tree;
#[cfg(test)]
mod test;
