pub mod errors;
pub mod geometry;
pub mod kd_tree;
mod logging;
