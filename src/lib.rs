pub mod accumulator;
pub mod config;
pub mod extract;
pub mod manifest;
pub mod model;
pub mod pagination;
pub mod progress;
pub mod resume;
pub mod transfer;
pub mod tumblr;
