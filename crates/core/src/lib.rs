#![forbid(unsafe_code)]

pub mod error;
pub mod grading;
pub mod model;
pub mod progress;
pub mod time;
pub mod tree;

pub use error::Error;
pub use time::Clock;
pub use tree::{Crumb, SectionTree, TreeError, MAX_DEPTH};
