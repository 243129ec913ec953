pub mod audit;
pub mod calendar;
pub mod config;
pub mod directory;
pub mod engine;
pub mod journal;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod review;

pub use engine::{Availability, Engine, EngineError, ErrorKind, Sinks};
