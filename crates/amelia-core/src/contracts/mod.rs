//! Supporting contracts the core consumes from agents, LLM drivers,
//! trackers, and tools (spec §1, §4.6). None of these types know how text
//! generation, issue fetching, or tool execution actually happen — the
//! core only ever calls through the trait object.

pub mod driver;
pub mod tool;
pub mod tracker;

pub use driver::{Driver, DriverError, DriverRegistry, GenerateRequest, GenerateResponse};
pub use tool::ToolRegistry;
pub use tracker::{Issue, Tracker, TrackerError, TrackerRegistry};
