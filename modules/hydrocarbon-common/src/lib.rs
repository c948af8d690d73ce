pub mod config;
pub mod error;
pub mod types;

pub use config::Config as AppConfig;
pub use error::{ErrorKind, HydrocarbonError, Result, TaskError};
pub use types::{
    Config, Fact, Feed, Folder, PostFact, PostRecord, Scrape, ScrapeCounters, ScrapeSchedule,
    ScrapeState, ScheduleRequest, Task,
};
