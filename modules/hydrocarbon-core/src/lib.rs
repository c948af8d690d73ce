pub mod fact_writer;
pub mod http_client;
pub mod limiter;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod store;

#[cfg(feature = "test-support")]
pub mod testing;

pub use fact_writer::FactWriter;
pub use http_client::HttpClient;
pub use limiter::RateLimiter;
pub use pool::{WorkerPool, WorkerPoolConfig};
pub use queue::{TaskQueue, TaskQueueSender};
pub use registry::{Context, Handler, HandlerOpts, HandlerResponse, Plugin, PluginRegistry, Route};
pub use runner::{run_scrape, RunnerOutcome};
pub use scheduler::Scheduler;
pub use store::Store;
