pub use error::ExecutionError;
pub use event_batcher::{BlockBatch, EventBatcher};
pub use event_dispatcher::{EventDispatcher, NodeProber};
pub use event_processor::EventProcessor;
pub use execution_client::{ExecutionClient, ExecutionConfig};
pub use tasks::RegistryTask;

mod error;
mod event_batcher;
mod event_dispatcher;
mod event_parser;
mod event_processor;
mod execution_client;
mod gen;
mod tasks;
mod util;

#[cfg(test)]
mod processor_tests;
