pub mod batch;
pub mod config;
pub mod error;
pub mod message;
pub mod output;
pub mod registry;
pub mod util;

pub use rill_api_derive::ConfigParams;

pub use batch::BatchPolicy;
pub use error::{BatchError, ErrorKind, PluginError, WriteError};
pub use message::{Message, MessageBatch, Payload};
pub use output::{BatchOutput, Resources};
pub use registry::{BuiltOutput, OutputRegistry, OutputSpec};
