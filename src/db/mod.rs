pub mod writer;

pub use writer::{PublishReport, QueueWriter};
