pub mod classifier;
pub mod dedup;
pub mod differ;

pub use classifier::classify;
pub use dedup::dedupe;
pub use differ::{DiffContext, MarketDiffer};
