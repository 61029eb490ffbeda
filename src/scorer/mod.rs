pub mod enricher;
pub mod prefilter;
pub mod ranker;

pub use enricher::Enricher;
pub use prefilter::pre_filter;
pub use ranker::{rank_batch, select_top};
