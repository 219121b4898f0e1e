//! Configuration, batches, tensor cache and chart tables

mod config;
mod batch;
mod cache;
mod chart;

pub use config::R2D2Config;
pub use batch::{TokenBatch, PairBatch, AtomSpans};
pub use cache::{TensorCache, CacheSlot, CacheId};
pub use chart::{ChartNode, ChartCell, ChartTable, SampledTrees, Derivation};
