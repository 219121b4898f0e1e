//! Dense layers and numeric helpers

mod ops;
mod layers;
mod classifier;

pub use ops::{gelu, log_softmax, softmax_rows, cross_entropy};
pub use layers::{Linear, Dropout, LayerNorm};
pub use classifier::ClassifierHead;
