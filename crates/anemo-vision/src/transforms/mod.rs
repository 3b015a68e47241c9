pub mod augment;
pub mod clahe;
pub mod normalize;

pub use augment::{augment, AugmentConfig, AugmentParams};
pub use clahe::{clahe, ClaheConfig};
pub use normalize::Normalization;
