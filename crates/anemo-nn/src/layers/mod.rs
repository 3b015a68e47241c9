pub mod activation;
pub mod conv;
pub mod dropout;
pub mod linear;
pub mod normalization;
pub mod sequential;

pub use activation::{Sigmoid, Swish};
pub use sequential::Trace;
