//! Layer mixing

pub mod bus;
pub mod layer;

pub use bus::{LayerHandle, MixBus};
pub use layer::{Layer, LayerOptions};
