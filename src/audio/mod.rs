//! Audio subsystem module

pub mod decoder;
pub mod frame;
pub mod looping;
pub mod resample;
pub mod source;

pub use decoder::{SymphoniaOpener, SymphoniaSource};
pub use frame::{encode_pcm, frame_size, Frame};
pub use looping::LoopingSource;
pub use resample::ResampleStage;
pub use source::{MemorySource, SampleSource, SourceOpener};
