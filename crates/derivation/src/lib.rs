//! The derivation core: batch building on the way out (disseminator side)
//! and the four-stage pull pipeline on the way in (L1 -> engine).

pub mod block;
pub mod builder;
pub mod driver;
pub mod payload;
pub mod stage;

pub use block::DerivationBlock;
pub use builder::{BatchBuilder, BuilderError};
pub use driver::{create_pipeline, pipeline_task, DerivationParams};
pub use payload::PayloadBuilder;
pub use stage::{Stage, StageError};
