pub mod types;
pub mod rng;
pub mod crash;
pub mod plinko;
pub mod coinflip;
pub mod sweeper;
pub mod loot_crate;
pub mod processor;

pub use types::*;
pub use processor::{GameProcessor, PlayRequest, PlayResponse};
