#![allow(non_snake_case)]

mod engine;
mod error;
mod midi_importer;
mod model;
mod player;
mod session;
mod timing;
mod util;

pub use engine::clock::*;
pub use engine::lifecycle::*;
pub use engine::ports::*;
pub use engine::scheduler::*;
pub use engine::*;
pub use error::*;
pub use midi_importer::*;
pub use model::config::*;
pub use model::song::*;
pub use player::*;
pub use session::*;
pub use timing::tempo_map::*;
pub use timing::timeline::*;
pub use util::*;
