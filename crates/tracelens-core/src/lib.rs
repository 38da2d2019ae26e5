pub mod config;
pub mod contract;
pub mod error;
pub mod event;
pub mod fields;
pub mod message;
pub mod recording;
pub mod reducer;
pub mod state;

pub use config::*;
pub use error::*;
pub use event::*;
pub use message::*;
pub use reducer::*;
pub use state::*;

pub use recording::*;
