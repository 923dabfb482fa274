pub mod cli;
pub mod error;
pub mod heap;
pub mod negotiation;
pub mod settings;
pub mod simulation;
pub mod tracker;
pub mod traffic;

pub use error::{RcdcError, Result};
