pub mod clock;
pub mod config;
pub mod discord;
pub mod error;
pub mod giveaway;

pub use crate::error::{Error, GiveawayError, Result};
