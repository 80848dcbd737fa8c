pub mod base;
pub mod uniform;

pub use crate::giveaway::strategies::base::WinnerStrategy;
pub use crate::giveaway::strategies::uniform::UniformDrawStrategy;
