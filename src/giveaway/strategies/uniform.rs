use rand::seq::IndexedRandom;

use crate::giveaway::models::UserId;
use crate::giveaway::strategies::base::WinnerStrategy;

/// Every participant has the same chance to win.
#[derive(Debug, Default)]
pub struct UniformDrawStrategy;

impl UniformDrawStrategy {
    pub fn new() -> Self {
        UniformDrawStrategy {}
    }
}

impl WinnerStrategy for UniformDrawStrategy {
    fn pick(&self, participants: &[UserId]) -> Option<UserId> {
        participants.choose(&mut rand::rng()).copied()
    }
}
