use crate::giveaway::models::UserId;

pub trait WinnerStrategy: Send + Sync {
    // Returns the winner among the given participants, or None when nobody
    // has joined. The returned user must be one of `participants`.
    fn pick(&self, participants: &[UserId]) -> Option<UserId>;
}
