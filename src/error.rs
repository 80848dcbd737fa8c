use std::io;
use std::result;

use serenity::prelude::SerenityError;
use thiserror::Error as ThisError;

use crate::giveaway::models::GiveawayId;

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, Clone, Eq, PartialEq, ThisError)]
pub enum Error {
    #[error("{0}")]
    SerenityError(String),
    #[error("{0}")]
    Storage(String),
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Giveaway(#[from] GiveawayError),
}

// Rejections of a lifecycle operation. Returned to the command layer, which
// decides how to present them to the user.
#[derive(Debug, Clone, Eq, PartialEq, ThisError)]
pub enum GiveawayError {
    #[error("The giveaway #{0} was not found or has already finished.")]
    NotFound(GiveawayId),
    #[error("The giveaway #{0} already exists.")]
    AlreadyExists(GiveawayId),
    #[error("The end time of the giveaway must be in the future.")]
    InvalidSchedule,
    #[error("No changes were given for the giveaway.")]
    NoChange,
    #[error("A new winner can only be drawn within 3 days after the giveaway has finished.")]
    WindowExpired,
    #[error("The finished giveaway doesn't have any participants.")]
    NoParticipants,
    #[error("No eligible winner could be drawn for the giveaway #{0}.")]
    NoWinnerDrawn(GiveawayId),
}

impl From<SerenityError> for Error {
    fn from(err: SerenityError) -> Error {
        let description = err.to_string();
        Error::SerenityError(description)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Storage(format!("I/O failure: {}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::Storage(format!("Malformed JSON: {}", err))
    }
}
