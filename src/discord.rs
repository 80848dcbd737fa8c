use std::sync::Arc;

use async_trait::async_trait;
use serenity::builder::EditMessage;
use serenity::http::Http;
use serenity::model::id::{ChannelId, MessageId};
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::giveaway::models::{
    CompletionResult, FinishedGiveaway, Giveaway, GiveawayId, Origin, RecoveredOrigin, UserId,
};
use crate::giveaway::notifications::{NotificationSink, OriginResolver};

// Discord ids are never zero; serenity panics when asked to build one.
fn channel_of(origin: &Origin) -> Option<ChannelId> {
    match origin.channel_id {
        0 => None,
        value => Some(ChannelId::new(value)),
    }
}

fn message_of(id: GiveawayId) -> Option<MessageId> {
    match id.get() {
        0 => None,
        value => Some(MessageId::new(value)),
    }
}

fn mention(user_id: UserId) -> String {
    format!("<@{}>", user_id)
}

// Text of the giveaway message while it is running.
pub fn announcement_text(giveaway: &Giveaway) -> String {
    format!(
        "🎁 Giveaway!\n{}\nEnds <t:{}:F> • {} participant(s)",
        giveaway.description(),
        giveaway.end_time().timestamp(),
        giveaway.participant_count()
    )
}

pub fn completion_text(result: &CompletionResult) -> String {
    match result.winner_id {
        Some(winner) => format!(
            "🎉 Giveaway finished! Congratulations {}, you won **{}**!",
            mention(winner),
            result.description
        ),
        None => format!(
            "❌ Giveaway finished without participants: **{}**",
            result.description
        ),
    }
}

pub fn cancellation_text(giveaway: &Giveaway, actor: UserId) -> String {
    format!(
        "❌ {} cancelled the giveaway **{}** ({} participant(s), id `{}`)",
        mention(actor),
        giveaway.description(),
        giveaway.participant_count(),
        giveaway.id()
    )
}

pub fn reroll_text(finished: &FinishedGiveaway) -> String {
    match finished.winner_id() {
        Some(winner) => format!(
            "🎲 New winner of the giveaway **{}**: {}",
            finished.description(),
            mention(winner)
        ),
        None => format!("🎲 The giveaway **{}** has no winner.", finished.description()),
    }
}

/// Announces giveaway events in the Discord channel they were created in.
///
/// Every request runs in its own task on the given runtime, so the engine
/// never waits for Discord. Request failures are only logged.
pub struct DiscordNotifier {
    http: Arc<Http>,
    runtime: Handle,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>, runtime: Handle) -> Self {
        DiscordNotifier { http, runtime }
    }

    fn target(&self, id: GiveawayId, origin: &Origin) -> Result<ChannelId> {
        channel_of(origin).ok_or_else(|| {
            Error::SerenityError(format!("Giveaway {} has no channel to announce in.", id))
        })
    }

    fn say(&self, channel_id: ChannelId, content: String) {
        let http = self.http.clone();
        self.runtime.spawn(async move {
            if let Err(err) = channel_id.say(&http, content).await {
                error!(
                    "Impossible to output the giveaway message in the channel {}. Reason: {}",
                    channel_id, err
                );
            }
        });
    }

    // Removes the running giveaway message, then posts the follow-up.
    fn replace(&self, channel_id: ChannelId, id: GiveawayId, content: String) {
        let http = self.http.clone();
        let message_id = message_of(id);
        self.runtime.spawn(async move {
            if let Some(message_id) = message_id {
                if let Err(err) = channel_id.delete_message(&http, message_id).await {
                    warn!("Can't delete the giveaway message {}: {}", message_id, err);
                }
            }

            if let Err(err) = channel_id.say(&http, content).await {
                error!(
                    "Impossible to output the giveaway message in the channel {}. Reason: {}",
                    channel_id, err
                );
            }
        });
    }
}

impl NotificationSink for DiscordNotifier {
    fn on_created(&self, giveaway: &Giveaway) -> Result<()> {
        // The command layer has already posted the message this giveaway is
        // keyed by.
        self.target(giveaway.id(), giveaway.origin())?;
        debug!("Giveaway {} is announced by its own message", giveaway.id());
        Ok(())
    }

    fn on_edited(&self, giveaway: &Giveaway) -> Result<()> {
        let channel_id = self.target(giveaway.id(), giveaway.origin())?;
        let content = announcement_text(giveaway);

        match message_of(giveaway.id()) {
            // Try to edit the existing message instead of printing a new one
            Some(message_id) => {
                let http = self.http.clone();
                self.runtime.spawn(async move {
                    let builder = EditMessage::new().content(&content);
                    if let Err(err) = channel_id.edit_message(&http, message_id, builder).await {
                        error!("Can't update the giveaway message {}: {}", message_id, err);
                    }
                });
            }
            None => self.say(channel_id, content),
        }

        Ok(())
    }

    fn on_cancelled(&self, giveaway: &Giveaway, actor: UserId) -> Result<()> {
        let channel_id = self.target(giveaway.id(), giveaway.origin())?;
        self.replace(channel_id, giveaway.id(), cancellation_text(giveaway, actor));
        Ok(())
    }

    fn on_completed(&self, result: &CompletionResult) -> Result<()> {
        let channel_id = self.target(result.id, &result.origin)?;
        self.replace(channel_id, result.id, completion_text(result));
        Ok(())
    }

    fn on_rerolled(&self, finished: &FinishedGiveaway) -> Result<()> {
        let channel_id = self.target(finished.id(), finished.origin())?;
        self.say(channel_id, reroll_text(finished));
        Ok(())
    }
}

/// Considers a persisted giveaway alive while its message can still be fetched.
pub struct DiscordOriginResolver {
    http: Arc<Http>,
}

impl DiscordOriginResolver {
    pub fn new(http: Arc<Http>) -> Self {
        DiscordOriginResolver { http }
    }
}

#[async_trait]
impl OriginResolver for DiscordOriginResolver {
    async fn resolve(&self, origin: &RecoveredOrigin) -> bool {
        let (channel_id, message_id) = match (channel_of(&origin.origin), message_of(origin.giveaway_id)) {
            (Some(channel_id), Some(message_id)) => (channel_id, message_id),
            _ => return false,
        };

        match channel_id.message(&self.http, message_id).await {
            Ok(_) => true,
            Err(err) => {
                warn!(
                    "Can't fetch the giveaway message {} in the channel {}: {}",
                    message_id, channel_id, err
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::discord::{
        announcement_text, cancellation_text, channel_of, completion_text, message_of,
    };
    use crate::giveaway::models::{
        CompletionResult, Giveaway, GiveawayId, Origin, UserId,
    };

    fn get_giveaway() -> Giveaway {
        let end_time = Utc.with_ymd_and_hms(2025, 7, 25, 19, 0, 0).unwrap();
        Giveaway::new(GiveawayId::new(5), end_time, "Nitro", Origin::new(1, 2, Some(3)))
    }

    #[test]
    fn test_zero_ids_have_no_target() {
        assert_eq!(channel_of(&Origin::new(1, 0, None)), None);
        assert_eq!(message_of(GiveawayId::new(0)), None);
        assert_eq!(channel_of(&Origin::new(1, 2, None)).map(|id| id.get()), Some(2));
    }

    #[test]
    fn test_announcement_text() {
        let mut giveaway = get_giveaway();
        giveaway.toggle_participant(UserId::new(9));

        assert_eq!(
            announcement_text(&giveaway),
            "🎁 Giveaway!\nNitro\nEnds <t:1753470000:F> • 1 participant(s)"
        );
    }

    #[test]
    fn test_completion_text_mentions_the_winner() {
        let giveaway = get_giveaway();
        let mut result = CompletionResult {
            id: giveaway.id(),
            description: "Nitro".to_string(),
            participants: vec![UserId::new(9)],
            winner_id: Some(UserId::new(9)),
            origin: giveaway.origin().clone(),
            finished_at: giveaway.end_time(),
        };

        assert_eq!(
            completion_text(&result),
            "🎉 Giveaway finished! Congratulations <@9>, you won **Nitro**!"
        );

        result.winner_id = None;
        assert_eq!(
            completion_text(&result),
            "❌ Giveaway finished without participants: **Nitro**"
        );
    }

    #[test]
    fn test_cancellation_text() {
        let giveaway = get_giveaway();
        assert_eq!(
            cancellation_text(&giveaway, UserId::new(3)),
            "❌ <@3> cancelled the giveaway **Nitro** (0 participant(s), id `5`)"
        );
    }
}
