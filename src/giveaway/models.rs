use std::collections::BTreeSet;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// How long after completion a new winner may still be drawn.
pub const REROLL_WINDOW_DAYS: i64 = 3;

/// Identifier of a giveaway. In Discord this is the id of the announcement
/// message, so it stays stable across restarts.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GiveawayId(u64);

impl GiveawayId {
    pub fn new(value: u64) -> Self {
        GiveawayId(value)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for GiveawayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GiveawayId {
    type Err = ParseIntError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value.trim().parse::<u64>().map(GiveawayId)
    }
}

/// Opaque, stable identity of a participant supplied by the caller.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    pub fn new(value: u64) -> Self {
        UserId(value)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Addressing information for the announcements of a giveaway. The engine
/// never interprets it; it is only stored and handed back to collaborators.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    pub guild_id: u64,
    pub channel_id: u64,
    // The organizer who opened the giveaway (if known).
    #[serde(default)]
    pub author_id: Option<u64>,
}

impl Origin {
    pub fn new(guild_id: u64, channel_id: u64, author_id: Option<u64>) -> Self {
        Origin {
            guild_id,
            channel_id,
            author_id,
        }
    }
}

/// Everything recovery knows about a persisted giveaway's announcement target,
/// built straight from the stored record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecoveredOrigin {
    pub giveaway_id: GiveawayId,
    pub origin: Origin,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GiveawayStatus {
    Active,
    Cancelled,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ToggleOutcome {
    Joined,
    Left,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Giveaway {
    id: GiveawayId,
    end_time: DateTime<Utc>,
    description: String,
    participants: BTreeSet<UserId>,
    origin: Origin,
    status: GiveawayStatus,
}

impl Giveaway {
    pub fn new(id: GiveawayId, end_time: DateTime<Utc>, description: &str, origin: Origin) -> Self {
        Giveaway {
            id,
            end_time,
            description: description.to_string(),
            participants: BTreeSet::new(),
            origin,
            status: GiveawayStatus::Active,
        }
    }

    pub fn id(&self) -> GiveawayId {
        self.id
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn status(&self) -> GiveawayStatus {
        self.status
    }

    // Returns participants ordered by their ids.
    pub fn participants(&self) -> Vec<UserId> {
        self.participants.iter().copied().collect()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_time <= now
    }

    // Adds the user when absent, removes otherwise.
    pub fn toggle_participant(&mut self, user_id: UserId) -> ToggleOutcome {
        match self.participants.remove(&user_id) {
            true => ToggleOutcome::Left,
            false => {
                self.participants.insert(user_id);
                ToggleOutcome::Joined
            }
        }
    }

    pub fn set_end_time(&mut self, end_time: DateTime<Utc>) {
        self.end_time = end_time;
    }

    pub fn set_description(&mut self, description: &str) {
        self.description = description.to_string();
    }

    pub fn mark_cancelled(&mut self) {
        self.status = GiveawayStatus::Cancelled;
    }

    pub fn to_record(&self) -> ActiveRecord {
        ActiveRecord {
            end_time: self.end_time,
            participants: self.participants(),
            origin: self.origin.clone(),
            description: self.description.clone(),
        }
    }

    pub fn from_record(id: GiveawayId, record: ActiveRecord) -> Self {
        Giveaway {
            id,
            end_time: record.end_time,
            description: record.description,
            participants: record.participants.into_iter().collect(),
            origin: record.origin,
            status: GiveawayStatus::Active,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FinishedGiveaway {
    id: GiveawayId,
    description: String,
    end_time: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    // Frozen at completion; only the winner may change afterwards.
    participants: Vec<UserId>,
    winner_id: Option<UserId>,
    origin: Origin,
}

impl FinishedGiveaway {
    /// Freezes an active giveaway. `winner_id` must come from its participants.
    pub fn complete(
        giveaway: &Giveaway,
        winner_id: Option<UserId>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        debug_assert!(winner_id.is_none_or(|winner| giveaway.is_participant(winner)));

        FinishedGiveaway {
            id: giveaway.id(),
            description: giveaway.description().to_string(),
            end_time: giveaway.end_time(),
            finished_at,
            participants: giveaway.participants(),
            winner_id,
            origin: giveaway.origin().clone(),
        }
    }

    pub fn id(&self) -> GiveawayId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn participants(&self) -> &[UserId] {
        &self.participants
    }

    pub fn winner_id(&self) -> Option<UserId> {
        self.winner_id
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    // Checks that a reroll is still allowed at the given moment.
    pub fn is_reroll_window_open(&self, now: DateTime<Utc>) -> bool {
        now - self.finished_at <= Duration::days(REROLL_WINDOW_DAYS)
    }

    // Overrides the winner. Ignores users outside of the frozen snapshot.
    pub(crate) fn set_winner(&mut self, winner_id: UserId) -> bool {
        if !self.participants.contains(&winner_id) {
            return false;
        }

        self.winner_id = Some(winner_id);
        true
    }

    pub fn to_record(&self) -> FinishedRecord {
        FinishedRecord {
            end_time: self.end_time,
            participants: self.participants.clone(),
            winner_id: self.winner_id,
            origin: self.origin.clone(),
            description: self.description.clone(),
            finished_at: self.finished_at,
        }
    }

    /// Rebuilds the record, or returns `None` when the stored winner isn't one
    /// of the stored participants.
    pub fn from_record(id: GiveawayId, record: FinishedRecord) -> Option<Self> {
        if let Some(winner) = record.winner_id {
            if !record.participants.contains(&winner) {
                return None;
            }
        }

        let mut participants = record.participants;
        participants.sort();
        participants.dedup();

        Some(FinishedGiveaway {
            id,
            description: record.description,
            end_time: record.end_time,
            finished_at: record.finished_at,
            participants,
            winner_id: record.winner_id,
            origin: record.origin,
        })
    }
}

/// Outcome of a completion transition, handed to the announcement layer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompletionResult {
    pub id: GiveawayId,
    pub description: String,
    pub participants: Vec<UserId>,
    pub winner_id: Option<UserId>,
    pub origin: Origin,
    pub finished_at: DateTime<Utc>,
}

impl From<&FinishedGiveaway> for CompletionResult {
    fn from(finished: &FinishedGiveaway) -> Self {
        CompletionResult {
            id: finished.id(),
            description: finished.description().to_string(),
            participants: finished.participants().to_vec(),
            winner_id: finished.winner_id(),
            origin: finished.origin().clone(),
            finished_at: finished.finished_at(),
        }
    }
}

/// A row of the active table.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ActiveRecord {
    #[serde(deserialize_with = "deserialize_utc")]
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub participants: Vec<UserId>,
    #[serde(flatten)]
    pub origin: Origin,
    #[serde(default)]
    pub description: String,
}

/// A row of the finished table.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FinishedRecord {
    #[serde(deserialize_with = "deserialize_utc")]
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub participants: Vec<UserId>,
    #[serde(default)]
    pub winner_id: Option<UserId>,
    #[serde(flatten)]
    pub origin: Origin,
    #[serde(default)]
    pub description: String,
    #[serde(deserialize_with = "deserialize_utc")]
    pub finished_at: DateTime<Utc>,
}

// Timestamps without an offset were written in UTC.
fn deserialize_utc<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_utc(&raw).map_err(serde::de::Error::custom)
}

pub fn parse_utc(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(value) = DateTime::parse_from_rfc3339(raw) {
        return Ok(value.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|err| format!("invalid timestamp '{}': {}", raw, err))
}
