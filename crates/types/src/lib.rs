mod protocol;
mod resource;

pub use protocol::{ClientMessage, GlobalTopic, PushEvent, RoomId, Topic};
pub use resource::{
  deserialize_id, Balance, ConversationThread, LeaderboardEntry, Message, PresenceStatus, Record,
  ResourceKind,
};
