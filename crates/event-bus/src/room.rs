//! Room naming

use std::fmt;

use serde::{Deserialize, Serialize};

/// Topic prefix for room channels
pub const TOPIC_PREFIX: &str = "classroom/rooms/";

/// Section used when a class has none
const DEFAULT_SECTION: &str = "A";

/// Room of one class section, e.g. `class_10_A`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomKey(String);

impl RoomKey {
    pub fn new(class_id: &str, section_id: Option<&str>) -> Self {
        let section = section_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SECTION);
        Self(format!("class_{}_{}", class_id.trim(), section))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Pub/sub topic carrying this room's events
    pub fn topic(&self) -> String {
        format!("{}{}", TOPIC_PREFIX, self.0)
    }

    pub fn from_topic(topic: &str) -> Option<Self> {
        topic
            .strip_prefix(TOPIC_PREFIX)
            .filter(|k| !k.is_empty())
            .map(|k| Self(k.to_string()))
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_key_format() {
        assert_eq!(RoomKey::new("10", Some("B")).as_str(), "class_10_B");
        assert_eq!(RoomKey::new("10", None).as_str(), "class_10_A");
        assert_eq!(RoomKey::new("10", Some(" ")).as_str(), "class_10_A");
    }

    #[test]
    fn test_topic_mapping() {
        let room = RoomKey::new("12", Some("C"));
        assert_eq!(room.topic(), "classroom/rooms/class_12_C");
        assert_eq!(RoomKey::from_topic(&room.topic()), Some(room));
        assert_eq!(RoomKey::from_topic("vehicles/x/events"), None);
    }
}
