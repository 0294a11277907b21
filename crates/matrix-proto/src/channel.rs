use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Highest channel number a recorder exposes.  Channels are numbered 1..=16.
pub const MAX_CHANNELS: u8 = 16;

/// One optional channel per tile slot, always `MAX_CHANNELS` long.
pub type Assignment = Vec<Option<ChannelId>>;

/// A logical camera/source number in `1..=MAX_CHANNELS`.
///
/// Serialises as a bare integer so state and view files stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ChannelId(u8);

impl ChannelId {
    /// Returns `None` for anything outside `1..=16`.
    pub fn new(n: u8) -> Option<Self> {
        if (1..=MAX_CHANNELS).contains(&n) {
            Some(Self(n))
        } else {
            None
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// All channels in ascending order.
    pub fn all() -> impl Iterator<Item = ChannelId> {
        (1..=MAX_CHANNELS).map(ChannelId)
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        ChannelId::new(n).ok_or_else(|| format!("channel {} out of range 1..={}", n, MAX_CHANNELS))
    }
}

impl From<ChannelId> for u8 {
    fn from(ch: ChannelId) -> u8 {
        ch.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CH{}", self.0)
    }
}

/// Pad or truncate to 16 slots.
pub fn normalize_assignment(mut slots: Assignment) -> Assignment {
    slots.resize(MAX_CHANNELS as usize, None);
    slots
}

/// Deserialize an assignment array, turning anything that is not a valid
/// channel number into an empty slot instead of rejecting the whole file.
pub fn lenient_assignment<'de, D>(deserializer: D) -> Result<Assignment, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<serde_json::Value> = Vec::deserialize(deserializer)?;
    let slots = raw
        .iter()
        .map(|v| {
            v.as_i64()
                .and_then(|n| u8::try_from(n).ok())
                .and_then(ChannelId::new)
        })
        .collect();
    Ok(normalize_assignment(slots))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_is_enforced() {
        assert!(ChannelId::new(0).is_none());
        assert!(ChannelId::new(17).is_none());
        assert_eq!(ChannelId::new(16).map(ChannelId::get), Some(16));
        assert_eq!(ChannelId::all().count(), 16);
    }

    #[test]
    fn test_serde_rejects_out_of_range() {
        let ok: Vec<Option<ChannelId>> = serde_json::from_str("[3, null, 16]").unwrap();
        assert_eq!(ok, vec![ChannelId::new(3), None, ChannelId::new(16)]);
        assert!(serde_json::from_str::<ChannelId>("0").is_err());
        assert_eq!(ChannelId::new(7).unwrap().to_string(), "CH7");
    }

    #[derive(Deserialize)]
    struct Holder {
        #[serde(deserialize_with = "lenient_assignment")]
        slots: Assignment,
    }

    #[test]
    fn test_lenient_assignment_drops_garbage() {
        let h: Holder = serde_json::from_str(r#"{"slots": [1, 0, "x", 17, null, 16]}"#).unwrap();
        assert_eq!(h.slots.len(), 16);
        assert_eq!(h.slots[0], ChannelId::new(1));
        assert_eq!(&h.slots[1..5], &[None, None, None, None]);
        assert_eq!(h.slots[5], ChannelId::new(16));
    }
}
