//! Key records gathered from the key source.

use serde::{Deserialize, Serialize};

/// A reference to one purchase, in listing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRef {
    pub id: String,
    pub position: usize,
}

/// What the key source needs to reveal a gifted key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GiftToken {
    pub machine_name: String,
    pub key_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum KeyState {
    Revealed { code: String },
    Unrevealed { gift: GiftToken },
}

/// One redeemable key owed to the user.
///
/// `id` is stable across runs: `{order_id}:{machine_name}:{key_index}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: String,
    pub title: String,
    pub order_id: String,
    pub target_app_id: Option<u64>,
    pub state: KeyState,
}

impl KeyRecord {
    pub fn make_id(order_id: &str, machine_name: &str, key_index: u32) -> String {
        format!("{}:{}:{}", order_id, machine_name, key_index)
    }

    pub fn unrevealed(
        order_id: impl Into<String>,
        machine_name: impl Into<String>,
        key_index: u32,
        title: impl Into<String>,
    ) -> Self {
        let order_id = order_id.into();
        let machine_name = machine_name.into();
        Self {
            id: Self::make_id(&order_id, &machine_name, key_index),
            title: title.into(),
            order_id,
            target_app_id: None,
            state: KeyState::Unrevealed {
                gift: GiftToken {
                    machine_name,
                    key_index,
                },
            },
        }
    }

    pub fn revealed(
        order_id: impl Into<String>,
        machine_name: impl Into<String>,
        key_index: u32,
        title: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self::unrevealed(order_id, machine_name, key_index, title).into_revealed(code)
    }

    pub fn with_app_id(mut self, app_id: Option<u64>) -> Self {
        self.target_app_id = app_id;
        self
    }

    pub fn is_revealed(&self) -> bool {
        matches!(self.state, KeyState::Revealed { .. })
    }

    pub fn code(&self) -> Option<&str> {
        match &self.state {
            KeyState::Revealed { code } => Some(code),
            KeyState::Unrevealed { .. } => None,
        }
    }

    pub fn gift(&self) -> Option<&GiftToken> {
        match &self.state {
            KeyState::Unrevealed { gift } => Some(gift),
            KeyState::Revealed { .. } => None,
        }
    }

    /// Attach the revealed code. There is no way back to `Unrevealed`.
    pub fn into_revealed(mut self, code: impl Into<String>) -> Self {
        self.state = KeyState::Revealed {
            code: code.into().trim().to_string(),
        };
        self
    }
}

/// Whether `code` has the `XXXXX-XXXXX-XXXXX` shape of an activation key.
pub fn is_valid_product_key(code: &str) -> bool {
    let code = code.trim();
    if code.len() != 17 {
        return false;
    }
    let groups: Vec<&str> = code.split('-').collect();
    groups.len() == 3
        && groups
            .iter()
            .all(|g| g.len() == 5 && g.chars().all(|c| c.is_ascii_alphanumeric()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_stable() {
        let key = KeyRecord::unrevealed("ABC123", "game_steam", 0, "Game");
        assert_eq!(key.id, "ABC123:game_steam:0");

        let revealed = key.clone().into_revealed("AAAAA-BBBBB-CCCCC");
        assert_eq!(revealed.id, key.id);
        assert!(revealed.is_revealed());
        assert!(revealed.gift().is_none());
    }

    #[test]
    fn test_reveal_trims_code() {
        let key = KeyRecord::unrevealed("o", "m", 1, "t").into_revealed("  AAAAA-BBBBB-CCCCC\n");
        assert_eq!(key.code(), Some("AAAAA-BBBBB-CCCCC"));
    }

    #[test]
    fn test_product_key_format() {
        assert!(is_valid_product_key("AAAAA-BBBBB-CCCCC"));
        assert!(is_valid_product_key("1A2B3-C4D5E-F6G7H"));
        assert!(!is_valid_product_key("AAAAA-BBBBB"));
        assert!(!is_valid_product_key("AAAAA-BBBBB-CCCCC-DDDDD-EEEEE"));
        assert!(!is_valid_product_key("AAAAABBBBBCCCCC12"));
        assert!(!is_valid_product_key("AAAA!-BBBBB-CCCCC"));
        assert!(!is_valid_product_key("https://example.c"));
    }
}
