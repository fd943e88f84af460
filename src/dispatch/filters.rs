use crate::db::store::Store;
use crate::transport::Identity;
use serde::{Deserialize, Serialize};

pub const FILTER_SETTINGS_KEY: &str = "filter_settings";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSettings {
    #[serde(default = "default_skip_bots")]
    pub skip_bots: bool,
    #[serde(default)]
    pub skip_no_photo: bool,
}

fn default_skip_bots() -> bool {
    true
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            skip_bots: true,
            skip_no_photo: false,
        }
    }
}

/// Read the shared filter document; a missing or unreadable document falls
/// back to defaults, never fails the task.
pub fn load(store: &Store) -> FilterSettings {
    match store.get_setting(FILTER_SETTINGS_KEY) {
        Ok(Some(value)) => serde_json::from_value(value).unwrap_or_default(),
        Ok(None) => FilterSettings::default(),
        Err(e) => {
            eprintln!("filter settings unreadable, using defaults: {e:#}");
            FilterSettings::default()
        }
    }
}

/// First matching rule short-circuits with a skip reason. Evaluation order
/// is fixed: bots, then missing photo.
pub fn evaluate(settings: &FilterSettings, identity: &Identity) -> Option<String> {
    if settings.skip_bots && identity.is_bot {
        return Some("Filter: recipient is a bot".to_string());
    }
    if settings.skip_no_photo && !identity.has_photo {
        return Some("Filter: recipient has no photo".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(is_bot: bool, has_photo: bool) -> Identity {
        Identity {
            identifier: "alice".to_string(),
            is_bot,
            has_photo,
        }
    }

    #[test]
    fn bot_rule_wins_over_photo_rule() {
        let settings = FilterSettings {
            skip_bots: true,
            skip_no_photo: true,
        };
        let reason = evaluate(&settings, &identity(true, false)).unwrap();
        assert!(reason.contains("bot"));
    }

    #[test]
    fn photo_rule_is_off_by_default() {
        let settings = FilterSettings::default();
        assert!(evaluate(&settings, &identity(false, false)).is_none());
    }

    #[test]
    fn disabled_bot_rule_lets_bots_through() {
        let settings = FilterSettings {
            skip_bots: false,
            skip_no_photo: false,
        };
        assert!(evaluate(&settings, &identity(true, true)).is_none());
    }
}
