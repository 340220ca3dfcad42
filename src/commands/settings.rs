use super::ValidationError;
use crate::db::models::{Preferences, Theme};
use crate::db::{Store, PREFERENCES_KEY};

pub const SETTING_KEYS: &[&str] = &["theme", "sidebar_collapsed", "show_agent_activity"];

pub fn load_preferences(store: &dyn Store) -> Preferences {
    store
        .get(PREFERENCES_KEY)
        .and_then(|raw| match serde_json::from_str(&raw) {
            Ok(prefs) => Some(prefs),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable preferences");
                None
            }
        })
        .unwrap_or_default()
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ValidationError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(ValidationError::InvalidSetting {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

pub fn set_preference(
    store: &dyn Store,
    key: &str,
    value: &str,
) -> Result<Preferences, ValidationError> {
    if !SETTING_KEYS.contains(&key) {
        return Err(ValidationError::UnknownSetting(key.to_string()));
    }

    let mut prefs = load_preferences(store);
    match key {
        "theme" => {
            prefs.theme = match value.trim().to_ascii_lowercase().as_str() {
                "light" => Theme::Light,
                "dark" => Theme::Dark,
                _ => {
                    return Err(ValidationError::InvalidSetting {
                        key: key.to_string(),
                        value: value.to_string(),
                    })
                }
            }
        }
        "sidebar_collapsed" => prefs.sidebar_collapsed = parse_bool(key, value)?,
        _ => prefs.show_agent_activity = parse_bool(key, value)?,
    }

    match serde_json::to_string(&prefs) {
        Ok(raw) => store.set(PREFERENCES_KEY, &raw),
        Err(e) => tracing::warn!(error = %e, "could not encode preferences"),
    }
    Ok(prefs)
}
