//! Feature Flags (C11): deterministic percentage rollout via FNV-1a hashing.
//!
//! No repository in the example pack implements flag parsing or hashing;
//! this module is built straight from the spec's own fully specified
//! algorithm rather than adapted from a pack precedent.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

const FNV_OFFSET_BASIS: u32 = 0x811c9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

fn fnv1a(input: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in input.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagValue {
    On,
    Off,
    Percentage(u8),
}

impl FlagValue {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => return Self::On,
            "off" | "false" | "0" => return Self::Off,
            _ => {}
        }
        if let Some(pct) = trimmed.strip_suffix('%') {
            if let Ok(value) = pct.parse::<u32>() {
                return Self::Percentage(value.min(100) as u8);
            }
        }
        Self::Off
    }

    /// Evaluates this flag for `user_id`. A zero user id always evaluates to
    /// off for percentage flags, per the spec's edge case.
    pub fn evaluate(self, name: &str, user_id: Uuid) -> bool {
        match self {
            Self::On => true,
            Self::Off => false,
            Self::Percentage(pct) => {
                if user_id.is_nil() {
                    return false;
                }
                let key = format!("{name}:{user_id}");
                (fnv1a(&key) % 100) < pct as u32
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct FeatureFlags {
    inner: Arc<RwLock<HashMap<String, FlagValue>>>,
}

/// Parses the `name=value,name2=value2` shape of the `FEATURE_FLAGS` env var.
/// Entries without an `=`, or with an empty name, are skipped.
fn parse_flags(raw: &str) -> HashMap<String, FlagValue> {
    let mut flags = HashMap::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((name, value)) = entry.split_once('=') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            continue;
        }
        flags.insert(name, FlagValue::parse(value));
    }
    flags
}

impl FeatureFlags {
    pub fn from_env() -> Self {
        let flags = std::env::var("FEATURE_FLAGS")
            .map(|raw| parse_flags(&raw))
            .unwrap_or_default();
        Self {
            inner: Arc::new(RwLock::new(flags)),
        }
    }

    /// Unknown flags evaluate to off.
    pub fn is_enabled(&self, name: &str, user_id: Uuid) -> bool {
        self.inner
            .read()
            .get(name)
            .copied()
            .map(|flag| flag.evaluate(name, user_id))
            .unwrap_or(false)
    }

    pub fn snapshot(&self, user_id: Uuid) -> HashMap<String, bool> {
        self.inner
            .read()
            .iter()
            .map(|(name, flag)| (name.clone(), flag.evaluate(name, user_id)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_boolean_spellings() {
        assert_eq!(FlagValue::parse("on"), FlagValue::On);
        assert_eq!(FlagValue::parse("TRUE"), FlagValue::On);
        assert_eq!(FlagValue::parse("0"), FlagValue::Off);
        assert_eq!(FlagValue::parse("garbage"), FlagValue::Off);
    }

    #[test]
    fn percentage_parses_and_clamps() {
        assert_eq!(FlagValue::parse("50%"), FlagValue::Percentage(50));
        assert_eq!(FlagValue::parse("150%"), FlagValue::Percentage(100));
    }

    #[test]
    fn nil_user_is_always_off_for_percentage() {
        let flag = FlagValue::Percentage(100);
        assert!(!flag.evaluate("anything", Uuid::nil()));
    }

    #[test]
    fn percentage_evaluation_is_deterministic() {
        let flag = FlagValue::Percentage(50);
        let user = Uuid::new_v4();
        let a = flag.evaluate("new_chat_ui", user);
        let b = flag.evaluate("new_chat_ui", user);
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_flag_is_off() {
        let flags = FeatureFlags::default();
        assert!(!flags.is_enabled("does_not_exist", Uuid::new_v4()));
    }

    #[test]
    fn parses_feature_flags_env_shape() {
        let flags = parse_flags("new_chat_ui=on,beta_search=50%,broken_entry,=off");
        assert_eq!(flags.get("new_chat_ui"), Some(&FlagValue::On));
        assert_eq!(flags.get("beta_search"), Some(&FlagValue::Percentage(50)));
        assert!(!flags.contains_key("broken_entry"));
    }
}
