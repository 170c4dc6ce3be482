//! Comparison keys.  A key is deliberately narrower than the message it
//! was built from; the two strategies use two distinct key shapes so one
//! strategy's equality rule can never be applied to the other's keys.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::message::{BroadcastMessage, CellLocation, EtwsInfo};

// ───────────────────────────── Identity key ──────────────────────────────

/// Key used by the bounded identity set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityKey {
    pub service_category: i32,
    pub serial_number: i32,
    pub location: CellLocation,
    pub body_hash: i32,
    /// When present on either side, must be present and equal on both.
    pub etws_info: Option<EtwsInfo>,
}

impl IdentityKey {
    pub fn from_message(msg: &BroadcastMessage) -> Self {
        Self {
            service_category: msg.service_category,
            serial_number: msg.serial_number,
            location: msg.location.clone(),
            body_hash: msg.body_hash(),
            etws_info: msg.etws_info.clone(),
        }
    }

    /// Combined code of location and scalar fields.  Keys that differ only
    /// in their ETWS payload still spread across buckets because the
    /// payload is fed to the hasher after this code.
    pub fn code(&self) -> i32 {
        self.location
            .code()
            .wrapping_add(self.service_category.wrapping_mul(5))
            .wrapping_add(self.serial_number.wrapping_mul(7))
            .wrapping_add(self.body_hash.wrapping_mul(13))
    }
}

impl Hash for IdentityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_i32(self.code());
        if let Some(etws) = &self.etws_info {
            etws.hash(state);
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{category: {} serial: {} location: {} etws: {} body hash: {}}}",
            self.service_category,
            self.serial_number,
            self.location,
            if self.etws_info.is_some() { "yes" } else { "none" },
            self.body_hash,
        )
    }
}

// ────────────────────────────── Window key ───────────────────────────────

/// Key used by the sliding window log.  Carries the full body text and the
/// delivery time; the time never takes part in equality.
#[derive(Debug, Clone)]
pub struct WindowKey {
    pub service_category: i32,
    pub serial_number: i32,
    pub location: CellLocation,
    pub body_hash: i32,
    /// `None` only for history rows whose body column was NULL.
    pub message_body: Option<String>,
    /// Epoch milliseconds.
    pub delivery_time: i64,
}

impl WindowKey {
    pub fn from_message(msg: &BroadcastMessage) -> Self {
        Self {
            service_category: msg.service_category,
            serial_number: msg.serial_number,
            location: msg.location.clone(),
            body_hash: msg.body_hash(),
            message_body: Some(msg.body.clone()),
            delivery_time: msg.delivery_time,
        }
    }
}

impl PartialEq for WindowKey {
    fn eq(&self, other: &Self) -> bool {
        self.service_category == other.service_category
            && self.serial_number == other.serial_number
            && self.location == other.location
            && self.body_hash == other.body_hash
            && self.message_body == other.message_body
    }
}

impl Eq for WindowKey {}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{category: {} serial: {} location: {} body hash: {} delivered: {}}}",
            self.service_category,
            self.serial_number,
            self.location,
            self.body_hash,
            self.delivery_time,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut h = DefaultHasher::new();
        value.hash(&mut h);
        h.finish()
    }

    fn key(etws: Option<EtwsInfo>) -> IdentityKey {
        IdentityKey {
            service_category: 0x1102,
            serial_number: 0x3001,
            location: CellLocation::new("44010", 100, 200),
            body_hash: 42,
            etws_info: etws,
        }
    }

    #[test]
    fn code_combines_scalar_fields() {
        let k = key(None);
        let expected = k
            .location
            .code()
            .wrapping_add(5 * 0x1102)
            .wrapping_add(7 * 0x3001)
            .wrapping_add(13 * 42);
        assert_eq!(k.code(), expected);
    }

    #[test]
    fn etws_presence_breaks_equality() {
        let with = key(Some(EtwsInfo {
            warning_type: 1,
            ..Default::default()
        }));
        let without = key(None);
        assert_ne!(with, without);
        assert_ne!(without, with);
    }

    #[test]
    fn differing_etws_payloads_hash_apart() {
        let a = key(Some(EtwsInfo {
            warning_type: 0,
            ..Default::default()
        }));
        let b = key(Some(EtwsInfo {
            warning_type: 1,
            ..Default::default()
        }));
        assert_ne!(a, b);
        assert_ne!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn equal_keys_hash_equal() {
        let etws = Some(EtwsInfo {
            warning_type: 2,
            primary: true,
            ..Default::default()
        });
        assert_eq!(key(etws.clone()), key(etws.clone()));
        assert_eq!(hash_of(&key(etws.clone())), hash_of(&key(etws)));
    }

    #[test]
    fn window_key_ignores_delivery_time_but_not_text() {
        let a = WindowKey {
            service_category: 10,
            serial_number: 5,
            location: CellLocation::new("310260", 1, 1),
            body_hash: 0,
            message_body: Some("a".into()),
            delivery_time: 0,
        };
        let mut later = a.clone();
        later.delivery_time = 1_000;
        assert_eq!(a, later);

        let mut other_text = a.clone();
        other_text.message_body = Some("b".into());
        assert_ne!(a, other_text);
    }
}
