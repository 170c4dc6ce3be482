//! Decoded cell-broadcast messages as handed to the dedup pipeline.

use serde::{Deserialize, Serialize};

/// Message kind.  Only ETWS changes how duplicates are detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Etws,
    Cmas,
    #[default]
    Other,
}

impl MessageKind {
    /// Classify a 3GPP message identifier.  Used whenever no explicit kind
    /// was supplied, both for incoming JSON and for stored history rows.
    pub fn from_service_category(category: i32) -> Self {
        match category {
            c if c & 0xFFF8 == 0x1100 => Self::Etws,
            0x1112..=0x112F => Self::Cmas,
            _ => Self::Other,
        }
    }

    /// Name used in JSON and in the history store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Etws => "etws",
            Self::Cmas => "cmas",
            Self::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "etws" => Some(Self::Etws),
            "cmas" => Some(Self::Cmas),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Etws => "ETWS",
            Self::Cmas => "CMAS",
            Self::Other => "CB",
        }
    }
}

/// Network identifiers of the cell the message was received from.
/// Absent components stay `None`; they never collapse into a real value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellLocation {
    #[serde(default)]
    pub plmn: Option<String>,
    #[serde(default)]
    pub lac: Option<i32>,
    #[serde(default)]
    pub cid: Option<i32>,
}

impl CellLocation {
    #[cfg(test)]
    pub fn new(plmn: impl Into<String>, lac: i32, cid: i32) -> Self {
        Self {
            plmn: Some(plmn.into()),
            lac: Some(lac),
            cid: Some(cid),
        }
    }

    /// Stable 31-multiplier hash code of the location.
    pub fn code(&self) -> i32 {
        let plmn = self.plmn.as_deref().map_or(0, body_hash);
        let lac = self.lac.unwrap_or(-1);
        let cid = self.cid.unwrap_or(-1);
        plmn.wrapping_mul(31)
            .wrapping_add(lac)
            .wrapping_mul(31)
            .wrapping_add(cid)
    }
}

impl std::fmt::Display for CellLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{},{},{}]",
            self.plmn.as_deref().unwrap_or("-"),
            self.lac.map_or_else(|| "-".to_string(), |v| v.to_string()),
            self.cid.map_or_else(|| "-".to_string(), |v| v.to_string()),
        )
    }
}

/// ETWS primary-notification metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EtwsInfo {
    pub warning_type: i32,
    #[serde(default)]
    pub emergency_user_alert: bool,
    #[serde(default)]
    pub activate_popup: bool,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub warning_security_information: Option<Vec<u8>>,
}

/// A fully decoded broadcast message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawBroadcastMessage")]
pub struct BroadcastMessage {
    pub service_category: i32,
    pub serial_number: i32,
    pub location: CellLocation,
    pub body: String,
    /// Derived from `service_category` when the input omits it.
    pub kind: MessageKind,
    pub etws_info: Option<EtwsInfo>,
    /// Epoch milliseconds.
    pub delivery_time: i64,
}

/// Wire shape of [`BroadcastMessage`]; `kind` is optional.
#[derive(Deserialize)]
struct RawBroadcastMessage {
    service_category: i32,
    serial_number: i32,
    #[serde(default)]
    location: CellLocation,
    body: String,
    #[serde(default)]
    kind: Option<MessageKind>,
    #[serde(default)]
    etws_info: Option<EtwsInfo>,
    delivery_time: i64,
}

impl From<RawBroadcastMessage> for BroadcastMessage {
    fn from(raw: RawBroadcastMessage) -> Self {
        Self {
            kind: raw
                .kind
                .unwrap_or_else(|| MessageKind::from_service_category(raw.service_category)),
            service_category: raw.service_category,
            serial_number: raw.serial_number,
            location: raw.location,
            body: raw.body,
            etws_info: raw.etws_info,
            delivery_time: raw.delivery_time,
        }
    }
}

impl BroadcastMessage {
    pub fn is_etws(&self) -> bool {
        self.kind == MessageKind::Etws
    }

    /// Body hash used for duplicate detection.  Some carriers reuse serial
    /// numbers for distinct ETWS warnings, so only ETWS messages mix the
    /// text in; everything else is keyed on category/serial/location alone.
    pub fn body_hash(&self) -> i32 {
        if self.is_etws() { body_hash(&self.body) } else { 0 }
    }
}

/// Polynomial (×31) hash over UTF-16 code units with wrapping `i32`
/// arithmetic.  Stable across processes, unlike `DefaultHasher`.
pub fn body_hash(text: &str) -> i32 {
    text.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_hash_matches_known_values() {
        assert_eq!(body_hash(""), 0);
        assert_eq!(body_hash("a"), 97);
        assert_eq!(body_hash("hello"), 99_162_322);
    }

    #[test]
    fn body_hash_only_for_etws() {
        let mut msg = BroadcastMessage {
            service_category: 4370,
            serial_number: 1,
            location: CellLocation::new("310260", 1, 2),
            body: "Presidential alert".into(),
            kind: MessageKind::Cmas,
            etws_info: None,
            delivery_time: 0,
        };
        assert_eq!(msg.body_hash(), 0);
        msg.kind = MessageKind::Etws;
        assert_eq!(msg.body_hash(), body_hash("Presidential alert"));
    }

    #[test]
    fn classifies_service_categories() {
        assert_eq!(MessageKind::from_service_category(0x1100), MessageKind::Etws);
        assert_eq!(MessageKind::from_service_category(0x1104), MessageKind::Etws);
        assert_eq!(MessageKind::from_service_category(0x1112), MessageKind::Cmas);
        assert_eq!(MessageKind::from_service_category(0x112F), MessageKind::Cmas);
        assert_eq!(MessageKind::from_service_category(50), MessageKind::Other);
    }

    #[test]
    fn absent_location_parts_differ_from_real_values() {
        let full = CellLocation::new("", -1, -1);
        let absent = CellLocation::default();
        assert_ne!(full, absent);
    }

    #[test]
    fn parses_minimal_json_line() {
        let line = r#"{"service_category":4370,"serial_number":7,"body":"test","delivery_time":1000}"#;
        let msg: BroadcastMessage = serde_json::from_str(line).unwrap();
        assert_eq!(msg.kind, MessageKind::Cmas);
        assert_eq!(msg.location, CellLocation::default());
        assert!(msg.etws_info.is_none());
    }

    #[test]
    fn missing_kind_is_derived_from_category() {
        let line = r#"{"service_category":4354,"serial_number":1,"body":"Earthquake","delivery_time":0}"#;
        let msg: BroadcastMessage = serde_json::from_str(line).unwrap();
        assert_eq!(msg.kind, MessageKind::Etws);
        assert_eq!(msg.body_hash(), body_hash("Earthquake"));

        let line = r#"{"service_category":50,"serial_number":1,"body":"x","kind":"etws","delivery_time":0}"#;
        let msg: BroadcastMessage = serde_json::from_str(line).unwrap();
        assert_eq!(msg.kind, MessageKind::Etws);
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in [MessageKind::Etws, MessageKind::Cmas, MessageKind::Other] {
            assert_eq!(MessageKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::parse("sms"), None);
    }
}
