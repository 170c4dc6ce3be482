//! Broadcast history store (SQLite): records delivered messages and serves
//! the recent-history query used to seed the windowed dedup log.

use anyhow::{Context, Result};
use sqlite::{State, Value};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

use crate::message::{BroadcastMessage, CellLocation, MessageKind};

// ---------------------------------------------------------------------------
// Shared database handle
// ---------------------------------------------------------------------------

pub type SharedDb = Arc<Mutex<sqlite::Connection>>;

/// Open (or create) the history database and ensure the schema exists.
pub fn open_db(path: &str) -> Result<SharedDb> {
    let conn = sqlite::open(path).with_context(|| format!("failed to open history db {path}"))?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS broadcasts (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            plmn             TEXT,
            lac              INTEGER,
            cid              INTEGER,
            service_category INTEGER,
            serial_number    INTEGER,
            message_body     TEXT,
            delivery_time    INTEGER,
            message_kind     TEXT
         );
         CREATE INDEX IF NOT EXISTS broadcasts_delivery_time
            ON broadcasts (delivery_time);",
    )?;
    info!("History DB opened at {path}");
    Ok(Arc::new(Mutex::new(conn)))
}

fn opt_int(v: Option<i32>) -> Value {
    v.map_or(Value::Null, |i| Value::Integer(i64::from(i)))
}

/// Persist a message that passed duplicate detection.
pub fn insert_broadcast(db: &SharedDb, msg: &BroadcastMessage) -> Result<()> {
    let db = db.lock().unwrap_or_else(PoisonError::into_inner);
    let mut stmt = db.prepare(
        "INSERT INTO broadcasts
            (plmn, lac, cid, service_category, serial_number, message_body, delivery_time,
             message_kind)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    let plmn = msg
        .location
        .plmn
        .clone()
        .map_or(Value::Null, Value::String);
    stmt.bind((1, plmn))?;
    stmt.bind((2, opt_int(msg.location.lac)))?;
    stmt.bind((3, opt_int(msg.location.cid)))?;
    stmt.bind((4, Value::Integer(i64::from(msg.service_category))))?;
    stmt.bind((5, Value::Integer(i64::from(msg.serial_number))))?;
    stmt.bind((6, Value::String(msg.body.clone())))?;
    stmt.bind((7, Value::Integer(msg.delivery_time)))?;
    stmt.bind((8, Value::String(msg.kind.as_str().to_string())))?;
    stmt.next()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Recent history
// ---------------------------------------------------------------------------

/// One stored message, reduced to the columns dedup needs.  Every column
/// may be NULL in storage and maps to `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRow {
    pub location: CellLocation,
    pub service_category: Option<i32>,
    pub serial_number: Option<i32>,
    pub message_body: Option<String>,
    pub delivery_time: Option<i64>,
    /// `None` for NULL or unrecognised values.
    pub kind: Option<MessageKind>,
}

fn int_col(v: Value) -> Option<i64> {
    match v {
        Value::Integer(i) => Some(i),
        _ => None,
    }
}

fn i32_col(v: Value) -> Option<i32> {
    int_col(v).and_then(|i| i32::try_from(i).ok())
}

fn text_col(v: Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s),
        _ => None,
    }
}

/// Rows delivered strictly after `since_ms`, newest first.
pub fn recent_since(db: &SharedDb, since_ms: i64) -> Result<Vec<HistoryRow>> {
    let db = db.lock().unwrap_or_else(PoisonError::into_inner);
    let mut stmt = db.prepare(
        "SELECT plmn, lac, cid, service_category, serial_number, message_body, delivery_time,
                message_kind
           FROM broadcasts
          WHERE delivery_time > ?
          ORDER BY delivery_time DESC",
    )?;
    stmt.bind((1, since_ms))?;

    let mut rows = Vec::new();
    while let State::Row = stmt.next()? {
        rows.push(HistoryRow {
            location: CellLocation {
                plmn: text_col(stmt.read::<Value, _>(0)?),
                lac: i32_col(stmt.read::<Value, _>(1)?),
                cid: i32_col(stmt.read::<Value, _>(2)?),
            },
            service_category: i32_col(stmt.read::<Value, _>(3)?),
            serial_number: i32_col(stmt.read::<Value, _>(4)?),
            message_body: text_col(stmt.read::<Value, _>(5)?),
            delivery_time: int_col(stmt.read::<Value, _>(6)?),
            kind: text_col(stmt.read::<Value, _>(7)?).and_then(|k| MessageKind::parse(&k)),
        });
    }
    Ok(rows)
}

/// Anything that can answer the startup history query.
pub trait HistorySource {
    fn recent_since(&self, since_ms: i64) -> Result<Vec<HistoryRow>>;
}

impl HistorySource for SharedDb {
    fn recent_since(&self, since_ms: i64) -> Result<Vec<HistoryRow>> {
        recent_since(self, since_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(serial: i32, body: &str, at: i64) -> BroadcastMessage {
        BroadcastMessage {
            service_category: 4370,
            serial_number: serial,
            location: CellLocation::new("310260", 11, 22),
            body: body.into(),
            kind: MessageKind::Cmas,
            etws_info: None,
            delivery_time: at,
        }
    }

    #[test]
    fn recent_since_filters_and_orders_newest_first() {
        let db = open_db(":memory:").unwrap();
        insert_broadcast(&db, &msg(1, "old", 100)).unwrap();
        insert_broadcast(&db, &msg(2, "mid", 200)).unwrap();
        insert_broadcast(&db, &msg(3, "new", 300)).unwrap();

        let rows = recent_since(&db, 100).unwrap();
        let serials: Vec<_> = rows.iter().map(|r| r.serial_number).collect();
        assert_eq!(serials, vec![Some(3), Some(2)]);
        assert_eq!(rows[0].message_body.as_deref(), Some("new"));
        assert_eq!(rows[0].location, CellLocation::new("310260", 11, 22));
        assert_eq!(rows[0].kind, Some(MessageKind::Cmas));
    }

    #[test]
    fn null_columns_map_to_none() {
        let db = open_db(":memory:").unwrap();
        {
            let conn = db.lock().unwrap();
            conn.execute(
                "INSERT INTO broadcasts (service_category, serial_number, delivery_time)
                 VALUES (4370, 9, 500)",
            )
            .unwrap();
        }
        let rows = recent_since(&db, 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].location, CellLocation::default());
        assert_eq!(rows[0].message_body, None);
        assert_eq!(rows[0].delivery_time, Some(500));
        assert_eq!(rows[0].kind, None);
    }

    #[test]
    fn absent_location_round_trips_as_none() {
        let db = open_db(":memory:").unwrap();
        let mut m = msg(4, "x", 10);
        m.location = CellLocation::default();
        insert_broadcast(&db, &m).unwrap();
        let rows = db.recent_since(0).unwrap();
        assert_eq!(rows[0].location, CellLocation::default());
    }

    #[test]
    fn empty_store_is_not_an_error() {
        let db = open_db(":memory:").unwrap();
        assert!(recent_since(&db, 0).unwrap().is_empty());
    }
}
