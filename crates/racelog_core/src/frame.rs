//! Archive frames and reconstructed snapshots.
//!
//! A frame is either a full payload or a set of patch operations relative to the
//! previous snapshot. Both share the archive's JSON wire shape:
//!
//! ```text
//! {"type": 1, "timestamp": 1000.0, "payload": {"cars": [[...]], "session": [...], "messages": [[...]]}}
//! {"type": 8, "timestamp": 1001.0, "payload": {"cars": [[row, col, v]], "session": [[col, v]], "messages": []}}
//! ```

use crate::cell::CellValue;
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Kind of archive frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Complete payload, replaces any previous state
    Full,
    /// Patch operations against the previous snapshot
    Delta,
}

impl FrameKind {
    /// Wire code of a full frame
    pub const FULL_CODE: u8 = 1;
    /// Wire code of a delta frame
    pub const DELTA_CODE: u8 = 8;

    /// Get the wire code
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Full => Self::FULL_CODE,
            Self::Delta => Self::DELTA_CODE,
        }
    }

    /// Parse a wire code
    ///
    /// # Errors
    ///
    /// Returns `CoreError::UnknownFrameKind` for any other code
    pub fn from_code(code: u8) -> CoreResult<Self> {
        match code {
            Self::FULL_CODE => Ok(Self::Full),
            Self::DELTA_CODE => Ok(Self::Delta),
            other => Err(CoreError::UnknownFrameKind(other)),
        }
    }
}

/// Materialized payload of a full frame or snapshot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Payload {
    /// Per-car table, rows are cars
    #[serde(default, deserialize_with = "null_as_default")]
    pub cars: Vec<Vec<CellValue>>,
    /// Session-wide values
    #[serde(default, deserialize_with = "null_as_default")]
    pub session: Vec<CellValue>,
    /// Race control messages, opaque to reconstruction
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<Value>,
}

impl Payload {
    /// Create a payload from its three tables
    #[must_use]
    pub fn new(cars: Vec<Vec<CellValue>>, session: Vec<CellValue>, messages: Vec<Value>) -> Self {
        Self {
            cars,
            session,
            messages,
        }
    }
}

/// Patch of one `session` column
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPatch {
    /// Column index
    pub col: usize,
    /// New value
    pub value: CellValue,
}

impl SessionPatch {
    /// Decode a raw `[col, value]` entry
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Decode` if the entry is malformed or the index is not numeric
    pub fn decode(raw: &[CellValue]) -> CoreResult<Self> {
        match raw {
            [col, value] => Ok(Self {
                col: col.as_index("session column")?,
                value: value.clone(),
            }),
            other => Err(CoreError::decode(format!(
                "session patch needs 2 entries, got {}",
                other.len()
            ))),
        }
    }

    /// Encode back to the raw wire entry
    #[must_use]
    pub fn encode(&self) -> Vec<CellValue> {
        vec![CellValue::Number(self.col as f64), self.value.clone()]
    }
}

/// Patch of one `cars` cell
#[derive(Debug, Clone, PartialEq)]
pub struct CarPatch {
    /// Row index
    pub row: usize,
    /// Column index
    pub col: usize,
    /// New value
    pub value: CellValue,
}

impl CarPatch {
    /// Decode a raw `[row, col, value]` entry
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Decode` if the entry is malformed or an index is not numeric
    pub fn decode(raw: &[CellValue]) -> CoreResult<Self> {
        match raw {
            [row, col, value] => Ok(Self {
                row: row.as_index("cars row")?,
                col: col.as_index("cars column")?,
                value: value.clone(),
            }),
            other => Err(CoreError::decode(format!(
                "cars patch needs 3 entries, got {}",
                other.len()
            ))),
        }
    }

    /// Encode back to the raw wire entry
    #[must_use]
    pub fn encode(&self) -> Vec<CellValue> {
        vec![
            CellValue::Number(self.row as f64),
            CellValue::Number(self.col as f64),
            self.value.clone(),
        ]
    }
}

/// Payload of a delta frame.
///
/// Patch entries are kept in wire form; indices are decoded when the frame is applied.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeltaPayload {
    /// Raw `[row, col, value]` entries
    pub cars: Vec<Vec<CellValue>>,
    /// Raw `[col, value]` entries
    pub session: Vec<Vec<CellValue>>,
    /// Replacement message list
    pub messages: Vec<Value>,
}

impl DeltaPayload {
    /// Build a delta payload from typed operations
    #[must_use]
    pub fn from_ops(session: &[SessionPatch], cars: &[CarPatch], messages: Vec<Value>) -> Self {
        Self {
            cars: cars.iter().map(CarPatch::encode).collect(),
            session: session.iter().map(SessionPatch::encode).collect(),
            messages,
        }
    }

    /// Decode the session operations in list order
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Decode` on the first malformed entry
    pub fn session_ops(&self) -> CoreResult<Vec<SessionPatch>> {
        self.session.iter().map(|raw| SessionPatch::decode(raw)).collect()
    }

    /// Decode the cars operations in list order
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Decode` on the first malformed entry
    pub fn car_ops(&self) -> CoreResult<Vec<CarPatch>> {
        self.cars.iter().map(|raw| CarPatch::decode(raw)).collect()
    }
}

/// Payload of a frame, by kind
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    /// Full payload
    Full(Payload),
    /// Patch operations
    Delta(DeltaPayload),
}

/// One archive record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireFrame", try_from = "WireFrame")]
pub struct Frame {
    /// Archive timestamp (seconds)
    pub timestamp: f64,
    /// Full payload or patch operations
    pub payload: FramePayload,
}

impl Frame {
    /// Create a full frame
    #[must_use]
    pub fn full(timestamp: f64, payload: Payload) -> Self {
        Self {
            timestamp,
            payload: FramePayload::Full(payload),
        }
    }

    /// Create a delta frame
    #[must_use]
    pub fn delta(timestamp: f64, payload: DeltaPayload) -> Self {
        Self {
            timestamp,
            payload: FramePayload::Delta(payload),
        }
    }

    /// Get the frame kind
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        match self.payload {
            FramePayload::Full(_) => FrameKind::Full,
            FramePayload::Delta(_) => FrameKind::Delta,
        }
    }

    /// Decode a frame from a JSON value
    ///
    /// # Errors
    ///
    /// Returns error if the value does not have the wire shape
    pub fn from_json(value: Value) -> CoreResult<Self> {
        let wire: WireFrame = serde_json::from_value(value)?;
        Self::try_from(wire)
    }
}

/// A fully materialized state. Always of kind `Full`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(into = "Frame", try_from = "Frame")]
pub struct Snapshot {
    /// Timestamp of the frame that produced this snapshot
    pub timestamp: f64,
    /// Materialized tables
    pub payload: Payload,
}

impl Snapshot {
    /// Create the empty snapshot used to seed reconstruction
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a snapshot from a payload
    #[must_use]
    pub fn new(timestamp: f64, payload: Payload) -> Self {
        Self { timestamp, payload }
    }

    /// Snapshots are always full
    #[must_use]
    pub const fn kind(&self) -> FrameKind {
        FrameKind::Full
    }

    /// Convert to a full frame
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        Frame::full(self.timestamp, self.payload.clone())
    }
}

impl From<Snapshot> for Frame {
    fn from(snapshot: Snapshot) -> Self {
        Frame::full(snapshot.timestamp, snapshot.payload)
    }
}

impl TryFrom<Frame> for Snapshot {
    type Error = CoreError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        match frame.payload {
            FramePayload::Full(payload) => Ok(Self::new(frame.timestamp, payload)),
            FramePayload::Delta(_) => Err(CoreError::decode("a snapshot must be a full frame")),
        }
    }
}

/// Wire representation shared by full and delta frames
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFrame {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    timestamp: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    payload: WirePayload,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WirePayload {
    #[serde(default, deserialize_with = "null_as_default")]
    cars: Vec<Vec<CellValue>>,
    #[serde(default, deserialize_with = "null_as_default")]
    session: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    messages: Vec<Value>,
}

impl TryFrom<WireFrame> for Frame {
    type Error = CoreError;

    fn try_from(wire: WireFrame) -> Result<Self, Self::Error> {
        let WirePayload {
            cars,
            session,
            messages,
        } = wire.payload;

        match FrameKind::from_code(wire.kind)? {
            FrameKind::Full => {
                let session = session
                    .into_iter()
                    .map(|v| {
                        serde_json::from_value::<CellValue>(v)
                            .map_err(|e| CoreError::decode(format!("session cell: {}", e)))
                    })
                    .collect::<CoreResult<Vec<_>>>()?;
                Ok(Frame::full(wire.timestamp, Payload::new(cars, session, messages)))
            }
            FrameKind::Delta => {
                let session = session
                    .into_iter()
                    .map(|v| {
                        serde_json::from_value::<Vec<CellValue>>(v)
                            .map_err(|e| CoreError::decode(format!("session patch: {}", e)))
                    })
                    .collect::<CoreResult<Vec<_>>>()?;
                Ok(Frame::delta(
                    wire.timestamp,
                    DeltaPayload {
                        cars,
                        session,
                        messages,
                    },
                ))
            }
        }
    }
}

impl From<Frame> for WireFrame {
    fn from(frame: Frame) -> Self {
        let kind = frame.kind().code();
        let payload = match frame.payload {
            FramePayload::Full(p) => WirePayload {
                cars: p.cars,
                session: p.session.iter().map(Value::from).collect(),
                messages: p.messages,
            },
            FramePayload::Delta(d) => WirePayload {
                cars: d.cars,
                session: d
                    .session
                    .iter()
                    .map(|op| Value::Array(op.iter().map(Value::from).collect()))
                    .collect(),
                messages: d.messages,
            },
        };
        Self {
            kind,
            timestamp: frame.timestamp,
            payload,
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
