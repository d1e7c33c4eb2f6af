//! Delta reconstruction.
//!
//! Archived sessions interleave full frames with delta frames that patch the
//! previous state. Applying a delta grows the tables to fit every index it
//! touches, filling new slots with [`CellValue::Null`], then writes the patched
//! cells in list order (later writes to the same cell win). Messages are never
//! merged: a delta's message list replaces the previous one outright.

use racelog_core::{
    CarPatch, CellValue, CoreResult, Frame, FramePayload, SessionPatch, Snapshot,
};

/// Reconstruct the snapshot that follows `previous` once `incoming` is applied.
///
/// A full frame replaces the state verbatim. A delta frame is applied on a copy
/// of `previous`, which is left untouched.
///
/// # Errors
///
/// Returns `CoreError::Decode` if a patch entry is malformed
pub fn apply(previous: &Snapshot, incoming: Frame) -> CoreResult<Snapshot> {
    let mut next = match incoming.payload {
        FramePayload::Full(_) => Snapshot::empty(),
        FramePayload::Delta(_) => previous.clone(),
    };
    apply_in_place(&mut next, incoming)?;
    Ok(next)
}

/// Apply `incoming` to `state` in place.
///
/// Every patch entry is decoded before the first write, so a malformed frame
/// leaves `state` unchanged.
///
/// # Errors
///
/// Returns `CoreError::Decode` if a patch entry is malformed
pub fn apply_in_place(state: &mut Snapshot, incoming: Frame) -> CoreResult<()> {
    match incoming.payload {
        FramePayload::Full(payload) => {
            *state = Snapshot::new(incoming.timestamp, payload);
        }
        FramePayload::Delta(delta) => {
            let session_ops = delta.session_ops()?;
            let car_ops = delta.car_ops()?;

            patch_session(&mut state.payload.session, session_ops);
            patch_cars(&mut state.payload.cars, car_ops);
            state.payload.messages = delta.messages;
            state.timestamp = incoming.timestamp;
        }
    }
    Ok(())
}

fn patch_session(session: &mut Vec<CellValue>, ops: Vec<SessionPatch>) {
    let Some(max_col) = ops.iter().map(|op| op.col).max() else {
        return;
    };
    if session.len() <= max_col {
        session.resize(max_col + 1, CellValue::Null);
    }
    for op in ops {
        session[op.col] = op.value;
    }
}

// Rows are padded to the widest column touched anywhere in the batch, so every
// row ends up at least `max_col + 1` wide even if no op addressed it.
fn patch_cars(cars: &mut Vec<Vec<CellValue>>, ops: Vec<CarPatch>) {
    if ops.is_empty() {
        return;
    }
    let max_row = ops.iter().map(|op| op.row).max().unwrap_or(0);
    let max_col = ops.iter().map(|op| op.col).max().unwrap_or(0);

    if cars.len() <= max_row {
        cars.resize_with(max_row + 1, Vec::new);
    }
    for row in cars.iter_mut() {
        if row.len() <= max_col {
            row.resize(max_col + 1, CellValue::Null);
        }
    }
    for op in ops {
        cars[op.row][op.col] = op.value;
    }
}

/// Running reconstruction state for one replay
#[derive(Debug, Clone, Default)]
pub struct DeltaReconstructor {
    current: Snapshot,
    applied: u64,
}

impl DeltaReconstructor {
    /// Create a reconstructor seeded with the empty snapshot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the next frame and return the resulting snapshot.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Decode` if a patch entry is malformed; the current
    /// state is kept in that case
    pub fn push(&mut self, frame: Frame) -> CoreResult<&Snapshot> {
        apply_in_place(&mut self.current, frame)?;
        self.applied += 1;
        Ok(&self.current)
    }

    /// Current reconstructed state
    #[must_use]
    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    /// Number of frames applied since the last reset
    #[must_use]
    pub const fn applied(&self) -> u64 {
        self.applied
    }

    /// Drop all state and start from the empty snapshot again
    pub fn reset(&mut self) {
        self.current = Snapshot::empty();
        self.applied = 0;
    }
}
