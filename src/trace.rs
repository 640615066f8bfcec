//! Traceable-unit management for traced lots
//!
//! When a lot is traced, every sale unit inside a package carries its own
//! sequence number and status. Units are never deleted: retirement flips
//! status and active flag together and cascades into the detail records.

use crate::error::QuantityError;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceStatus {
    #[n(0)]
    Available,
    #[n(1)]
    Sold,
    #[n(2)]
    Discarded,
}

/// Links a traceable unit to a movement that touched it.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct TraceDetail {
    #[n(0)]
    pub movement_code: String,
    #[n(1)]
    pub active: bool,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct TraceableUnit {
    #[n(0)]
    pub sequence: u32, // unique within the lot
    #[n(1)]
    pub status: TraceStatus,
    #[n(2)]
    pub active: bool,
    #[n(3)]
    pub details: Vec<TraceDetail>,
}

impl TraceableUnit {
    pub fn new(sequence: u32) -> Self {
        Self {
            sequence,
            status: TraceStatus::Available,
            active: true,
            details: Vec::new(),
        }
    }

    pub fn link_movement(&mut self, movement_code: &str) {
        self.details.push(TraceDetail {
            movement_code: movement_code.to_owned(),
            active: true,
        });
    }

    /// Status and active flag flip together; details cascade.
    pub fn retire(&mut self) {
        self.status = TraceStatus::Discarded;
        self.active = false;
        for detail in &mut self.details {
            detail.active = false;
        }
    }
}

/// One package slot of a trace-activation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceAssignment {
    pub package_number: u32,
    pub count: u32,
}

/// Create `count` fresh units in a package, numbered from `next_sequence`.
/// Returns the sequence to continue from.
pub fn assign(
    traces: &mut Vec<TraceableUnit>,
    next_sequence: u32,
    count: u32,
) -> u32 {
    let mut sequence = next_sequence;
    for _ in 0..count {
        traces.push(TraceableUnit::new(sequence));
        sequence += 1;
    }
    sequence
}

/// Mark `count` available units of a package as sold, in ascending
/// sequence order, linking each to the selling movement. Fails when the
/// package cannot supply the requested count; nothing is touched then.
pub fn mark_sold(
    traces: &mut [TraceableUnit],
    package_number: u32,
    count: usize,
    movement_code: &str,
) -> Result<(), QuantityError> {
    let mut available: Vec<&mut TraceableUnit> = traces
        .iter_mut()
        .filter(|t| t.active && t.status == TraceStatus::Available)
        .collect();
    available.sort_by_key(|t| t.sequence);

    if available.len() < count {
        return Err(QuantityError::NotEnoughTraces {
            package: package_number,
            available: available.len(),
            requested: count,
        });
    }

    for unit in available.into_iter().take(count) {
        unit.status = TraceStatus::Sold;
        unit.link_movement(movement_code);
    }
    Ok(())
}

/// Retire every active unit. Used by trace-activation reversal.
pub fn retire_all(traces: &mut [TraceableUnit]) -> usize {
    let mut retired = 0;
    for unit in traces.iter_mut().filter(|t| t.active) {
        unit.retire();
        retired += 1;
    }
    retired
}
