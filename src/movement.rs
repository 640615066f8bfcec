//! Movement ledger: every lifecycle change is an append-only record
//! linked to its lot, carrying the verdicts before and after.

use crate::units::Unit;
use crate::utils::TimeStamp;
use crate::verdict::Verdict;
use chrono::Utc;
use uuid7::uuid7;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementKind {
    #[n(0)]
    Entry,
    #[n(1)]
    Exit,
    #[n(2)]
    Adjustment,
    #[n(3)]
    Modification,
    #[n(4)]
    Reversal,
    #[n(5)]
    RecallOrigin,
    #[n(6)]
    RecallDerived,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementReason {
    #[n(0)]
    Intake,
    #[n(1)]
    Sale,
    #[n(2)]
    Adjustment,
    #[n(3)]
    Analysis,
    #[n(4)]
    Result,
    #[n(5)]
    Release,
    #[n(6)]
    Trace,
    #[n(7)]
    Annulment,
    #[n(8)]
    Recall,
}

impl MovementReason {
    /// Spanish label used in operator-facing conflict messages.
    pub fn label_es(&self) -> &'static str {
        match self {
            MovementReason::Intake => "ingreso",
            MovementReason::Sale => "venta",
            MovementReason::Adjustment => "ajuste",
            MovementReason::Analysis => "análisis",
            MovementReason::Result => "resultado",
            MovementReason::Release => "liberación",
            MovementReason::Trace => "trazas",
            MovementReason::Annulment => "anulación",
            MovementReason::Recall => "retiro",
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Movement {
    #[n(0)]
    pub id: String, // uuid7 surrogate
    #[n(1)]
    pub code: String, // sha256 of the CBOR contents at creation
    #[n(2)]
    pub lot_code: String,
    #[n(3)]
    pub kind: MovementKind,
    #[n(4)]
    pub reason: MovementReason,
    #[n(5)]
    pub quantity: f64,
    #[n(6)]
    pub unit: Unit,
    #[n(7)]
    pub verdict_before: Option<Verdict>,
    #[n(8)]
    pub verdict_after: Option<Verdict>,
    #[n(9)]
    pub actor: String,
    #[n(10)]
    pub created_at: TimeStamp<Utc>,
    #[n(11)]
    pub origin_code: Option<String>,
    #[n(12)]
    pub notes: String,
    #[n(13)]
    pub active: bool,
}

pub struct MovementDraft<'a> {
    pub lot_code: &'a str,
    pub kind: MovementKind,
    pub reason: MovementReason,
    pub quantity: f64,
    pub unit: Unit,
    pub verdict_before: Option<Verdict>,
    pub verdict_after: Option<Verdict>,
    pub actor: &'a str,
    pub created_at: TimeStamp<Utc>,
    pub origin_code: Option<String>,
    pub notes: &'a str,
}

impl Movement {
    /// Create and seal a movement. The durable code is the hash of the
    /// record's CBOR encoding, so a movement can never be rewritten
    /// without changing identity.
    pub fn record(draft: MovementDraft<'_>) -> anyhow::Result<Self> {
        let mut movement = Self {
            id: uuid7().to_string(),
            code: String::new(),
            lot_code: draft.lot_code.to_owned(),
            kind: draft.kind,
            reason: draft.reason,
            quantity: draft.quantity,
            unit: draft.unit,
            verdict_before: draft.verdict_before,
            verdict_after: draft.verdict_after,
            actor: draft.actor.to_owned(),
            created_at: draft.created_at,
            origin_code: draft.origin_code,
            notes: draft.notes.to_owned(),
            active: true,
        };

        let contents = minicbor::to_vec(&movement)?;
        movement.code = sha256::digest(&contents);
        Ok(movement)
    }

    /// Build the inverse record for a reversal: same quantities, verdicts
    /// swapped, linked back to the origin. Reversals are recorded for
    /// audit but never stay live.
    pub fn reversal_of(origin: &Movement, actor: &str, at: TimeStamp<Utc>) -> anyhow::Result<Self> {
        let mut reversal = Self::record(MovementDraft {
            lot_code: &origin.lot_code,
            kind: MovementKind::Reversal,
            reason: origin.reason,
            quantity: origin.quantity,
            unit: origin.unit,
            verdict_before: origin.verdict_after,
            verdict_after: origin.verdict_before,
            actor,
            created_at: at,
            origin_code: Some(origin.code.clone()),
            notes: "",
        })?;
        reversal.active = false;
        Ok(reversal)
    }
}

/// Movements of a lot in ledger order.
pub fn sort_ledger(movements: &mut [Movement]) {
    movements.sort_by(|a, b| {
        a.created_at
            .to_datetime_utc()
            .cmp(&b.created_at.to_datetime_utc())
            .then_with(|| a.code.cmp(&b.code))
    });
}
