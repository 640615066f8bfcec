//! Reversal engine: computes and applies the exact inverse of a prior
//! movement. Parameterized by the use case that produced the origin
//! movement, never by inspecting entity state alone.
//!
//! Contract: exactly one active movement with the kind's reason may exist
//! for the lot; the undo restores verdicts, analysis fields and activity
//! flags to their pre-movement values; origin and reversal both end up
//! inactive. Any precondition failure aborts before anything is staged
//! for commit.

use crate::analysis::{Analysis, Outcome};
use crate::error::{ConflictError, NotFoundError};
use crate::lot::Lot;
use crate::movement::{Movement, MovementReason};
use crate::trace;
use crate::utils::TimeStamp;
use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReversalKind {
    QuarantineDecision,
    AnalysisResult,
    Release,
    TraceActivation,
    Annulment,
}

impl ReversalKind {
    pub fn reason(&self) -> MovementReason {
        match self {
            ReversalKind::QuarantineDecision => MovementReason::Analysis,
            ReversalKind::AnalysisResult => MovementReason::Result,
            ReversalKind::Release => MovementReason::Release,
            ReversalKind::TraceActivation => MovementReason::Trace,
            ReversalKind::Annulment => MovementReason::Annulment,
        }
    }
}

/// Everything the reversal touched, handed back to the service layer for
/// a single atomic commit.
#[derive(Debug)]
pub struct Reversed {
    pub origin: Movement,
    pub reversal: Movement,
    pub analysis: Option<Analysis>,
}

/// Locate the one active movement the reversal targets. Zero or many is a
/// conflict, never a silent pick.
pub fn find_unique_origin(
    movements: &[Movement],
    lot_code: &str,
    reason: MovementReason,
) -> Result<Movement, ConflictError> {
    let matching: Vec<&Movement> = movements
        .iter()
        .filter(|m| m.active && m.reason == reason)
        .collect();

    match matching.len() {
        1 => Ok(matching[0].clone()),
        0 => Err(ConflictError::NoActiveMovement {
            reason: reason.label_es().to_owned(),
            lot: lot_code.to_owned(),
        }),
        n => Err(ConflictError::DuplicateMovements {
            count: n,
            reason: reason.label_es().to_owned(),
            lot: lot_code.to_owned(),
        }),
    }
}

fn target_analysis<'a>(
    analyses: &'a mut [Analysis],
    number: Option<&str>,
    lot_code: &str,
) -> Result<&'a mut Analysis, NotFoundError> {
    let not_found = || {
        NotFoundError::Analysis(
            number.unwrap_or("<latest>").to_owned(),
            lot_code.to_owned(),
        )
    };

    match number {
        Some(number) => analyses
            .iter_mut()
            .find(|a| a.active && a.number == number)
            .ok_or_else(not_found),
        None => analyses
            .iter_mut()
            .filter(|a| a.active)
            .last()
            .ok_or_else(not_found),
    }
}

/// Apply the inverse of `origin` to the lot graph. Mutates the passed
/// aggregates in place and returns the records to persist; the caller
/// owns the commit.
pub fn reverse(
    kind: ReversalKind,
    lot: &mut Lot,
    analyses: &mut [Analysis],
    origin: &Movement,
    analysis_number: Option<&str>,
    actor: &str,
    at: TimeStamp<Utc>,
) -> anyhow::Result<Reversed> {
    let restored = origin
        .verdict_before
        .ok_or_else(|| anyhow::anyhow!("origin movement {} carries no verdict", origin.code))?;

    let touched_analysis = match kind {
        ReversalKind::QuarantineDecision => {
            let analysis = target_analysis(analyses, analysis_number, &lot.code)?;
            analysis.active = false;
            lot.verdict = restored;
            Some(analysis.clone())
        }
        ReversalKind::AnalysisResult => {
            let analysis = target_analysis(analyses, analysis_number, &lot.code)?;
            analysis.clear_result();
            lot.verdict = restored;
            Some(analysis.clone())
        }
        ReversalKind::Release => {
            lot.verdict = restored;
            lot.expiry_date = None;
            None
        }
        ReversalKind::TraceActivation => {
            for package in &mut lot.packages {
                trace::retire_all(&mut package.traces);
            }
            lot.traced = false;
            None
        }
        ReversalKind::Annulment => {
            let analysis = target_analysis(analyses, analysis_number, &lot.code)?;
            if analysis.outcome != Some(Outcome::Annulled) {
                return Err(ConflictError::AnalysisNotAnnulled.into());
            }
            analysis.outcome = None;
            lot.verdict = restored;
            Some(analysis.clone())
        }
    };

    let mut origin = origin.clone();
    origin.active = false;
    let reversal = Movement::reversal_of(&origin, actor, at)?;

    Ok(Reversed {
        origin,
        reversal,
        analysis: touched_analysis,
    })
}
