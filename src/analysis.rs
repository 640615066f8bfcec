//! Quality-analysis records tied to a lot

use crate::error::ValidationError;
use crate::utils::TimeStamp;
use chrono::Utc;
use uuid7::uuid7;

/// Outcome of a quality analysis. `None` on the record means the analysis
/// is still pending.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    #[n(0)]
    Approved,
    #[n(1)]
    Rejected,
    #[n(2)]
    Annulled,
    #[n(3)]
    Cancelled,
}

impl Outcome {
    /// Annulled and Cancelled close the record for good; Approved and
    /// Rejected can still be annulled or reversed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Outcome::Annulled | Outcome::Cancelled)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Analysis {
    #[n(0)]
    pub id: String, // uuid7 surrogate
    #[n(1)]
    pub lot_code: String,
    #[n(2)]
    pub number: String, // unique within the lot
    #[n(3)]
    pub performed_date: Option<TimeStamp<Utc>>,
    #[n(4)]
    pub reanalysis_date: Option<TimeStamp<Utc>>,
    #[n(5)]
    pub expiry_date: Option<TimeStamp<Utc>>,
    #[n(6)]
    pub titer: Option<f64>,
    #[n(7)]
    pub outcome: Option<Outcome>,
    #[n(8)]
    pub notes: String,
    #[n(9)]
    pub active: bool,
}

impl Analysis {
    pub fn new(lot_code: &str, number: &str) -> Self {
        Self {
            id: uuid7().to_string(),
            lot_code: lot_code.to_owned(),
            number: number.to_owned(),
            performed_date: None,
            reanalysis_date: None,
            expiry_date: None,
            titer: None,
            outcome: None,
            notes: String::new(),
            active: true,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.outcome.is_none()
    }

    /// Record the analysis result. Refused once a terminal outcome is set.
    pub fn resolve(
        &mut self,
        outcome: Outcome,
        performed_date: Option<TimeStamp<Utc>>,
        reanalysis_date: Option<TimeStamp<Utc>>,
        expiry_date: Option<TimeStamp<Utc>>,
        titer: Option<f64>,
        notes: &str,
    ) -> Result<(), ValidationError> {
        if self.outcome.is_some_and(|o| o.is_terminal()) {
            return Err(ValidationError::AnalysisAlreadyResolved(self.number.clone()));
        }

        self.outcome = Some(outcome);
        self.performed_date = performed_date;
        self.reanalysis_date = reanalysis_date;
        self.expiry_date = expiry_date;
        self.titer = titer;
        self.notes = notes.to_owned();
        Ok(())
    }

    /// Annul the analysis. Only a pending record or a plain prior result
    /// may be annulled.
    pub fn annul(&mut self) -> Result<(), ValidationError> {
        match self.outcome {
            None | Some(Outcome::Approved) | Some(Outcome::Rejected) => {
                self.outcome = Some(Outcome::Annulled);
                Ok(())
            }
            _ => Err(ValidationError::NotAnnullable(self.number.clone())),
        }
    }

    /// Wipe every result field back to the empty state. Used by reversal.
    pub fn clear_result(&mut self) {
        self.performed_date = None;
        self.reanalysis_date = None;
        self.expiry_date = None;
        self.titer = None;
        self.outcome = None;
        self.notes = String::new();
    }
}

/// Find an active analysis by number within a lot's records, creating it
/// when absent. Idempotent by number.
pub fn upsert<'a>(analyses: &'a mut Vec<Analysis>, lot_code: &str, number: &str) -> &'a mut Analysis {
    // index-based to keep the borrow checker satisfied across the push
    let found = analyses
        .iter()
        .position(|a| a.active && a.number == number);

    match found {
        Some(i) => &mut analyses[i],
        None => {
            analyses.push(Analysis::new(lot_code, number));
            let last = analyses.len() - 1;
            &mut analyses[last]
        }
    }
}

/// Mark every analysis with no outcome as Cancelled. Invoked when a lot's
/// tracked quantity reaches zero.
pub fn cancel_pending(analyses: &mut [Analysis]) -> usize {
    let mut cancelled = 0;
    for analysis in analyses.iter_mut().filter(|a| a.active && a.is_pending()) {
        analysis.outcome = Some(Outcome::Cancelled);
        cancelled += 1;
    }
    cancelled
}
