//! Verdict state machine: the regulatory disposition of a lot and the
//! legal forward transitions, one per use case. Every transition request
//! goes through [`next_verdict`]; no use case compares verdicts ad hoc.

use crate::analysis::Outcome;
use crate::error::StateError;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    #[n(0)]
    Received,
    #[n(1)]
    Quarantine,
    #[n(2)]
    Approved,
    #[n(3)]
    Released,
    #[n(4)]
    Annulled,
    #[n(5)]
    Cancelled,
    #[n(6)]
    Rejected,
}

impl Verdict {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Verdict::Annulled | Verdict::Cancelled | Verdict::Rejected)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Verdict::Received => "received",
            Verdict::Quarantine => "quarantine",
            Verdict::Approved => "approved",
            Verdict::Released => "released",
            Verdict::Annulled => "annulled",
            Verdict::Cancelled => "cancelled",
            Verdict::Rejected => "rejected",
        };
        write!(f, "{label}")
    }
}

/// The lifecycle event a use case attempts against a lot's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    StockWriteOff,
    QuarantineDecision,
    AnalysisResult(Outcome),
    Release,
    TraceActivation,
    Annulment,
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LifecycleEvent::StockWriteOff => "stock write-off",
            LifecycleEvent::QuarantineDecision => "quarantine decision",
            LifecycleEvent::AnalysisResult(_) => "analysis result",
            LifecycleEvent::Release => "release",
            LifecycleEvent::TraceActivation => "trace activation",
            LifecycleEvent::Annulment => "analysis annulment",
        };
        write!(f, "{label}")
    }
}

/// The single transition table. Write-offs and trace activation leave the
/// verdict untouched; everything else moves it forward or fails.
pub fn next_verdict(current: Verdict, event: LifecycleEvent) -> Result<Verdict, StateError> {
    let illegal = || StateError::IllegalTransition {
        from: current.to_string(),
        event: event.to_string(),
    };

    match event {
        LifecycleEvent::StockWriteOff => Ok(current),
        LifecycleEvent::TraceActivation => Ok(current),
        LifecycleEvent::QuarantineDecision => match current {
            Verdict::Received => Ok(Verdict::Quarantine),
            _ => Err(illegal()),
        },
        LifecycleEvent::AnalysisResult(outcome) => match (current, outcome) {
            (Verdict::Quarantine, Outcome::Approved) => Ok(Verdict::Approved),
            (Verdict::Quarantine, Outcome::Rejected) => Ok(Verdict::Rejected),
            _ => Err(illegal()),
        },
        LifecycleEvent::Release => match current {
            Verdict::Approved => Ok(Verdict::Released),
            _ => Err(illegal()),
        },
        LifecycleEvent::Annulment => {
            if current.is_terminal() {
                Err(illegal())
            } else {
                Ok(Verdict::Annulled)
            }
        }
    }
}
