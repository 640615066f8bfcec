//! Error taxonomy for the lot lifecycle engine

/// Quantity or unit-of-measure problems detected during pre-validation.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum QuantityError {
    #[error("requested quantity must be greater than zero")]
    NonPositive,
    #[error("requested {requested} {unit} exceeds the available {available}")]
    ExceedsAvailable {
        requested: f64,
        available: f64,
        unit: String,
    },
    #[error("cannot convert {from} into {to}")]
    IncompatibleUnits { from: String, to: String },
    #[error("package quantities sum to {sum} but the lot quantity is {expected}")]
    SplitMismatch { sum: f64, expected: f64 },
    #[error("package {package} does not exist in the lot")]
    UnknownPackage { package: u32 },
    #[error("package {package} has {available} traceable units available, {requested} requested")]
    NotEnoughTraces {
        package: u32,
        available: usize,
        requested: usize,
    },
}

/// Illegal verdict transition or missing precondition entity.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum StateError {
    #[error("verdict {from} does not allow {event}")]
    IllegalTransition { from: String, event: String },
    #[error("release requires exactly one analysis with an expiry date, found {count}")]
    ReleasePrecondition { count: usize },
    #[error("lot {lot} is not a sale-unit product, tracing cannot be activated")]
    NotSaleUnit { lot: String },
}

/// Invariant violation discovered at mutation time. Always thrown.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConflictError {
    #[error("Existen {count} movimientos de {reason} iguales para el lote {lot}")]
    DuplicateMovements {
        count: usize,
        reason: String,
        lot: String,
    },
    #[error("no active {reason} movement found for lot {lot}")]
    NoActiveMovement { reason: String, lot: String },
    #[error("last analysis is not annulled")]
    AnalysisNotAnnulled,
}

/// A referenced entity is absent.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum NotFoundError {
    #[error("lot {0} not found")]
    Lot(String),
    #[error("movement {0} not found")]
    Movement(String),
    #[error("analysis {0} not found for lot {1}")]
    Analysis(String, String),
}

/// Malformed input that slipped past the error collector.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("analysis {0} already carries a terminal outcome")]
    AnalysisAlreadyResolved(String),
    #[error("analysis {0} outcome does not allow annulment")]
    NotAnnullable(String),
    #[error("a traced lot requires traceable-unit selections on every sale")]
    MissingTraceSelection,
}
