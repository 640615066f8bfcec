//! Plain value records exchanged with the surrounding application:
//! the movement request, the lot snapshot, the error collector and the
//! actor-resolution capability.

use crate::analysis::Analysis;
use crate::lot::{Lot, LotStatus};
use crate::movement::Movement;
use crate::trace::TraceAssignment;
use crate::units::Unit;
use crate::utils::TimeStamp;
use crate::verdict::Verdict;
use chrono::Utc;

/// Input of every mutating use case. Optional fields are read only by the
/// use cases that need them.
#[derive(Debug, Clone)]
pub struct MovementRequest {
    pub lot_code: String,
    pub package_number: Option<u32>,
    pub quantity: f64,
    pub unit: Unit,
    pub movement_date: TimeStamp<Utc>,
    pub notes: String,
    pub analysis_number: Option<String>,
    pub performed_date: Option<TimeStamp<Utc>>,
    pub reanalysis_date: Option<TimeStamp<Utc>>,
    pub expiry_date: Option<TimeStamp<Utc>>,
    pub titer: Option<f64>,
    pub origin_movement_code: Option<String>,
    pub trace_selections: Vec<TraceAssignment>,
    pub package_quantities: Vec<f64>,
}

impl MovementRequest {
    pub fn for_lot(lot_code: &str, quantity: f64, unit: Unit) -> Self {
        Self {
            lot_code: lot_code.to_owned(),
            package_number: None,
            quantity,
            unit,
            movement_date: TimeStamp::now(),
            notes: String::new(),
            analysis_number: None,
            performed_date: None,
            reanalysis_date: None,
            expiry_date: None,
            titer: None,
            origin_movement_code: None,
            trace_selections: Vec::new(),
            package_quantities: Vec::new(),
        }
    }
}

/// Input of the intake use case, the only one that creates a lot from
/// master data instead of mutating an existing one.
#[derive(Debug, Clone)]
pub struct IntakeRequest {
    pub product_code: String,
    pub supplier_code: String,
    pub product_category: crate::lot::ProductCategory,
    pub quantity: f64,
    pub unit: Unit,
    pub intake_date: TimeStamp<Utc>,
    pub notes: String,
    /// One entry per package; must sum exactly to `quantity`.
    pub package_quantities: Vec<f64>,
}

/// Field-level rejection sink. The core supplies the message strings but
/// never renders user-facing text beyond them.
pub trait ErrorCollector {
    fn reject(&mut self, field: &str, code: &str, message: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub field: String,
    pub code: String,
    pub message: String,
}

/// Vec-backed collector, enough for any embedding that does not bring its
/// own binding framework.
#[derive(Debug, Default)]
pub struct FieldErrors {
    pub rejections: Vec<Rejection>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn is_empty(&self) -> bool {
        self.rejections.is_empty()
    }
    pub fn has(&self, field: &str) -> bool {
        self.rejections.iter().any(|r| r.field == field)
    }
}

impl ErrorCollector for FieldErrors {
    fn reject(&mut self, field: &str, code: &str, message: &str) {
        self.rejections.push(Rejection {
            field: field.to_owned(),
            code: code.to_owned(),
            message: message.to_owned(),
        });
    }
}

/// Identity performing the operation, stamped onto movements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub address: String,
}

pub trait ActorSource {
    fn current_actor(&self) -> Actor;
}

/// Fixed identity, used by embeddings without a session concept and by
/// the test suites.
#[derive(Debug, Clone)]
pub struct StaticActor(pub String);

impl ActorSource for StaticActor {
    fn current_actor(&self) -> Actor {
        Actor {
            address: self.0.clone(),
        }
    }
}

/// Output of every mutating use case: enough of the lot and its history
/// to render the lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct LotSnapshot {
    pub code: String,
    pub product_code: String,
    pub initial_qty: f64,
    pub current_qty: f64,
    pub unit: Unit,
    pub verdict: Verdict,
    pub status: LotStatus,
    pub traced: bool,
    pub intake_date: TimeStamp<Utc>,
    pub egress_date: Option<TimeStamp<Utc>>,
    pub expiry_date: Option<TimeStamp<Utc>>,
    pub analyses: Vec<Analysis>,
    pub movements: Vec<Movement>,
}

impl LotSnapshot {
    pub fn assemble(lot: &Lot, analyses: Vec<Analysis>, movements: Vec<Movement>) -> Self {
        Self {
            code: lot.code.clone(),
            product_code: lot.product_code.clone(),
            initial_qty: lot.initial_qty,
            current_qty: lot.current_qty,
            unit: lot.unit,
            verdict: lot.verdict,
            status: lot.status,
            traced: lot.traced,
            intake_date: lot.intake_date.clone(),
            egress_date: lot.egress_date.clone(),
            expiry_date: lot.expiry_date.clone(),
            analyses,
            movements,
        }
    }
}
