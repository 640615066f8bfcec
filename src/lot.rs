//! Lot and package entities
//!
//! A lot owns its packages (and, through them, its traceable units).
//! Movements and analyses are reached through store queries instead of
//! owned back-pointers, so the entity graph stays acyclic.

use crate::error::QuantityError;
use crate::trace::TraceableUnit;
use crate::units::{self, Unit};
use crate::utils::TimeStamp;
use crate::verdict::Verdict;
use chrono::Utc;
use uuid7::uuid7;

// Unit conversion leaves sub-nanogram float dust behind a full debit;
// residue below this fraction of the initial quantity counts as exhausted.
const EXHAUSTION_TOLERANCE: f64 = 1e-9;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LotStatus {
    #[n(0)]
    Disponible,
    #[n(1)]
    EnUso,
}

/// Master-data category of the lot's product, snapshotted at intake.
/// Only sale-unit products may activate unit tracing.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductCategory {
    #[n(0)]
    Bulk,
    #[n(1)]
    SaleUnit,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Package {
    #[n(0)]
    pub number: u32, // unique within the lot
    #[n(1)]
    pub initial_qty: f64,
    #[n(2)]
    pub current_qty: f64,
    #[n(3)]
    pub unit: Unit,
    #[n(4)]
    pub status: LotStatus,
    #[n(5)]
    pub active: bool,
    #[n(6)]
    pub traces: Vec<TraceableUnit>,
}

impl Package {
    pub fn new(number: u32, quantity: f64, unit: Unit) -> Self {
        Self {
            number,
            initial_qty: quantity,
            current_qty: quantity,
            unit,
            status: LotStatus::Disponible,
            active: true,
            traces: Vec::new(),
        }
    }

    /// Debit stock from the package after a validator pass.
    pub fn debit(&mut self, quantity: f64, unit: Unit) -> Result<(), QuantityError> {
        let converted = units::check_available(quantity, unit, self.current_qty, self.unit)?;
        self.current_qty -= converted;
        if self.current_qty <= EXHAUSTION_TOLERANCE * self.initial_qty.abs().max(1.0) {
            self.current_qty = 0.0;
        }
        self.status = LotStatus::EnUso;
        Ok(())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Lot {
    #[n(0)]
    pub id: String, // uuid7 surrogate
    #[n(1)]
    pub code: String,
    #[n(2)]
    pub product_code: String,
    #[n(3)]
    pub supplier_code: String,
    #[n(4)]
    pub product_category: ProductCategory,
    #[n(5)]
    pub initial_qty: f64,
    #[n(6)]
    pub current_qty: f64,
    #[n(7)]
    pub unit: Unit,
    #[n(8)]
    pub intake_date: TimeStamp<Utc>,
    #[n(9)]
    pub egress_date: Option<TimeStamp<Utc>>,
    #[n(10)]
    pub expiry_date: Option<TimeStamp<Utc>>,
    #[n(11)]
    pub verdict: Verdict,
    #[n(12)]
    pub status: LotStatus,
    #[n(13)]
    pub traced: bool,
    #[n(14)]
    pub packages: Vec<Package>,
    #[n(15)]
    pub active: bool,
}

impl Lot {
    pub fn new(
        code: String,
        product_code: &str,
        supplier_code: &str,
        product_category: ProductCategory,
        quantity: f64,
        unit: Unit,
        intake_date: TimeStamp<Utc>,
    ) -> Self {
        Self {
            id: uuid7().to_string(),
            code,
            product_code: product_code.to_owned(),
            supplier_code: supplier_code.to_owned(),
            product_category,
            initial_qty: quantity,
            current_qty: quantity,
            unit,
            intake_date,
            egress_date: None,
            expiry_date: None,
            verdict: Verdict::Received,
            status: LotStatus::Disponible,
            traced: false,
            packages: Vec::new(),
            active: true,
        }
    }

    pub fn package(&self, number: u32) -> Option<&Package> {
        self.packages.iter().find(|p| p.active && p.number == number)
    }

    pub fn package_mut(&mut self, number: u32) -> Option<&mut Package> {
        self.packages
            .iter_mut()
            .find(|p| p.active && p.number == number)
    }

    /// Highest traceable-unit sequence currently assigned in the lot.
    /// New assignments continue from here.
    pub fn max_trace_sequence(&self) -> u32 {
        self.packages
            .iter()
            .flat_map(|p| p.traces.iter())
            .map(|t| t.sequence)
            .max()
            .unwrap_or(0)
    }

    /// Debit lot-level stock after a validator pass. A named package takes
    /// the whole delta; without one the debit drains packages in number
    /// order so the packaged quantity never outgrows the lot quantity.
    /// Stamps the egress date when the lot runs dry.
    pub fn debit(
        &mut self,
        quantity: f64,
        unit: Unit,
        package_number: Option<u32>,
        at: &TimeStamp<Utc>,
    ) -> Result<(), QuantityError> {
        let converted = units::check_available(quantity, unit, self.current_qty, self.unit)?;

        match package_number {
            Some(number) => {
                let package = self
                    .package_mut(number)
                    .ok_or(QuantityError::UnknownPackage { package: number })?;
                package.debit(quantity, unit)?;
            }
            None => self.spread_debit(converted)?,
        }

        self.settle(converted, at);
        Ok(())
    }

    /// Debit with an explicit per-package split, one entry per package
    /// number starting at 1. The split's sum is the lot-level delta.
    pub fn debit_split(
        &mut self,
        per_package: &[f64],
        unit: Unit,
        at: &TimeStamp<Utc>,
    ) -> Result<(), QuantityError> {
        let total: f64 = per_package.iter().sum();
        let converted = units::check_available(total, unit, self.current_qty, self.unit)?;

        for (i, quantity) in per_package.iter().enumerate() {
            let number = i as u32 + 1;
            let package = self
                .package_mut(number)
                .ok_or(QuantityError::UnknownPackage { package: number })?;
            package.debit(*quantity, unit)?;
        }

        self.settle(converted, at);
        Ok(())
    }

    // Drain packages in number order until the delta is covered; any
    // remainder comes off the unpackaged portion of the lot.
    fn spread_debit(&mut self, converted: f64) -> Result<(), QuantityError> {
        let lot_unit = self.unit;
        let mut remaining = converted;
        for package in self.packages.iter_mut().filter(|p| p.active) {
            if remaining <= 0.0 {
                break;
            }
            let held = units::convert(package.current_qty, package.unit, lot_unit)?;
            if held <= 0.0 {
                continue;
            }
            let take = remaining.min(held);
            package.current_qty = if take >= held {
                0.0
            } else {
                package.current_qty - units::convert(take, lot_unit, package.unit)?
            };
            package.status = LotStatus::EnUso;
            remaining -= take;
        }
        Ok(())
    }

    fn settle(&mut self, converted: f64, at: &TimeStamp<Utc>) {
        self.current_qty -= converted;
        self.status = LotStatus::EnUso;
        if self.current_qty <= EXHAUSTION_TOLERANCE * self.initial_qty.abs().max(1.0) {
            self.current_qty = 0.0;
            self.egress_date = Some(at.clone());
        }
    }

    /// Sum of the current quantities of active packages, in the lot's unit.
    pub fn packaged_quantity(&self) -> Result<f64, QuantityError> {
        let mut sum = 0.0;
        for package in self.packages.iter().filter(|p| p.active) {
            sum += units::convert(package.current_qty, package.unit, self.unit)?;
        }
        Ok(sum)
    }
}
