//! Unit-of-measure conversion and quantity pre-validation

use crate::error::QuantityError;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    #[n(0)]
    Kilogram,
    #[n(1)]
    Gram,
    #[n(2)]
    Milligram,
    #[n(3)]
    Liter,
    #[n(4)]
    Milliliter,
    #[n(5)]
    Piece,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Mass,
    Volume,
    Count,
}

impl Unit {
    pub fn family(&self) -> Family {
        match self {
            Unit::Kilogram | Unit::Gram | Unit::Milligram => Family::Mass,
            Unit::Liter | Unit::Milliliter => Family::Volume,
            Unit::Piece => Family::Count,
        }
    }

    // factor into the family base unit (gram, milliliter, piece)
    fn base_factor(&self) -> f64 {
        match self {
            Unit::Kilogram => 1_000.0,
            Unit::Gram => 1.0,
            Unit::Milligram => 0.001,
            Unit::Liter => 1_000.0,
            Unit::Milliliter => 1.0,
            Unit::Piece => 1.0,
        }
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Unit::Kilogram => "kg",
            Unit::Gram => "g",
            Unit::Milligram => "mg",
            Unit::Liter => "L",
            Unit::Milliliter => "mL",
            Unit::Piece => "un",
        };
        write!(f, "{label}")
    }
}

/// Convert a quantity between units of the same family.
/// Cross-family conversions are rejected.
pub fn convert(quantity: f64, from: Unit, to: Unit) -> Result<f64, QuantityError> {
    if from.family() != to.family() {
        return Err(QuantityError::IncompatibleUnits {
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    Ok(quantity * from.base_factor() / to.base_factor())
}

/// Check a requested quantity against a target's available stock.
/// Pure check: returns the quantity converted into the target's unit,
/// debiting is left to the caller.
pub fn check_available(
    requested: f64,
    requested_unit: Unit,
    available: f64,
    target_unit: Unit,
) -> Result<f64, QuantityError> {
    if requested <= 0.0 {
        return Err(QuantityError::NonPositive);
    }

    let converted = convert(requested, requested_unit, target_unit)?;
    if converted > available {
        return Err(QuantityError::ExceedsAvailable {
            requested: converted,
            available,
            unit: target_unit.to_string(),
        });
    }

    Ok(converted)
}

/// Per-package quantities of a multi-package operation must sum exactly
/// to the lot-level quantity, not merely stay below it.
pub fn check_package_split(lot_quantity: f64, per_package: &[f64]) -> Result<(), QuantityError> {
    let sum: f64 = per_package.iter().sum();

    if (sum - lot_quantity).abs() > f64::EPSILON * lot_quantity.abs().max(1.0) {
        return Err(QuantityError::SplitMismatch {
            sum,
            expected: lot_quantity,
        });
    }

    Ok(())
}
