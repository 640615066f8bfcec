use anyhow::Context;
use lot_ledger::analysis::Outcome;
use lot_ledger::error::ConflictError;
use lot_ledger::lot::{LotStatus, ProductCategory};
use lot_ledger::movement::{Movement, MovementDraft, MovementKind, MovementReason};
use lot_ledger::request::{FieldErrors, IntakeRequest, MovementRequest, StaticActor};
use lot_ledger::reversal::ReversalKind;
use lot_ledger::service::LotService;
use lot_ledger::store::{Commit, LotStore, SledStore};
use lot_ledger::trace::{TraceAssignment, TraceStatus};
use lot_ledger::units::Unit;
use lot_ledger::utils::TimeStamp;
use lot_ledger::verdict::Verdict;
use sled::open;
use std::sync::Arc;

use tempfile::tempdir; // Use for test db cleanup.

// Sled uses file-based locking to prevent concurrent access, so each test
// creates its own database on temp for simplified cleanup. The returned
// extra store shares the same handle for direct reads.
fn new_service(
    dir: &tempfile::TempDir,
    name: &str,
) -> anyhow::Result<(LotService<SledStore, StaticActor>, SledStore)> {
    let db = open(dir.path().join(name))?;
    let db = Arc::new(db);
    db.clear()?;
    let service = LotService::new(
        SledStore::new(db.clone()),
        StaticActor("user_qa".to_string()),
    );
    Ok((service, SledStore::new(db)))
}

fn intake(quantity: f64, unit: Unit, category: ProductCategory, packages: &[f64]) -> IntakeRequest {
    IntakeRequest {
        product_code: "prod_amoxicillin".to_string(),
        supplier_code: "supp_acme".to_string(),
        product_category: category,
        quantity,
        unit,
        intake_date: TimeStamp::now(),
        notes: String::new(),
        package_quantities: packages.to_vec(),
    }
}

/// Scenario A: a 10 kg stock adjustment against a 100 kg lot leaves 90 kg
/// and moves the status to EnUso.
#[test]
fn scenario_a_stock_adjustment() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, _store) = new_service(&temp_dir, "scenario_a.db")?;
    let mut errors = FieldErrors::new();

    let lot = service
        .intake_lot(
            &intake(100.0, Unit::Kilogram, ProductCategory::Bulk, &[100.0]),
            &mut errors,
        )?
        .context("intake rejected")?;
    assert!(errors.is_empty());
    assert_eq!(lot.verdict, Verdict::Received);
    assert_eq!(lot.status, LotStatus::Disponible);

    let request = MovementRequest::for_lot(&lot.code, 10.0, Unit::Kilogram);
    let lot = service
        .write_off_stock(&request, MovementReason::Adjustment, &mut errors)?
        .context("write-off rejected")?;

    assert!(errors.is_empty());
    assert_eq!(lot.current_qty, 90.0);
    assert_eq!(lot.status, LotStatus::EnUso);
    assert_eq!(lot.verdict, Verdict::Received); // write-off never moves the verdict
    Ok(())
}

/// Scenario B: selling 10 units of a traced lot marks exactly 10 units
/// SOLD and debits package and lot by 10.
#[test]
fn scenario_b_traced_sale() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, store) = new_service(&temp_dir, "scenario_b.db")?;
    let mut errors = FieldErrors::new();

    let lot = service
        .intake_lot(
            &intake(100.0, Unit::Piece, ProductCategory::SaleUnit, &[100.0]),
            &mut errors,
        )?
        .context("intake rejected")?;

    let mut activation = MovementRequest::for_lot(&lot.code, 0.0, Unit::Piece);
    activation.trace_selections = vec![TraceAssignment {
        package_number: 1,
        count: 100,
    }];
    let lot = service
        .activate_tracing(&activation, &mut errors)?
        .context("trace activation rejected")?;
    assert!(lot.traced);

    let mut sale = MovementRequest::for_lot(&lot.code, 10.0, Unit::Piece);
    sale.trace_selections = vec![TraceAssignment {
        package_number: 1,
        count: 10,
    }];
    let lot = service
        .write_off_stock(&sale, MovementReason::Sale, &mut errors)?
        .context("sale rejected")?;
    assert!(errors.is_empty());

    assert_eq!(lot.current_qty, 90.0);

    // re-read the stored lot to count sold units and package quantity
    let stored = store.find_active_lot(&lot.code)?.context("lot vanished")?;
    let package = stored.package(1).context("package vanished")?;

    assert_eq!(package.current_qty, 90.0);
    let sold: Vec<u32> = package
        .traces
        .iter()
        .filter(|t| t.status == TraceStatus::Sold)
        .map(|t| t.sequence)
        .collect();
    assert_eq!(sold, (1..=10).collect::<Vec<u32>>()); // ascending, exactly ten
    Ok(())
}

/// Scenario C: reversing a quarantine decision returns the verdict to its
/// pre-decision value, deactivates the analysis, and leaves both the
/// origin and the reversal movement inactive.
#[test]
fn scenario_c_quarantine_reversal() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, _store) = new_service(&temp_dir, "scenario_c.db")?;
    let mut errors = FieldErrors::new();

    let lot = service
        .intake_lot(
            &intake(50.0, Unit::Kilogram, ProductCategory::Bulk, &[50.0]),
            &mut errors,
        )?
        .context("intake rejected")?;

    let mut decision = MovementRequest::for_lot(&lot.code, 0.0, Unit::Kilogram);
    decision.analysis_number = Some("AN-0001".to_string());
    let lot = service
        .quarantine_decision(&decision, &mut errors)?
        .context("decision rejected")?;
    assert_eq!(lot.verdict, Verdict::Quarantine);
    assert_eq!(lot.analyses.len(), 1);

    let reversal = MovementRequest::for_lot(&lot.code, 0.0, Unit::Kilogram);
    let lot = service.reverse_movement(&reversal, ReversalKind::QuarantineDecision)?;

    assert_eq!(lot.verdict, Verdict::Received);
    assert!(lot.analyses.iter().all(|a| !a.active));
    let quarantine_movements: Vec<&Movement> = lot
        .movements
        .iter()
        .filter(|m| m.reason == MovementReason::Analysis)
        .collect();
    assert_eq!(quarantine_movements.len(), 2); // origin + reversal
    assert!(quarantine_movements.iter().all(|m| !m.active));
    Ok(())
}

/// Scenario D: reversing an analysis annulment whose analysis is no longer
/// annulled fails with the documented message and writes nothing.
#[test]
fn scenario_d_annulment_reversal_guard() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, store) = new_service(&temp_dir, "scenario_d.db")?;
    let mut errors = FieldErrors::new();

    let lot = service
        .intake_lot(
            &intake(50.0, Unit::Kilogram, ProductCategory::Bulk, &[50.0]),
            &mut errors,
        )?
        .context("intake rejected")?;

    let mut decision = MovementRequest::for_lot(&lot.code, 0.0, Unit::Kilogram);
    decision.analysis_number = Some("AN-0001".to_string());
    service
        .quarantine_decision(&decision, &mut errors)?
        .context("decision rejected")?;

    let lot = service
        .annul_analysis(&decision, &mut errors)?
        .context("annulment rejected")?;
    assert_eq!(lot.verdict, Verdict::Annulled);

    // tamper with the stored analysis so it no longer reads Annulled,
    // simulating the corruption the reversal guard exists for
    let mut analysis = store.analyses_by_lot(&lot.code)?.remove(0);
    analysis.outcome = Some(Outcome::Approved);
    store.commit(Commit::new().analysis(analysis))?;

    let before = store.find_active_lot(&lot.code)?.context("lot vanished")?;
    let mut reversal = MovementRequest::for_lot(&lot.code, 0.0, Unit::Kilogram);
    reversal.analysis_number = Some("AN-0001".to_string());
    let err = service
        .reverse_movement(&reversal, ReversalKind::Annulment)
        .unwrap_err();

    assert_eq!(err.to_string(), "last analysis is not annulled");
    // zero writes: the stored lot is byte-for-byte what it was
    let after = store.find_active_lot(&lot.code)?.context("lot vanished")?;
    assert_eq!(before, after);
    Ok(())
}

/// Scenario E: two equal analysis movements make the reversal lookup fail
/// with the localized count message and zero writes.
#[test]
fn scenario_e_duplicate_movement_lookup() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, store) = new_service(&temp_dir, "scenario_e.db")?;
    let mut errors = FieldErrors::new();

    let lot = service
        .intake_lot(
            &intake(50.0, Unit::Kilogram, ProductCategory::Bulk, &[50.0]),
            &mut errors,
        )?
        .context("intake rejected")?;

    let mut decision = MovementRequest::for_lot(&lot.code, 0.0, Unit::Kilogram);
    decision.analysis_number = Some("AN-0001".to_string());
    let lot = service
        .quarantine_decision(&decision, &mut errors)?
        .context("decision rejected")?;

    // plant a duplicate active analysis movement behind the engine's back
    let duplicate = Movement::record(MovementDraft {
        lot_code: &lot.code,
        kind: MovementKind::Modification,
        reason: MovementReason::Analysis,
        quantity: 0.0,
        unit: Unit::Kilogram,
        verdict_before: Some(Verdict::Received),
        verdict_after: Some(Verdict::Quarantine),
        actor: "user_rogue",
        created_at: TimeStamp::now(),
        origin_code: None,
        notes: "",
    })?;
    store.commit(Commit::new().movement(duplicate))?;

    let movement_count = store.movements_by_lot(&lot.code)?.len();
    let reversal = MovementRequest::for_lot(&lot.code, 0.0, Unit::Kilogram);
    let err = service
        .reverse_movement(&reversal, ReversalKind::QuarantineDecision)
        .unwrap_err();

    let conflict = err.downcast_ref::<ConflictError>().context("not a conflict")?;
    assert!(
        conflict
            .to_string()
            .starts_with("Existen 2 movimientos de análisis iguales"),
        "unexpected message: {conflict}"
    );
    // zero writes: no reversal movement appeared
    assert_eq!(store.movements_by_lot(&lot.code)?.len(), movement_count);
    Ok(())
}

/// A write-off with no package target spreads the debit across packages,
/// so the packaged quantity never outgrows the lot quantity.
#[test]
fn untargeted_write_off_spreads_across_packages() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, store) = new_service(&temp_dir, "spread_write_off.db")?;
    let mut errors = FieldErrors::new();

    let lot = service
        .intake_lot(
            &intake(100.0, Unit::Kilogram, ProductCategory::Bulk, &[60.0, 40.0]),
            &mut errors,
        )?
        .context("intake rejected")?;

    let request = MovementRequest::for_lot(&lot.code, 50.0, Unit::Kilogram);
    let lot = service
        .write_off_stock(&request, MovementReason::Sale, &mut errors)?
        .context("sale rejected")?;
    assert!(errors.is_empty());
    assert_eq!(lot.current_qty, 50.0);

    let stored = store.find_active_lot(&lot.code)?.context("lot vanished")?;
    assert_eq!(stored.package(1).context("package vanished")?.current_qty, 10.0);
    assert_eq!(stored.package(2).context("package vanished")?.current_qty, 40.0);
    assert!(stored.packaged_quantity()? <= stored.current_qty);
    Ok(())
}

/// A write-off naming a package the lot does not have fails and writes
/// nothing.
#[test]
fn write_off_rejects_an_unknown_package() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, store) = new_service(&temp_dir, "unknown_package.db")?;
    let mut errors = FieldErrors::new();

    let lot = service
        .intake_lot(
            &intake(100.0, Unit::Kilogram, ProductCategory::Bulk, &[100.0]),
            &mut errors,
        )?
        .context("intake rejected")?;

    let mut request = MovementRequest::for_lot(&lot.code, 10.0, Unit::Kilogram);
    request.package_number = Some(7);
    let err = service
        .write_off_stock(&request, MovementReason::Adjustment, &mut errors)
        .unwrap_err();
    assert!(err.to_string().contains("package 7"));

    let stored = store.find_active_lot(&lot.code)?.context("lot vanished")?;
    assert_eq!(stored.current_qty, 100.0);
    assert_eq!(store.movements_by_lot(&lot.code)?.len(), 1); // intake only
    Ok(())
}

/// A multi-package write-off applies the validated split to each named
/// package.
#[test]
fn write_off_split_debits_each_package() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, store) = new_service(&temp_dir, "split_write_off.db")?;
    let mut errors = FieldErrors::new();

    let lot = service
        .intake_lot(
            &intake(100.0, Unit::Kilogram, ProductCategory::Bulk, &[60.0, 40.0]),
            &mut errors,
        )?
        .context("intake rejected")?;

    let mut request = MovementRequest::for_lot(&lot.code, 50.0, Unit::Kilogram);
    request.package_quantities = vec![30.0, 20.0];
    let lot = service
        .write_off_stock(&request, MovementReason::Adjustment, &mut errors)?
        .context("write-off rejected")?;
    assert!(errors.is_empty());
    assert_eq!(lot.current_qty, 50.0);

    let stored = store.find_active_lot(&lot.code)?.context("lot vanished")?;
    assert_eq!(stored.package(1).context("package vanished")?.current_qty, 30.0);
    assert_eq!(stored.package(2).context("package vanished")?.current_qty, 20.0);
    Ok(())
}

/// Draining the lot stamps the egress date and cancels every analysis
/// still waiting for a result.
#[test]
fn exhausting_write_off_cancels_pending_analyses() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, _store) = new_service(&temp_dir, "exhaustion.db")?;
    let mut errors = FieldErrors::new();

    let lot = service
        .intake_lot(
            &intake(50.0, Unit::Kilogram, ProductCategory::Bulk, &[50.0]),
            &mut errors,
        )?
        .context("intake rejected")?;

    let mut decision = MovementRequest::for_lot(&lot.code, 0.0, Unit::Kilogram);
    decision.analysis_number = Some("AN-0001".to_string());
    service
        .quarantine_decision(&decision, &mut errors)?
        .context("decision rejected")?;

    let sale = MovementRequest::for_lot(&lot.code, 50.0, Unit::Kilogram);
    let lot = service
        .write_off_stock(&sale, MovementReason::Sale, &mut errors)?
        .context("sale rejected")?;
    assert!(errors.is_empty());

    assert_eq!(lot.current_qty, 0.0);
    assert!(lot.egress_date.is_some());
    assert_eq!(lot.analyses.len(), 1);
    assert_eq!(lot.analyses[0].outcome, Some(Outcome::Cancelled));
    Ok(())
}

/// The declared sale quantity of a traced lot must equal the number of
/// selected traceable units, or the ledger would record a false delta.
#[test]
fn traced_sale_quantity_must_match_selected_units() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, store) = new_service(&temp_dir, "traced_mismatch.db")?;
    let mut errors = FieldErrors::new();

    let lot = service
        .intake_lot(
            &intake(100.0, Unit::Piece, ProductCategory::SaleUnit, &[100.0]),
            &mut errors,
        )?
        .context("intake rejected")?;

    let mut activation = MovementRequest::for_lot(&lot.code, 0.0, Unit::Piece);
    activation.trace_selections = vec![TraceAssignment {
        package_number: 1,
        count: 100,
    }];
    service
        .activate_tracing(&activation, &mut errors)?
        .context("trace activation rejected")?;

    // declares ten but selects five
    let mut sale = MovementRequest::for_lot(&lot.code, 10.0, Unit::Piece);
    sale.trace_selections = vec![TraceAssignment {
        package_number: 1,
        count: 5,
    }];
    let outcome = service.write_off_stock(&sale, MovementReason::Sale, &mut errors)?;

    assert!(outcome.is_none());
    assert!(errors.has("quantity"));
    let stored = store.find_active_lot(&lot.code)?.context("lot vanished")?;
    assert_eq!(stored.current_qty, 100.0); // untouched
    Ok(())
}
