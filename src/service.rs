//! Service layer API for lot lifecycle operations
//!
//! Every mutating use case follows one contract: pre-validate the request
//! against the error collector (user-input problems are recorded, never
//! thrown), apply the mutation to the lot aggregate, append the movement
//! and commit the whole graph in one batch, then return a fresh snapshot.
//! Invariant violations found while applying are thrown and nothing is
//! committed.

use crate::analysis::{self, Outcome};
use crate::error::{NotFoundError, StateError};
use crate::lot::{Lot, Package, ProductCategory};
use crate::movement::{Movement, MovementDraft, MovementKind, MovementReason};
use crate::recall;
use crate::request::{
    ActorSource, ErrorCollector, IntakeRequest, LotSnapshot, MovementRequest,
};
use crate::reversal::{self, ReversalKind};
use crate::store::{Commit, LotStore};
use crate::trace;
use crate::units::{self, Family};
use crate::utils;
use crate::verdict::{self, LifecycleEvent};

pub struct LotService<S, A> {
    store: S,
    actors: A,
}

impl<S: LotStore, A: ActorSource> LotService<S, A> {
    pub fn new(store: S, actors: A) -> Self {
        Self { store, actors }
    }

    fn load_lot(&self, code: &str) -> anyhow::Result<Lot> {
        self.store
            .find_active_lot(code)?
            .ok_or_else(|| NotFoundError::Lot(code.to_owned()).into())
    }

    fn snapshot(&self, lot: &Lot) -> anyhow::Result<LotSnapshot> {
        let analyses = self.store.analyses_by_lot(&lot.code)?;
        let movements = self.store.movements_by_lot(&lot.code)?;
        Ok(LotSnapshot::assemble(lot, analyses, movements))
    }

    /// Entry movement of a lot, the anchor of its sale lineage.
    fn entry_movement(&self, lot_code: &str) -> anyhow::Result<Option<Movement>> {
        let movements = self.store.movements_by_lot(lot_code)?;
        Ok(movements
            .into_iter()
            .find(|m| matches!(m.kind, MovementKind::Entry | MovementKind::RecallOrigin)))
    }

    /// Receive a new lot: verdict Received, packages laid out as declared,
    /// an Entry movement opening the ledger.
    pub fn intake_lot(
        &self,
        request: &IntakeRequest,
        errors: &mut dyn ErrorCollector,
    ) -> anyhow::Result<Option<LotSnapshot>> {
        let mut ok = true;
        if request.quantity <= 0.0 {
            errors.reject("quantity", "non_positive", "quantity must be greater than zero");
            ok = false;
        }
        if let Err(e) = units::check_package_split(request.quantity, &request.package_quantities) {
            errors.reject("packages", "split_mismatch", &e.to_string());
            ok = false;
        }
        if !ok {
            return Ok(None);
        }

        let actor = self.actors.current_actor();
        let mut lot = Lot::new(
            utils::new_code("lot_")?,
            &request.product_code,
            &request.supplier_code,
            request.product_category,
            request.quantity,
            request.unit,
            request.intake_date.clone(),
        );
        for (i, quantity) in request.package_quantities.iter().enumerate() {
            lot.packages
                .push(Package::new(i as u32 + 1, *quantity, request.unit));
        }

        let entry = Movement::record(MovementDraft {
            lot_code: &lot.code,
            kind: MovementKind::Entry,
            reason: MovementReason::Intake,
            quantity: request.quantity,
            unit: request.unit,
            verdict_before: None,
            verdict_after: Some(lot.verdict),
            actor: &actor.address,
            created_at: request.intake_date.clone(),
            origin_code: None,
            notes: &request.notes,
        })?;

        self.store.commit(Commit::new().lot(lot.clone()).movement(entry))?;
        Ok(Some(self.snapshot(&lot)?))
    }

    fn validate_write_off(
        &self,
        request: &MovementRequest,
        errors: &mut dyn ErrorCollector,
    ) -> anyhow::Result<bool> {
        let Some(lot) = self.store.find_active_lot(&request.lot_code)? else {
            errors.reject("lot_code", "not_found", "lot not found");
            return Ok(false);
        };

        let mut ok = true;
        if lot.traced {
            if request.trace_selections.is_empty() {
                errors.reject(
                    "trace_selections",
                    "required",
                    "a traced lot sells by traceable-unit selection",
                );
                ok = false;
            } else {
                // the ledger records request.quantity, so it must agree
                // with what the selections actually debit
                let selected: u32 = request.trace_selections.iter().map(|s| s.count).sum();
                match units::convert(request.quantity, request.unit, lot.unit) {
                    Ok(converted) if converted == f64::from(selected) => {}
                    Ok(_) => {
                        errors.reject(
                            "quantity",
                            "selection_mismatch",
                            "quantity must equal the number of selected traceable units",
                        );
                        ok = false;
                    }
                    Err(e) => {
                        errors.reject("quantity", "quantity_error", &e.to_string());
                        ok = false;
                    }
                }
            }
            if lot.unit.family() != Family::Count {
                errors.reject("unit", "incompatible", "traced lots are counted in pieces");
                ok = false;
            }
        } else if let Err(e) =
            units::check_available(request.quantity, request.unit, lot.current_qty, lot.unit)
        {
            errors.reject("quantity", "quantity_error", &e.to_string());
            ok = false;
        }

        if !request.package_quantities.is_empty() {
            if let Err(e) =
                units::check_package_split(request.quantity, &request.package_quantities)
            {
                errors.reject("packages", "split_mismatch", &e.to_string());
                ok = false;
            }
        }

        Ok(ok)
    }

    /// Stock write-off: sale or adjustment. The verdict never moves, the
    /// status does. Exhausting the lot cancels its pending analyses.
    pub fn write_off_stock(
        &self,
        request: &MovementRequest,
        reason: MovementReason,
        errors: &mut dyn ErrorCollector,
    ) -> anyhow::Result<Option<LotSnapshot>> {
        if !self.validate_write_off(request, errors)? {
            return Ok(None);
        }

        let mut lot = self.load_lot(&request.lot_code)?;
        let actor = self.actors.current_actor();
        let verdict = verdict::next_verdict(lot.verdict, LifecycleEvent::StockWriteOff)?;

        let origin_code = if reason == MovementReason::Sale {
            self.entry_movement(&lot.code)?.map(|m| m.code)
        } else {
            None
        };
        let kind = match reason {
            MovementReason::Sale => MovementKind::Exit,
            _ => MovementKind::Adjustment,
        };
        let movement = Movement::record(MovementDraft {
            lot_code: &lot.code,
            kind,
            reason,
            quantity: request.quantity,
            unit: request.unit,
            verdict_before: Some(lot.verdict),
            verdict_after: Some(verdict),
            actor: &actor.address,
            created_at: request.movement_date.clone(),
            origin_code,
            notes: &request.notes,
        })?;

        if lot.traced {
            for selection in &request.trace_selections {
                let package = lot
                    .package_mut(selection.package_number)
                    .ok_or_else(|| NotFoundError::Lot(format!(
                        "{} package {}",
                        request.lot_code, selection.package_number
                    )))?;
                trace::mark_sold(
                    &mut package.traces,
                    selection.package_number,
                    selection.count as usize,
                    &movement.code,
                )?;
                lot.debit(
                    f64::from(selection.count),
                    lot.unit,
                    Some(selection.package_number),
                    &request.movement_date,
                )?;
            }
        } else if !request.package_quantities.is_empty() {
            lot.debit_split(
                &request.package_quantities,
                request.unit,
                &request.movement_date,
            )?;
        } else {
            lot.debit(
                request.quantity,
                request.unit,
                request.package_number,
                &request.movement_date,
            )?;
        }
        lot.verdict = verdict;

        let mut commit = Commit::new().lot(lot.clone()).movement(movement);
        if lot.current_qty == 0.0 {
            let mut analyses = self.store.analyses_by_lot(&lot.code)?;
            if analysis::cancel_pending(&mut analyses) > 0 {
                for touched in analyses {
                    commit = commit.analysis(touched);
                }
            }
        }

        self.store.commit(commit)?;
        Ok(Some(self.snapshot(&lot)?))
    }

    /// Quarantine decision: Received -> Quarantine, creating or reusing
    /// the analysis by its number.
    pub fn quarantine_decision(
        &self,
        request: &MovementRequest,
        errors: &mut dyn ErrorCollector,
    ) -> anyhow::Result<Option<LotSnapshot>> {
        let Some(mut lot) = self.store.find_active_lot(&request.lot_code)? else {
            errors.reject("lot_code", "not_found", "lot not found");
            return Ok(None);
        };
        let Some(number) = request.analysis_number.as_deref() else {
            errors.reject("analysis_number", "required", "analysis number is required");
            return Ok(None);
        };

        let verdict = verdict::next_verdict(lot.verdict, LifecycleEvent::QuarantineDecision)?;
        let actor = self.actors.current_actor();

        let mut analyses = self.store.analyses_by_lot(&lot.code)?;
        let analysis = analysis::upsert(&mut analyses, &lot.code, number).clone();

        let movement = Movement::record(MovementDraft {
            lot_code: &lot.code,
            kind: MovementKind::Modification,
            reason: MovementReason::Analysis,
            quantity: 0.0,
            unit: lot.unit,
            verdict_before: Some(lot.verdict),
            verdict_after: Some(verdict),
            actor: &actor.address,
            created_at: request.movement_date.clone(),
            origin_code: None,
            notes: &request.notes,
        })?;
        lot.verdict = verdict;

        self.store.commit(
            Commit::new()
                .lot(lot.clone())
                .movement(movement)
                .analysis(analysis),
        )?;
        Ok(Some(self.snapshot(&lot)?))
    }

    /// Record the analysis result, resolving the quarantine.
    pub fn record_analysis_result(
        &self,
        request: &MovementRequest,
        outcome: Outcome,
        errors: &mut dyn ErrorCollector,
    ) -> anyhow::Result<Option<LotSnapshot>> {
        let Some(mut lot) = self.store.find_active_lot(&request.lot_code)? else {
            errors.reject("lot_code", "not_found", "lot not found");
            return Ok(None);
        };
        let Some(number) = request.analysis_number.as_deref() else {
            errors.reject("analysis_number", "required", "analysis number is required");
            return Ok(None);
        };
        let mut analyses = self.store.analyses_by_lot(&lot.code)?;
        let Some(analysis) = analyses
            .iter_mut()
            .find(|a| a.active && a.number == number)
        else {
            errors.reject("analysis_number", "not_found", "analysis not found");
            return Ok(None);
        };

        let verdict =
            verdict::next_verdict(lot.verdict, LifecycleEvent::AnalysisResult(outcome))?;
        analysis.resolve(
            outcome,
            request.performed_date.clone(),
            request.reanalysis_date.clone(),
            request.expiry_date.clone(),
            request.titer,
            &request.notes,
        )?;
        let analysis = analysis.clone();

        let actor = self.actors.current_actor();
        let movement = Movement::record(MovementDraft {
            lot_code: &lot.code,
            kind: MovementKind::Modification,
            reason: MovementReason::Result,
            quantity: 0.0,
            unit: lot.unit,
            verdict_before: Some(lot.verdict),
            verdict_after: Some(verdict),
            actor: &actor.address,
            created_at: request.movement_date.clone(),
            origin_code: None,
            notes: &request.notes,
        })?;
        lot.verdict = verdict;

        self.store.commit(
            Commit::new()
                .lot(lot.clone())
                .movement(movement)
                .analysis(analysis),
        )?;
        Ok(Some(self.snapshot(&lot)?))
    }

    /// Release the lot for sale. Exactly one active analysis must carry an
    /// expiry date; its date is copied onto the lot.
    pub fn release_lot(
        &self,
        request: &MovementRequest,
        errors: &mut dyn ErrorCollector,
    ) -> anyhow::Result<Option<LotSnapshot>> {
        let Some(mut lot) = self.store.find_active_lot(&request.lot_code)? else {
            errors.reject("lot_code", "not_found", "lot not found");
            return Ok(None);
        };

        let analyses = self.store.analyses_by_lot(&lot.code)?;
        let qualifying: Vec<_> = analyses
            .iter()
            .filter(|a| a.active && a.expiry_date.is_some())
            .collect();
        if qualifying.len() != 1 {
            return Err(StateError::ReleasePrecondition {
                count: qualifying.len(),
            }
            .into());
        }
        let expiry = qualifying[0].expiry_date.clone();

        let verdict = verdict::next_verdict(lot.verdict, LifecycleEvent::Release)?;
        let actor = self.actors.current_actor();
        let movement = Movement::record(MovementDraft {
            lot_code: &lot.code,
            kind: MovementKind::Modification,
            reason: MovementReason::Release,
            quantity: 0.0,
            unit: lot.unit,
            verdict_before: Some(lot.verdict),
            verdict_after: Some(verdict),
            actor: &actor.address,
            created_at: request.movement_date.clone(),
            origin_code: None,
            notes: &request.notes,
        })?;
        lot.verdict = verdict;
        lot.expiry_date = expiry;

        self.store
            .commit(Commit::new().lot(lot.clone()).movement(movement))?;
        Ok(Some(self.snapshot(&lot)?))
    }

    /// Activate unit tracing on a sale-unit lot: numbered units are laid
    /// out across the requested packages, continuing from the lot's
    /// current maximum. The verdict does not move.
    pub fn activate_tracing(
        &self,
        request: &MovementRequest,
        errors: &mut dyn ErrorCollector,
    ) -> anyhow::Result<Option<LotSnapshot>> {
        let Some(mut lot) = self.store.find_active_lot(&request.lot_code)? else {
            errors.reject("lot_code", "not_found", "lot not found");
            return Ok(None);
        };
        if request.trace_selections.is_empty() {
            errors.reject(
                "trace_selections",
                "required",
                "at least one package assignment is required",
            );
            return Ok(None);
        }
        for selection in &request.trace_selections {
            if lot.package(selection.package_number).is_none() {
                errors.reject("trace_selections", "not_found", "package not found");
                return Ok(None);
            }
        }

        if lot.product_category != ProductCategory::SaleUnit {
            return Err(StateError::NotSaleUnit {
                lot: lot.code.clone(),
            }
            .into());
        }

        let verdict = verdict::next_verdict(lot.verdict, LifecycleEvent::TraceActivation)?;
        let actor = self.actors.current_actor();
        let movement = Movement::record(MovementDraft {
            lot_code: &lot.code,
            kind: MovementKind::Modification,
            reason: MovementReason::Trace,
            quantity: 0.0,
            unit: lot.unit,
            verdict_before: Some(lot.verdict),
            verdict_after: Some(verdict),
            actor: &actor.address,
            created_at: request.movement_date.clone(),
            origin_code: None,
            notes: &request.notes,
        })?;

        let mut next_sequence = lot.max_trace_sequence() + 1;
        for selection in &request.trace_selections {
            let movement_code = movement.code.clone();
            if let Some(package) = lot.package_mut(selection.package_number) {
                let start = package.traces.len();
                next_sequence =
                    trace::assign(&mut package.traces, next_sequence, selection.count);
                for unit in &mut package.traces[start..] {
                    unit.link_movement(&movement_code);
                }
            }
        }
        lot.traced = true;

        self.store
            .commit(Commit::new().lot(lot.clone()).movement(movement))?;
        Ok(Some(self.snapshot(&lot)?))
    }

    /// Annul an analysis; the lot's current verdict is cancelled in its
    /// place.
    pub fn annul_analysis(
        &self,
        request: &MovementRequest,
        errors: &mut dyn ErrorCollector,
    ) -> anyhow::Result<Option<LotSnapshot>> {
        let Some(mut lot) = self.store.find_active_lot(&request.lot_code)? else {
            errors.reject("lot_code", "not_found", "lot not found");
            return Ok(None);
        };
        let Some(number) = request.analysis_number.as_deref() else {
            errors.reject("analysis_number", "required", "analysis number is required");
            return Ok(None);
        };
        let mut analyses = self.store.analyses_by_lot(&lot.code)?;
        let Some(analysis) = analyses
            .iter_mut()
            .find(|a| a.active && a.number == number)
        else {
            errors.reject("analysis_number", "not_found", "analysis not found");
            return Ok(None);
        };

        let verdict = verdict::next_verdict(lot.verdict, LifecycleEvent::Annulment)?;
        analysis.annul()?;
        let analysis = analysis.clone();

        let actor = self.actors.current_actor();
        let movement = Movement::record(MovementDraft {
            lot_code: &lot.code,
            kind: MovementKind::Modification,
            reason: MovementReason::Annulment,
            quantity: 0.0,
            unit: lot.unit,
            verdict_before: Some(lot.verdict),
            verdict_after: Some(verdict),
            actor: &actor.address,
            created_at: request.movement_date.clone(),
            origin_code: None,
            notes: &request.notes,
        })?;
        lot.verdict = verdict;

        self.store.commit(
            Commit::new()
                .lot(lot.clone())
                .movement(movement)
                .analysis(analysis),
        )?;
        Ok(Some(self.snapshot(&lot)?))
    }

    /// Undo a previously applied movement. The engine asserts exactly one
    /// active movement of the kind's reason exists, restores the prior
    /// state and leaves both origin and reversal inactive.
    pub fn reverse_movement(
        &self,
        request: &MovementRequest,
        kind: ReversalKind,
    ) -> anyhow::Result<LotSnapshot> {
        let mut lot = self.load_lot(&request.lot_code)?;
        let movements = self.store.movements_by_lot(&lot.code)?;
        let origin = reversal::find_unique_origin(&movements, &lot.code, kind.reason())?;

        let mut analyses = self.store.analyses_by_lot(&lot.code)?;
        let actor = self.actors.current_actor();
        let reversed = reversal::reverse(
            kind,
            &mut lot,
            &mut analyses,
            &origin,
            request.analysis_number.as_deref(),
            &actor.address,
            request.movement_date.clone(),
        )?;

        let mut commit = Commit::new()
            .lot(lot.clone())
            .movement(reversed.origin)
            .movement(reversed.reversal);
        if let Some(analysis) = reversed.analysis {
            commit = commit.analysis(analysis);
        }
        self.store.commit(commit)?;

        self.snapshot(&lot)
    }

    /// Pre-validation of a market withdrawal. A missing origin sale
    /// movement is recorded as a field rejection but the success flag
    /// stays true, matching the observed behaviour of the system this
    /// engine replaces. See DESIGN.md before relying on it.
    pub fn validate_withdrawal(
        &self,
        request: &MovementRequest,
        errors: &mut dyn ErrorCollector,
    ) -> anyhow::Result<bool> {
        let Some(lot) = self.store.find_active_lot(&request.lot_code)? else {
            errors.reject("lot_code", "not_found", "lot not found");
            return Ok(false);
        };

        let Some(origin_code) = request.origin_movement_code.as_deref() else {
            errors.reject("origin_movement_code", "required", "origin movement is required");
            return Ok(false);
        };

        let movements = self.store.movements_by_lot(&lot.code)?;
        if !movements.iter().any(|m| m.active && m.code == origin_code) {
            errors.reject("origin_movement_code", "not_found", "sale movement not found");
        }
        Ok(true)
    }

    /// Market withdrawal: create the recall lot for the returned product
    /// and flag every other sale derived from the same upstream batch.
    pub fn process_withdrawal(
        &self,
        request: &MovementRequest,
        errors: &mut dyn ErrorCollector,
    ) -> anyhow::Result<Option<Vec<LotSnapshot>>> {
        if !self.validate_withdrawal(request, errors)? {
            return Ok(None);
        }

        let lot = self.load_lot(&request.lot_code)?;
        let origin_code = request
            .origin_movement_code
            .as_deref()
            .ok_or_else(|| NotFoundError::Movement("<missing>".to_owned()))?;
        let origin_sale = self
            .store
            .movements_by_lot(&lot.code)?
            .into_iter()
            .find(|m| m.active && m.code == origin_code)
            .ok_or_else(|| NotFoundError::Movement(origin_code.to_owned()))?;

        let actor = self.actors.current_actor();
        let withdrawal =
            recall::process_withdrawal(&self.store, request, &lot, &origin_sale, &actor.address)?;

        self.store.commit(withdrawal.commit)?;

        let mut snapshots = Vec::with_capacity(withdrawal.affected.len());
        for affected in &withdrawal.affected {
            snapshots.push(self.snapshot(affected)?);
        }
        Ok(Some(snapshots))
    }
}
