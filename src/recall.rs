//! Recall cascade: given a sale being withdrawn from the market, build
//! the new recall lot and flag every other sale derived from the same
//! upstream batch.

use crate::lot::Lot;
use crate::movement::{Movement, MovementDraft, MovementKind, MovementReason};
use crate::request::MovementRequest;
use crate::store::{Commit, LotStore};
use crate::utils;

/// Result of a withdrawal: affected lots in insertion order (the recall
/// lot first, then every flagged sold lot), plus the records to commit.
#[derive(Debug)]
pub struct Withdrawal {
    pub affected: Vec<Lot>,
    pub commit: Commit,
}

/// Walk `origin_code` links backward to the movement at the root of the
/// batch lineage.
pub fn lineage_root<S: LotStore>(store: &S, movement: &Movement) -> anyhow::Result<Movement> {
    let mut current = movement.clone();
    let mut seen = vec![current.code.clone()];

    while let Some(origin_code) = current.origin_code.clone() {
        if seen.contains(&origin_code) {
            break; // defective cycle in stored data, stop at what we have
        }
        match store.find_movement(&origin_code)? {
            Some(parent) => {
                seen.push(parent.code.clone());
                current = parent;
            }
            None => break,
        }
    }
    Ok(current)
}

/// Every active sale movement reachable forward from `root`, except the
/// originating sale itself.
fn derived_sales<S: LotStore>(
    store: &S,
    root: &Movement,
    origin_sale_code: &str,
) -> anyhow::Result<Vec<Movement>> {
    let mut sales = Vec::new();
    let mut queue = vec![root.code.clone()];
    let mut visited = vec![root.code.clone()];

    while let Some(code) = queue.pop() {
        for child in store.movements_by_origin(&code)? {
            if visited.contains(&child.code) {
                continue;
            }
            visited.push(child.code.clone());

            if child.active
                && child.kind == MovementKind::Exit
                && child.reason == MovementReason::Sale
                && child.code != origin_sale_code
            {
                sales.push(child.clone());
            }
            queue.push(child.code);
        }
    }
    Ok(sales)
}

/// Two sub-steps writing into one accumulating result list: (1) create the
/// recall lot for the physically returned product; (2) flag every sibling
/// sale's lot with a recall-derived movement. All lot lookups happen
/// before anything is staged, so a failed lookup leaves every lot
/// untouched.
pub fn process_withdrawal<S: LotStore>(
    store: &S,
    request: &MovementRequest,
    sold_lot: &Lot,
    origin_sale: &Movement,
    actor: &str,
) -> anyhow::Result<Withdrawal> {
    // resolve every affected lot up front
    let root = lineage_root(store, origin_sale)?;
    let siblings = derived_sales(store, &root, &origin_sale.code)?;
    let mut sibling_lots = Vec::with_capacity(siblings.len());
    for sale in &siblings {
        let lot = store.find_active_lot(&sale.lot_code)?.ok_or_else(|| {
            crate::error::NotFoundError::Lot(sale.lot_code.clone())
        })?;
        sibling_lots.push((lot, sale.clone()));
    }

    let mut affected = Vec::new();
    let mut commit = Commit::new();

    // creation: the returned product becomes a new lot of its own
    let recall_lot = Lot::new(
        utils::new_code("lot_")?,
        &sold_lot.product_code,
        &sold_lot.supplier_code,
        sold_lot.product_category,
        request.quantity,
        request.unit,
        request.movement_date.clone(),
    );
    let entry = Movement::record(MovementDraft {
        lot_code: &recall_lot.code,
        kind: MovementKind::RecallOrigin,
        reason: MovementReason::Recall,
        quantity: request.quantity,
        unit: request.unit,
        verdict_before: None,
        verdict_after: Some(recall_lot.verdict),
        actor,
        created_at: request.movement_date.clone(),
        origin_code: Some(origin_sale.code.clone()),
        notes: &request.notes,
    })?;
    affected.push(recall_lot.clone());
    commit = commit.lot(recall_lot).movement(entry);

    // propagation: flag every sibling sale's lot
    for (lot, sale) in sibling_lots {
        let flag = Movement::record(MovementDraft {
            lot_code: &lot.code,
            kind: MovementKind::RecallDerived,
            reason: MovementReason::Recall,
            quantity: sale.quantity,
            unit: sale.unit,
            verdict_before: Some(lot.verdict),
            verdict_after: Some(lot.verdict),
            actor,
            created_at: request.movement_date.clone(),
            origin_code: Some(origin_sale.code.clone()),
            notes: &request.notes,
        })?;
        commit = commit.movement(flag);
        affected.push(lot);
    }

    Ok(Withdrawal { affected, commit })
}
