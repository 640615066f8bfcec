//! Repository capability consumed by the engine, plus the sled-backed
//! implementation used by the integration tests and the reference
//! embedding. Entities are CBOR-encoded; one [`Commit`] is applied as a
//! single atomic batch, which is the transaction boundary of a use case.

use crate::analysis::Analysis;
use crate::lot::Lot;
use crate::movement::{self, Movement};
use sled::Batch;
use std::sync::Arc;

/// Everything a use case wants persisted, committed together or not at
/// all. Callers serialize access to a lot aggregate before building one.
#[derive(Debug, Default)]
pub struct Commit {
    pub lots: Vec<Lot>,
    pub movements: Vec<Movement>,
    pub analyses: Vec<Analysis>,
}

impl Commit {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn lot(mut self, lot: Lot) -> Self {
        self.lots.push(lot);
        self
    }
    pub fn movement(mut self, movement: Movement) -> Self {
        self.movements.push(movement);
        self
    }
    pub fn analysis(mut self, analysis: Analysis) -> Self {
        self.analyses.push(analysis);
        self
    }
}

pub trait LotStore {
    /// Find a lot by durable code; inactive lots are invisible here.
    fn find_active_lot(&self, code: &str) -> anyhow::Result<Option<Lot>>;
    /// Find a movement by durable code, active or not.
    fn find_movement(&self, code: &str) -> anyhow::Result<Option<Movement>>;
    /// All movements of a lot, in ledger order.
    fn movements_by_lot(&self, lot_code: &str) -> anyhow::Result<Vec<Movement>>;
    /// All movements referencing the given origin movement.
    fn movements_by_origin(&self, origin_code: &str) -> anyhow::Result<Vec<Movement>>;
    /// All analyses of a lot.
    fn analyses_by_lot(&self, lot_code: &str) -> anyhow::Result<Vec<Analysis>>;
    /// Apply a commit atomically.
    fn commit(&self, commit: Commit) -> anyhow::Result<()>;
}

pub struct SledStore {
    instance: Arc<sled::Db>,
}

fn lot_key(code: &str) -> String {
    format!("lot/{code}")
}
fn movement_key(lot_code: &str, code: &str) -> String {
    format!("mov/{lot_code}/{code}")
}
fn analysis_key(lot_code: &str, number: &str) -> String {
    format!("ana/{lot_code}/{number}")
}

impl SledStore {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }

    fn scan_movements(
        &self,
        prefix: &str,
        mut keep: impl FnMut(&Movement) -> bool,
    ) -> anyhow::Result<Vec<Movement>> {
        let mut movements = Vec::new();
        for entry in self.instance.scan_prefix(prefix.as_bytes()) {
            let (_, value) = entry?;
            let movement: Movement = minicbor::decode(&value)?;
            if keep(&movement) {
                movements.push(movement);
            }
        }
        movement::sort_ledger(&mut movements);
        Ok(movements)
    }
}

impl LotStore for SledStore {
    fn find_active_lot(&self, code: &str) -> anyhow::Result<Option<Lot>> {
        let Some(value) = self.instance.get(lot_key(code).as_bytes())? else {
            return Ok(None);
        };
        let lot: Lot = minicbor::decode(&value)?;
        Ok(lot.active.then_some(lot))
    }

    fn find_movement(&self, code: &str) -> anyhow::Result<Option<Movement>> {
        let found = self.scan_movements("mov/", |m| m.code == code)?;
        Ok(found.into_iter().next())
    }

    fn movements_by_lot(&self, lot_code: &str) -> anyhow::Result<Vec<Movement>> {
        self.scan_movements(&format!("mov/{lot_code}/"), |_| true)
    }

    fn movements_by_origin(&self, origin_code: &str) -> anyhow::Result<Vec<Movement>> {
        self.scan_movements("mov/", |m| {
            m.origin_code.as_deref() == Some(origin_code)
        })
    }

    fn analyses_by_lot(&self, lot_code: &str) -> anyhow::Result<Vec<Analysis>> {
        let prefix = format!("ana/{lot_code}/");
        let mut analyses = Vec::new();
        for entry in self.instance.scan_prefix(prefix.as_bytes()) {
            let (_, value) = entry?;
            analyses.push(minicbor::decode::<Analysis>(&value)?);
        }
        analyses.sort_by(|a, b| a.number.cmp(&b.number));
        Ok(analyses)
    }

    fn commit(&self, commit: Commit) -> anyhow::Result<()> {
        let mut batch = Batch::default();
        for lot in &commit.lots {
            batch.insert(lot_key(&lot.code).into_bytes(), minicbor::to_vec(lot)?);
        }
        for movement in &commit.movements {
            batch.insert(
                movement_key(&movement.lot_code, &movement.code).into_bytes(),
                minicbor::to_vec(movement)?,
            );
        }
        for analysis in &commit.analyses {
            batch.insert(
                analysis_key(&analysis.lot_code, &analysis.number).into_bytes(),
                minicbor::to_vec(analysis)?,
            );
        }
        self.instance.apply_batch(batch)?;
        Ok(())
    }
}
