//! Pre-digested grid inputs.
//!
//! The solver does not know about buses, branches or transformers; the grid
//! model upstream digests those into an admittance matrix aligned with a
//! shared [`SparsityPattern`], plus per-bus load and source descriptors.
//! These types are that interface.

use std::sync::Arc;

use gridflow_core::SparsityPattern;

use crate::error::{Error, Result};
use crate::phase::Symmetry;

/// How a load's power depends on the bus voltage magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    /// Constant power, independent of voltage.
    ConstPq,
    /// Power proportional to voltage magnitude (constant current).
    ConstI,
    /// Power proportional to squared magnitude (constant impedance).
    ConstY,
}

/// A load or generator attached to a bus.
///
/// `s_base` is the complex power *injection* at nominal voltage: negative
/// real part for consumption, positive for generation.
#[derive(Debug, Clone, Copy)]
pub struct Load<S: Symmetry> {
    pub kind: LoadKind,
    pub s_base: S::ComplexValue,
}

/// A voltage source behind a reference admittance.
///
/// Modeled as a fictive two-bus subnetwork: the source bus holds `u_ref`
/// and connects to the grid bus through `y_ref`.
#[derive(Debug, Clone, Copy)]
pub struct Source<S: Symmetry> {
    pub y_ref: S::ComplexTensor,
    pub u_ref: S::ComplexValue,
}

/// Admittance matrix data aligned with a shared sparsity pattern.
///
/// `admittance` is indexed by the pattern's admittance ordering (the
/// targets of [`SparsityPattern::map_lu_y_bus`]); fill-in-only positions
/// carry no admittance.
#[derive(Debug, Clone)]
pub struct YBus<S: Symmetry> {
    pattern: Arc<SparsityPattern>,
    admittance: Vec<S::ComplexTensor>,
}

impl<S: Symmetry> YBus<S> {
    pub fn new(pattern: Arc<SparsityPattern>, admittance: Vec<S::ComplexTensor>) -> Result<Self> {
        if admittance.len() != pattern.nnz_y_bus() {
            return Err(Error::Assembly(format!(
                "admittance vector has {} entries, pattern has {} admittance positions",
                admittance.len(),
                pattern.nnz_y_bus()
            )));
        }
        Ok(Self {
            pattern,
            admittance,
        })
    }

    pub fn size(&self) -> usize {
        self.pattern.size()
    }

    pub fn pattern(&self) -> &Arc<SparsityPattern> {
        &self.pattern
    }

    pub fn admittance(&self) -> &[S::ComplexTensor] {
        &self.admittance
    }
}

/// One power-flow scenario: per-bus loads and sources.
#[derive(Debug, Clone)]
pub struct PowerFlowInput<S: Symmetry> {
    pub loads: Vec<Vec<Load<S>>>,
    pub sources: Vec<Vec<Source<S>>>,
}

impl<S: Symmetry> PowerFlowInput<S> {
    pub fn new(size: usize) -> Self {
        Self {
            loads: vec![Vec::new(); size],
            sources: vec![Vec::new(); size],
        }
    }

    pub fn add_load(&mut self, bus: usize, kind: LoadKind, s_base: S::ComplexValue) {
        self.loads[bus].push(Load { kind, s_base });
    }

    pub fn add_source(&mut self, bus: usize, y_ref: S::ComplexTensor, u_ref: S::ComplexValue) {
        self.sources[bus].push(Source { y_ref, u_ref });
    }

    pub(crate) fn check_size(&self, size: usize) -> Result<()> {
        if self.loads.len() != size || self.sources.len() != size {
            return Err(Error::Assembly(format!(
                "input lists sized {}/{} for a {size}-bus grid",
                self.loads.len(),
                self.sources.len()
            )));
        }
        Ok(())
    }
}
