//! Newton-Raphson Jacobian and mismatch assembly.
//!
//! Per iteration the assembler rebuilds, in place, the block-sparse
//! Jacobian `J` and the power mismatch `del_pq` from the admittance matrix
//! and the current voltage estimate.
//!
//! For every admittance-backed bus pair `(i, j)` the incomplete Jacobian
//! block comes from the complex power flow term
//!
//! ```text
//! S_ij = (u_i (x) conj(u_j)) .* conj(Y_ij)
//! H = Im(S)   N = Re(S)   M = -N   L = H
//! ```
//!
//! Summing `N` and `H` rows over a bus row gives the calculated injection,
//! accumulated negated into `del_pq`; the diagonal block then receives the
//! `+diag(Q)/-diag(P)` corrections that complete the derivative. Loads add
//! their specified power (with voltage-sensitivity terms on the `N`/`L`
//! diagonals for constant-current and constant-impedance kinds), and each
//! source contributes the derivative and injection of a fictive two-bus
//! subnetwork against its reference voltage.
//!
//! Fill-in-only positions of the pattern carry no admittance and are
//! written as zero blocks every time, keeping the factorization
//! precondition intact.

use crate::entry::SparseLuEntry;
use crate::error::{Error, Result};
use crate::grid::{Load, LoadKind, PowerFlowInput, Source, YBus};
use crate::phase::Symmetry;

/// Rebuild `jacobian` and `del_pq` for the voltage estimate `u` with polar
/// state `x`.
pub fn assemble<S: Symmetry>(
    y_bus: &YBus<S>,
    input: &PowerFlowInput<S>,
    u: &[S::ComplexValue],
    x: &[S::JacVector],
    jacobian: &mut [S::JacBlock],
    del_pq: &mut [S::JacVector],
) -> Result<()> {
    let pattern = y_bus.pattern();
    let size = pattern.size();
    input.check_size(size)?;
    check_len(u.len(), size)?;
    check_len(x.len(), size)?;
    check_len(jacobian.len(), pattern.nnz())?;
    check_len(del_pq.len(), size)?;

    let row_indptr = pattern.row_indptr();
    let col_indices = pattern.col_indices();
    let diag_lu = pattern.diag_lu();
    let map_lu_y_bus = pattern.map_lu_y_bus();
    let admittance = y_bus.admittance();

    for row in 0..size {
        del_pq[row] = <S::JacBlock as SparseLuEntry>::vector_zero();

        for k in row_indptr[row]..row_indptr[row + 1] {
            match map_lu_y_bus[k] {
                None => {
                    jacobian[k] = <S::JacBlock as SparseLuEntry>::zero();
                }
                Some(k_y_bus) => {
                    let col = col_indices[k];
                    jacobian[k] = S::hnml(&admittance[k_y_bus], &u[row], &u[col]);
                    // Negative calculated injection: -P = sum(-N), -Q = sum(-H).
                    let n_sum = S::row_sum_n(&jacobian[k]);
                    let h_sum = S::row_sum_h(&jacobian[k]);
                    S::add_p(&mut del_pq[row], &-n_sum);
                    S::add_q(&mut del_pq[row], &-h_sum);
                }
            }
        }

        // Complete the diagonal derivative. del_pq still holds the negative
        // injection here.
        let diag = diag_lu[row];
        let p_neg = S::p_of(&del_pq[row]);
        let q_neg = S::q_of(&del_pq[row]);
        S::add_diag_h(&mut jacobian[diag], &q_neg);
        S::add_diag_n(&mut jacobian[diag], &-p_neg);
        S::add_diag_m(&mut jacobian[diag], &-p_neg);
        S::add_diag_l(&mut jacobian[diag], &-q_neg);

        add_loads::<S>(&input.loads[row], row, diag, x, jacobian, del_pq);
        add_sources::<S>(&input.sources[row], row, diag, u, jacobian, del_pq);
    }
    Ok(())
}

/// Specified power of the loads at a bus, with the voltage-derivative
/// diagonal terms for the voltage-sensitive kinds.
fn add_loads<S: Symmetry>(
    loads: &[Load<S>],
    bus: usize,
    diag: usize,
    x: &[S::JacVector],
    jacobian: &mut [S::JacBlock],
    del_pq: &mut [S::JacVector],
) {
    for load in loads {
        let p_base = S::real(&load.s_base);
        let q_base = S::imag(&load.s_base);
        match load.kind {
            LoadKind::ConstPq => {
                // PQ_sp = PQ_base, no voltage sensitivity.
                S::add_p(&mut del_pq[bus], &p_base);
                S::add_q(&mut del_pq[bus], &q_base);
            }
            LoadKind::ConstI => {
                // PQ_sp = PQ_base * V, d(PQ_sp)/dV * V = PQ_base * V.
                let v = S::v_of(&x[bus]);
                let p = S::real_mul(&p_base, &v);
                let q = S::real_mul(&q_base, &v);
                S::add_p(&mut del_pq[bus], &p);
                S::add_q(&mut del_pq[bus], &q);
                S::add_diag_n(&mut jacobian[diag], &-p);
                S::add_diag_l(&mut jacobian[diag], &-q);
            }
            LoadKind::ConstY => {
                // PQ_sp = PQ_base * V^2, d(PQ_sp)/dV * V = 2 * PQ_base * V^2.
                let v = S::v_of(&x[bus]);
                let v2 = S::real_mul(&v, &v);
                let p = S::real_mul(&p_base, &v2);
                let q = S::real_mul(&q_base, &v2);
                S::add_p(&mut del_pq[bus], &p);
                S::add_q(&mut del_pq[bus], &q);
                S::add_diag_n(&mut jacobian[diag], &(p * -2.0));
                S::add_diag_l(&mut jacobian[diag], &(q * -2.0));
            }
        }
    }
}

/// Each source is a fictive two-bus subnetwork `(bus, ref)` over `y_ref`.
/// Its calculated injection leaves through the mismatch and its `mm`
/// derivative block lands on the Jacobian diagonal.
fn add_sources<S: Symmetry>(
    sources: &[Source<S>],
    bus: usize,
    diag: usize,
    u: &[S::ComplexValue],
    jacobian: &mut [S::JacBlock],
    del_pq: &mut [S::JacVector],
) {
    for source in sources {
        let mut block_mm = S::hnml(&source.y_ref, &u[bus], &u[bus]);
        let block_ms = S::hnml(&-source.y_ref, &u[bus], &source.u_ref);
        let p_cal = S::row_sum_n(&block_mm) + S::row_sum_n(&block_ms);
        let q_cal = S::row_sum_h(&block_mm) + S::row_sum_h(&block_ms);

        S::add_diag_h(&mut block_mm, &-q_cal);
        S::add_diag_n(&mut block_mm, &p_cal);
        S::add_diag_m(&mut block_mm, &p_cal);
        S::add_diag_l(&mut block_mm, &q_cal);

        S::add_p(&mut del_pq[bus], &-p_cal);
        S::add_q(&mut del_pq[bus], &-q_cal);
        jacobian[diag] += block_mm;
    }
}

fn check_len(actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(Error::DimensionMismatch { expected, actual });
    }
    Ok(())
}
