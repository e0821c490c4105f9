//! Stratum is a solver-control library for composite-grid problems: it
//! drives FAC (full approximation scheme) multigrid cycles over a hierarchy
//! of structured patch levels, and couples several physical variables
//! through a block Gauss-Seidel preconditioner built from per-variable
//! sub-preconditioners. The multilevel numerics themselves live behind a
//! strategy interface, so the cycle driver never inspects field values;
//! a one-dimensional Poisson strategy is included as a reference
//! implementation and testbed.

pub mod block_gauss_seidel;
pub mod fac;
pub mod hierarchy;
pub mod poisson;
pub mod solver;
pub mod vector;
