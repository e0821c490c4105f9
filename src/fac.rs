use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::vector::CompositeVector;

/// The recursion pattern of one multigrid cycle. A V-cycle descends to the
/// coarsest level once; a W-cycle revisits each coarser hierarchy twice; an
/// F-cycle descends W-shaped and then V-shaped, so its second descent starts
/// from the solution already improved by the first. Strictly more work than
/// V, strictly less than W.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MgCycleType {
    V,
    W,
    F,
}

impl FromStr for MgCycleType {
    type Err = String;

    /// Accepts the single-letter names "V" / "W" / "F" in either case, with
    /// or without a "_CYCLE" suffix.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let upper = name.trim().to_ascii_uppercase();
        let letter = upper.strip_suffix("_CYCLE").unwrap_or(&upper);

        match letter {
            "V" => Ok(MgCycleType::V),
            "W" => Ok(MgCycleType::W),
            "F" => Ok(MgCycleType::F),
            _ => Err(format!("unrecognized FAC cycle type: {}", name)),
        }
    }
}

/// Configuration for the FAC cycle driver. The settings are plain data and
/// serializable, so they can be read from an input file or assembled in
/// code; they are fixed once solves begin.
///
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FacSettings {
    pub cycle_type: MgCycleType,
    pub num_pre_sweeps: usize,
    pub num_post_sweeps: usize,
    pub enable_logging: bool,
}

impl Default for FacSettings {
    fn default() -> Self {
        Self {
            cycle_type: MgCycleType::V,
            num_pre_sweeps: 1,
            num_post_sweeps: 1,
            enable_logging: false,
        }
    }
}

/// The multilevel numerics behind a FAC cycle: smoothing, composite residual
/// evaluation, residual restriction, error prolongation, and the exact solve
/// on the coarsest level. The cycle driver orchestrates calls to these
/// methods but never inspects field values itself; everything the driver
/// knows about a vector is its component and level structure.
///
/// Vector arguments may alias: in particular `restrict_residual` is invoked
/// as `restrict_residual(f, f, level)` on the driver's fast path, and
/// `prolong_error_and_correct` is always invoked with the solution vector as
/// both source and destination (the two levels involved are distinct).
///
pub trait FacStrategy {
    /// Apply `num_sweeps` relaxation sweeps to the solution on one level.
    /// Exactly one of `pre_sweep` / `post_sweep` is true, telling the
    /// strategy which phase of the cycle it is in.
    fn smooth_error(
        &mut self,
        u: &CompositeVector,
        f: &CompositeVector,
        level: usize,
        num_sweeps: usize,
        pre_sweep: bool,
        post_sweep: bool,
    );

    /// Compute the composite residual `r = f - A u` on the levels in
    /// `coarsest_ln..=finest_ln`.
    fn compute_residual(
        &mut self,
        r: &CompositeVector,
        u: &CompositeVector,
        f: &CompositeVector,
        coarsest_ln: usize,
        finest_ln: usize,
    );

    /// Restrict the residual carried by `src` on level `coarse_ln + 1` into
    /// `dst` on level `coarse_ln`.
    fn restrict_residual(&mut self, src: &CompositeVector, dst: &CompositeVector, coarse_ln: usize);

    /// Prolong the correction carried by `src` on level `fine_ln - 1` and
    /// add it into `dst` on level `fine_ln`.
    fn prolong_error_and_correct(&mut self, src: &CompositeVector, dst: &CompositeVector, fine_ln: usize);

    /// Solve `A u = f` exactly (or as exactly as affordable) on the
    /// coarsest level.
    fn solve_coarsest_level(&mut self, u: &CompositeVector, f: &CompositeVector, level: usize);

    /// Receive the driver's configuration. Called when the strategy is
    /// registered and again whenever the configuration changes, so the
    /// strategy can adapt to the cycle shape or sweep counts if it cares.
    fn set_cycle_settings(&mut self, _settings: &FacSettings) {}

    /// Receive the time interval of the problem being solved, for
    /// strategies discretizing a time-dependent operator.
    fn set_time_interval(&mut self, _current_time: f64, _new_time: f64) {}

    /// Prepare internal state for cycling on vectors structured like the
    /// given pair.
    fn initialize_operator_state(&mut self, _solution: &CompositeVector, _rhs: &CompositeVector) {}

    /// Release any state captured by `initialize_operator_state`.
    fn deallocate_operator_state(&mut self) {}
}

/// Driver applying one FAC multigrid cycle per solve: an approximate inverse
/// of the composite operator held by the registered [`FacStrategy`],
/// suitable as a preconditioner inside an outer Krylov iteration. The driver
/// performs exactly one cycle per `solve_system` call and returns `true`
/// unconditionally; judging convergence is the caller's business.
///
pub struct FacPreconditioner {
    object_name: String,
    strategy: Rc<RefCell<dyn FacStrategy>>,
    cycle_type: MgCycleType,
    num_pre_sweeps: usize,
    num_post_sweeps: usize,
    do_log: bool,
    is_initialized: bool,
    coarsest_ln: usize,
    finest_ln: usize,
    f: Option<CompositeVector>,
    r: Option<CompositeVector>,
    recompute_residual: bool,
}

impl FacPreconditioner {
    pub fn new(
        object_name: impl Into<String>,
        strategy: Rc<RefCell<dyn FacStrategy>>,
        settings: FacSettings,
    ) -> Self {
        let preconditioner = Self {
            object_name: object_name.into(),
            strategy,
            cycle_type: settings.cycle_type,
            num_pre_sweeps: settings.num_pre_sweeps,
            num_post_sweeps: settings.num_post_sweeps,
            do_log: settings.enable_logging,
            is_initialized: false,
            coarsest_ln: 0,
            finest_ln: 0,
            f: None,
            r: None,
            recompute_residual: false,
        };
        preconditioner.push_settings();
        preconditioner
    }

    pub fn settings(&self) -> FacSettings {
        FacSettings {
            cycle_type: self.cycle_type,
            num_pre_sweeps: self.num_pre_sweeps,
            num_post_sweeps: self.num_post_sweeps,
            enable_logging: self.do_log,
        }
    }

    pub fn set_mg_cycle_type(&mut self, cycle_type: MgCycleType) {
        self.cycle_type = cycle_type;
        self.push_settings();
    }

    pub fn set_num_pre_smoothing_sweeps(&mut self, num_sweeps: usize) {
        self.num_pre_sweeps = num_sweeps;
        self.push_settings();
    }

    pub fn set_num_post_smoothing_sweeps(&mut self, num_sweeps: usize) {
        self.num_post_sweeps = num_sweeps;
        self.push_settings();
    }

    pub fn enable_logging(&mut self, enabled: bool) {
        self.do_log = enabled;
        self.push_settings();
    }

    /// Forwarded to the strategy.
    pub fn set_time_interval(&self, current_time: f64, new_time: f64) {
        self.strategy.borrow_mut().set_time_interval(current_time, new_time);
    }

    fn push_settings(&self) {
        let settings = self.settings();
        self.strategy.borrow_mut().set_cycle_settings(&settings);
    }

    /// Apply a single FAC cycle, improving `u` in place. The solution is
    /// expected to be zero on entry (the usual preconditioner contract), so
    /// that the residual at the top of the cycle equals the right-hand side.
    /// If the driver is not initialized, it transiently initializes and then
    /// deallocates its state around this call.
    pub fn solve_system(&mut self, u: &CompositeVector, f: &CompositeVector) -> bool {
        let deallocate_after_solve = !self.is_initialized;
        if deallocate_after_solve {
            self.initialize_solver_state(u, f);
        }
        debug_assert!(u.structure_matches(f));

        // As long as the solution is unmodified, the residual is simply
        // equal to the right-hand side. Smoothing and coarse-level solves
        // invalidate that equality and set this flag.
        self.recompute_residual = false;

        if self.do_log {
            info!(
                "{}: applying {:?}-cycle over levels {}..={}",
                self.object_name, self.cycle_type, self.coarsest_ln, self.finest_ln
            );
        }

        if self.cycle_type == MgCycleType::V && self.num_pre_sweeps == 0 {
            // A V-cycle without pre-smoothing never touches the solution
            // above the current position of the descent, so the right-hand
            // side vector itself can carry the restricted residuals and no
            // working copies are needed.
            self.v_cycle_no_pre_smoothing(u, f, self.finest_ln);
        } else {
            let (work_f, work_r) = match (&self.f, &self.r) {
                (Some(work_f), Some(work_r)) => (work_f.clone(), work_r.clone()),
                _ => panic!(
                    "{}::solve_system(): working vectors are missing; the solver state was \
                     initialized for a configuration that does not require them",
                    self.object_name
                ),
            };
            work_f.copy_from(f);
            let cycle_type = self.cycle_type;
            self.cycle(u, &work_f, &work_r, self.finest_ln, cycle_type);
        }

        if deallocate_after_solve {
            self.deallocate_solver_state();
        }
        true
    }

    pub fn initialize_solver_state(&mut self, solution: &CompositeVector, rhs: &CompositeVector) {
        if self.is_initialized {
            self.deallocate_solver_state();
        }

        self.coarsest_ln = solution.coarsest_level_number();
        self.finest_ln = solution.finest_level_number();

        debug_assert!(solution.structure_matches(rhs));

        self.strategy.borrow_mut().initialize_operator_state(solution, rhs);

        if !(self.cycle_type == MgCycleType::V && self.num_pre_sweeps == 0) {
            let work_f = rhs.clone_vector("");
            work_f.allocate_vector_data();
            self.f = Some(work_f);

            let work_r = rhs.clone_vector("");
            work_r.allocate_vector_data();
            self.r = Some(work_r);
        }
        self.is_initialized = true;
    }

    pub fn deallocate_solver_state(&mut self) {
        if !self.is_initialized {
            return;
        }
        if let Some(work_f) = self.f.take() {
            work_f.free_vector_components();
        }
        if let Some(work_r) = self.r.take() {
            work_r.free_vector_components();
        }
        self.strategy.borrow_mut().deallocate_operator_state();
        self.is_initialized = false;
    }

    /// The general recursive cycle. The three classic cycle shapes differ
    /// only in how they recurse below the current level — once for V, twice
    /// for W, and W-then-V for F — so the shape is passed as data rather
    /// than triplicating the routine.
    fn cycle(
        &mut self,
        u: &CompositeVector,
        f: &CompositeVector,
        r: &CompositeVector,
        level: usize,
        cycle_type: MgCycleType,
    ) {
        if level == self.coarsest_ln {
            self.strategy.borrow_mut().solve_coarsest_level(u, f, level);
            self.recompute_residual = true;
        } else {
            if self.do_log {
                debug!("{}: {:?}-cycle at level {}", self.object_name, cycle_type, level);
            }
            if self.num_pre_sweeps > 0 {
                self.strategy
                    .borrow_mut()
                    .smooth_error(u, f, level, self.num_pre_sweeps, true, false);
                self.recompute_residual = true;
            }

            // Restrict the residual to the next coarser level, recomputing
            // it first if the solution has been modified since the residual
            // last coincided with f.
            if self.recompute_residual {
                let mut strategy = self.strategy.borrow_mut();
                strategy.compute_residual(r, u, f, level - 1, level);
                strategy.restrict_residual(r, f, level - 1);
            } else {
                self.strategy.borrow_mut().restrict_residual(f, f, level - 1);
            }

            match cycle_type {
                MgCycleType::V => {
                    self.cycle(u, f, r, level - 1, MgCycleType::V);
                }
                MgCycleType::W => {
                    self.cycle(u, f, r, level - 1, MgCycleType::W);
                    self.cycle(u, f, r, level - 1, MgCycleType::W);
                }
                MgCycleType::F => {
                    self.cycle(u, f, r, level - 1, MgCycleType::W);
                    self.cycle(u, f, r, level - 1, MgCycleType::V);
                }
            }

            self.strategy.borrow_mut().prolong_error_and_correct(u, u, level);

            if self.num_post_sweeps > 0 {
                self.strategy
                    .borrow_mut()
                    .smooth_error(u, f, level, self.num_post_sweeps, false, true);
                self.recompute_residual = true;
            }
        }
    }

    /// The fast path for a V-cycle with no pre-smoothing: the solution is
    /// untouched on the way down, so the right-hand side is restricted in
    /// place and no residual vector is involved.
    fn v_cycle_no_pre_smoothing(&mut self, u: &CompositeVector, f: &CompositeVector, level: usize) {
        if level == self.coarsest_ln {
            self.strategy.borrow_mut().solve_coarsest_level(u, f, level);
        } else {
            self.strategy.borrow_mut().restrict_residual(f, f, level - 1);
            self.v_cycle_no_pre_smoothing(u, f, level - 1);
            self.strategy.borrow_mut().prolong_error_and_correct(u, u, level);

            if self.num_post_sweeps > 0 {
                self.strategy
                    .borrow_mut()
                    .smooth_error(u, f, level, self.num_post_sweeps, false, true);
            }
        }
    }
}
