use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::solver::{LinearOperator, LinearSolver};
use crate::vector::CompositeVector;

/// Configuration for the block Gauss-Seidel preconditioner. `max_iterations`
/// other than one is not supported: additional passes over the sweep order
/// are an unfinished extension, and requesting them is a fatal error rather
/// than silently doing something unspecified.
///
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockGaussSeidelSettings {
    pub symmetric_preconditioner: bool,
    pub reverse_order: bool,
    pub initial_guess_nonzero: bool,
    pub rel_residual_tol: f64,
    pub abs_residual_tol: f64,
    pub max_iterations: usize,
}

impl Default for BlockGaussSeidelSettings {
    fn default() -> Self {
        Self {
            symmetric_preconditioner: false,
            reverse_order: false,
            initial_guess_nonzero: false,
            rel_residual_tol: 1.0e-6,
            abs_residual_tol: 1.0e-30,
            max_iterations: 1,
        }
    }
}

/// Approximates the inverse of a block-coupled linear operator by applying a
/// registered preconditioner to each component in sequence, subtracting the
/// currently available contributions of every other component before each
/// block solve.
///
/// Component sub-vectors are structural views sharing storage with the
/// composite solution, so each block solve immediately sees the values
/// produced by the blocks solved before it within the same sweep. That is
/// what makes the iteration Gauss-Seidel rather than Jacobi.
///
pub struct BlockGaussSeidelPreconditioner {
    is_initialized: bool,
    pc_map: BTreeMap<usize, Rc<RefCell<dyn LinearSolver>>>,
    linear_ops_map: BTreeMap<usize, Vec<Option<Rc<RefCell<dyn LinearOperator>>>>>,
    symmetric_preconditioner: bool,
    reverse_order: bool,
    initial_guess_nonzero: bool,
    rel_residual_tol: f64,
    abs_residual_tol: f64,
    max_iterations: usize,
}

impl BlockGaussSeidelPreconditioner {
    pub fn new(settings: BlockGaussSeidelSettings) -> Self {
        Self {
            is_initialized: false,
            pc_map: BTreeMap::new(),
            linear_ops_map: BTreeMap::new(),
            symmetric_preconditioner: settings.symmetric_preconditioner,
            reverse_order: settings.reverse_order,
            initial_guess_nonzero: settings.initial_guess_nonzero,
            rel_residual_tol: settings.rel_residual_tol,
            abs_residual_tol: settings.abs_residual_tol,
            max_iterations: settings.max_iterations,
        }
    }

    /// Register the solver used to precondition one component's diagonal
    /// block.
    pub fn set_component_preconditioner(
        &mut self,
        preconditioner: Rc<RefCell<dyn LinearSolver>>,
        component: usize,
    ) {
        self.pc_map.insert(component, preconditioner);
    }

    /// Register the row of coupling operators for one component:
    /// `linear_ops[c]` computes the contribution of component `c`'s current
    /// solution onto this component's equation. The diagonal entry is never
    /// consulted and should be `None`; every off-diagonal entry must be
    /// present.
    pub fn set_component_operators(
        &mut self,
        linear_ops: Vec<Option<Rc<RefCell<dyn LinearOperator>>>>,
        component: usize,
    ) {
        debug_assert!(linear_ops
            .iter()
            .enumerate()
            .all(|(c, op)| c == component || op.is_some()));
        self.linear_ops_map.insert(component, linear_ops);
    }

    pub fn set_symmetric_preconditioner(&mut self, symmetric_preconditioner: bool) {
        self.symmetric_preconditioner = symmetric_preconditioner;
    }

    pub fn set_reversed_order(&mut self, reverse_order: bool) {
        self.reverse_order = reverse_order;
    }
}

impl LinearSolver for BlockGaussSeidelPreconditioner {
    fn solve_system(&mut self, x: &CompositeVector, b: &CompositeVector) -> bool {
        assert!(
            self.max_iterations == 1,
            "BlockGaussSeidelPreconditioner::solve_system(): only max_iterations == 1 \
             is supported (requested {})",
            self.max_iterations
        );

        let deallocate_after_solve = !self.is_initialized;
        if deallocate_after_solve {
            self.initialize_solver_state(x, b);
        }
        debug_assert!(x.structure_matches(b));

        let mut ret_val = true;

        if !self.initial_guess_nonzero {
            x.set_to_scalar(0.0);
        }

        let x_comps = x.component_vectors();
        let b_comps = b.component_vectors();

        // Work against a copy of the right-hand side so the caller's vector
        // is never modified by the preconditioning operation.
        let f = b.clone_vector(b.name());
        f.allocate_vector_data();
        f.copy_from(b);
        let f_comps = f.component_vectors();

        let ncomps = x.num_components();
        for comp in visit_order(ncomps, self.reverse_order, self.symmetric_preconditioner) {
            let x_comp = &x_comps[comp];
            let b_comp = &b_comps[comp];
            let f_comp = &f_comps[comp];

            // Accumulate the off-diagonal contributions of the other
            // components' current iterate, then subtract them from the true
            // right-hand side to form this block's local residual.
            f_comp.set_to_scalar(0.0);
            for c in 0..ncomps {
                if c != comp {
                    self.linear_op(comp, c)
                        .borrow_mut()
                        .apply_add(&x_comps[c], f_comp, f_comp);
                }
            }
            f_comp.subtract(b_comp, f_comp);

            // The running iterate in x_comp is always a meaningful initial
            // guess for the block solve, whatever the composite-level
            // setting says.
            let pc_comp = self.preconditioner(comp);
            let mut pc_comp = pc_comp.borrow_mut();
            pc_comp.set_initial_guess_nonzero(true);
            pc_comp.set_max_iterations(self.max_iterations);
            pc_comp.set_absolute_tolerance(self.abs_residual_tol);
            pc_comp.set_relative_tolerance(self.rel_residual_tol);

            let ret_val_comp = pc_comp.solve_system(x_comp, f_comp);
            ret_val = ret_val && ret_val_comp;
        }

        f.free_vector_components();

        if deallocate_after_solve {
            self.deallocate_solver_state();
        }
        ret_val
    }

    fn initialize_solver_state(&mut self, x: &CompositeVector, b: &CompositeVector) {
        debug_assert!(x.structure_matches(b));

        let x_comps = x.component_vectors();
        let b_comps = b.component_vectors();

        let ncomps = x.num_components();
        for comp in 0..ncomps {
            for c in 0..ncomps {
                if c != comp {
                    self.linear_op(comp, c)
                        .borrow_mut()
                        .initialize_operator_state(&x_comps[comp], &b_comps[comp]);
                }
            }
            self.preconditioner(comp)
                .borrow_mut()
                .initialize_solver_state(&x_comps[comp], &b_comps[comp]);
        }
        self.is_initialized = true;
    }

    fn deallocate_solver_state(&mut self) {
        if !self.is_initialized {
            return;
        }
        for pc in self.pc_map.values() {
            pc.borrow_mut().deallocate_solver_state();
        }
        for row in self.linear_ops_map.values() {
            for op in row.iter().flatten() {
                op.borrow_mut().deallocate_operator_state();
            }
        }
        self.is_initialized = false;
    }

    fn set_initial_guess_nonzero(&mut self, nonzero: bool) {
        self.initial_guess_nonzero = nonzero;
    }

    fn set_max_iterations(&mut self, max_iterations: usize) {
        self.max_iterations = max_iterations;
    }

    fn set_absolute_tolerance(&mut self, abs_residual_tol: f64) {
        self.abs_residual_tol = abs_residual_tol;
    }

    fn set_relative_tolerance(&mut self, rel_residual_tol: f64) {
        self.rel_residual_tol = rel_residual_tol;
    }
}

impl BlockGaussSeidelPreconditioner {
    fn preconditioner(&self, component: usize) -> Rc<RefCell<dyn LinearSolver>> {
        self.pc_map
            .get(&component)
            .unwrap_or_else(|| {
                panic!("no preconditioner registered for component {}", component)
            })
            .clone()
    }

    fn linear_op(&self, component: usize, source: usize) -> Rc<RefCell<dyn LinearOperator>> {
        self.linear_ops_map
            .get(&component)
            .and_then(|row| row.get(source))
            .and_then(|op| op.as_ref())
            .unwrap_or_else(|| {
                panic!("no operator registered for block ({}, {})", component, source)
            })
            .clone()
    }
}

/// The order in which the component preconditioners are applied: a single
/// forward or backward sweep, optionally followed by the opposite sweep
/// (without revisiting the turning point) when the preconditioner is
/// symmetrized.
fn visit_order(ncomps: usize, reverse_order: bool, symmetric: bool) -> Vec<usize> {
    if ncomps == 0 {
        return Vec::new();
    }
    let mut comps = Vec::with_capacity(2 * ncomps - 1);
    if !reverse_order {
        comps.extend(0..ncomps);
        if symmetric {
            comps.extend((0..ncomps - 1).rev());
        }
    } else {
        comps.extend((0..ncomps).rev());
        if symmetric {
            comps.extend(1..ncomps);
        }
    }
    comps
}

// ============================================================================
#[cfg(test)]
mod test {

    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::hierarchy::PatchHierarchy;
    use crate::solver::{LinearOperator, LinearSolver};
    use crate::vector::CompositeVector;
    use super::{visit_order, BlockGaussSeidelPreconditioner, BlockGaussSeidelSettings};

    #[test]
    fn visit_orders_for_three_components() {
        assert_eq!(visit_order(3, false, false), vec![0, 1, 2]);
        assert_eq!(visit_order(3, true, false), vec![2, 1, 0]);
        assert_eq!(visit_order(3, false, true), vec![0, 1, 2, 1, 0]);
        assert_eq!(visit_order(3, true, true), vec![2, 1, 0, 1, 2]);
    }

    /// A solver stub that copies the right-hand side into the solution,
    /// recording the component it was registered for and the right-hand
    /// side values it received.
    struct CopySolver {
        component: usize,
        visits: Rc<RefCell<Vec<usize>>>,
        rhs_seen: Rc<RefCell<Vec<Vec<f64>>>>,
        converged: bool,
    }

    impl CopySolver {
        fn new(component: usize, visits: &Rc<RefCell<Vec<usize>>>, rhs_seen: &Rc<RefCell<Vec<Vec<f64>>>>) -> Rc<RefCell<Self>> {
            Rc::new(RefCell::new(Self {
                component,
                visits: visits.clone(),
                rhs_seen: rhs_seen.clone(),
                converged: true,
            }))
        }
    }

    impl LinearSolver for CopySolver {
        fn solve_system(&mut self, x: &CompositeVector, b: &CompositeVector) -> bool {
            self.visits.borrow_mut().push(self.component);
            self.rhs_seen.borrow_mut().push(b.field(0).borrow().patch(0, 0).to_vec());
            x.copy_from(b);
            self.converged
        }
        fn set_initial_guess_nonzero(&mut self, _nonzero: bool) {}
        fn set_max_iterations(&mut self, _max_iterations: usize) {}
        fn set_absolute_tolerance(&mut self, _abs_residual_tol: f64) {}
        fn set_relative_tolerance(&mut self, _rel_residual_tol: f64) {}
    }

    /// y = scale * x.
    struct Scale(f64);

    impl LinearOperator for Scale {
        fn apply(&mut self, x: &CompositeVector, y: &CompositeVector) {
            let scale = self.0;
            y.hierarchy().combine(
                y.component_descriptor(0),
                x.component_descriptor(0),
                x.component_descriptor(0),
                y.coarsest_level_number(),
                y.finest_level_number(),
                move |v, _| scale * v);
        }
    }

    struct Fixture {
        x: CompositeVector,
        b: CompositeVector,
        visits: Rc<RefCell<Vec<usize>>>,
        rhs_seen: Rc<RefCell<Vec<Vec<f64>>>>,
        pc: BlockGaussSeidelPreconditioner,
    }

    /// A two-component system over a single 4-zone level. The coupling
    /// operator for block (1, 0) scales by 10, the one for block (0, 1)
    /// scales by 2; b0 = 3 and b1 = 5 everywhere.
    fn two_component_fixture(settings: BlockGaussSeidelSettings) -> Fixture {
        let hierarchy = Rc::new(PatchHierarchy::single_patch_levels(&[4]));
        let mut x = CompositeVector::new("x", hierarchy.clone(), 0, 0);
        x.add_component("q0", hierarchy.reserve_descriptor(), None);
        x.add_component("q1", hierarchy.reserve_descriptor(), None);
        x.allocate_vector_data();

        let b = x.clone_vector("b");
        b.allocate_vector_data();
        let b_comps = b.component_vectors();
        b_comps[0].set_to_scalar(3.0);
        b_comps[1].set_to_scalar(5.0);

        let visits = Rc::new(RefCell::new(Vec::new()));
        let rhs_seen = Rc::new(RefCell::new(Vec::new()));

        let mut pc = BlockGaussSeidelPreconditioner::new(settings);
        pc.set_component_preconditioner(CopySolver::new(0, &visits, &rhs_seen), 0);
        pc.set_component_preconditioner(CopySolver::new(1, &visits, &rhs_seen), 1);
        pc.set_component_operators(vec![None, Some(Rc::new(RefCell::new(Scale(2.0))))], 0);
        pc.set_component_operators(vec![Some(Rc::new(RefCell::new(Scale(10.0)))), None], 1);

        Fixture { x, b, visits, rhs_seen, pc }
    }

    #[test]
    fn later_blocks_see_earlier_updates_within_one_sweep() {
        let mut fixture = two_component_fixture(BlockGaussSeidelSettings::default());
        let ret = fixture.pc.solve_system(&fixture.x, &fixture.b);
        assert!(ret);
        assert_eq!(*fixture.visits.borrow(), vec![0, 1]);

        // Block 0 solves against b0 (x1 is still zero), so x0 becomes 3.
        // Block 1 must then see f1 = b1 - 10 * x0 = 5 - 30 = -25, which is
        // the just-updated x0; a Jacobi-style update would have seen 5.
        assert_eq!(fixture.rhs_seen.borrow()[0], vec![3.0; 4]);
        assert_eq!(fixture.rhs_seen.borrow()[1], vec![-25.0; 4]);
        assert_eq!(fixture.x.field(1).borrow().patch(0, 0), [-25.0; 4]);
    }

    #[test]
    fn symmetric_reversed_sweeps_visit_the_expected_sequence() {
        let settings = BlockGaussSeidelSettings {
            reverse_order: true,
            symmetric_preconditioner: true,
            ..BlockGaussSeidelSettings::default()
        };
        let mut fixture = two_component_fixture(settings);
        fixture.pc.solve_system(&fixture.x, &fixture.b);
        assert_eq!(*fixture.visits.borrow(), vec![1, 0, 1]);
    }

    #[test]
    fn the_right_hand_side_is_never_mutated() {
        let mut fixture = two_component_fixture(BlockGaussSeidelSettings::default());
        fixture.pc.solve_system(&fixture.x, &fixture.b);

        let b_comps = fixture.b.component_vectors();
        assert_eq!(b_comps[0].field(0).borrow().patch(0, 0), [3.0; 4]);
        assert_eq!(b_comps[1].field(0).borrow().patch(0, 0), [5.0; 4]);
    }

    #[test]
    fn a_nonzero_initial_guess_is_kept_when_configured() {
        let settings = BlockGaussSeidelSettings {
            initial_guess_nonzero: true,
            ..BlockGaussSeidelSettings::default()
        };
        let mut fixture = two_component_fixture(settings);
        let x_comps = fixture.x.component_vectors();
        x_comps[1].set_to_scalar(1.0);

        fixture.pc.solve_system(&fixture.x, &fixture.b);

        // Block 0 now sees f0 = b0 - 2 * x1 = 3 - 2 = 1.
        assert_eq!(fixture.rhs_seen.borrow()[0], vec![1.0; 4]);
    }

    #[test]
    fn a_non_converged_block_fails_the_whole_solve() {
        let mut fixture = two_component_fixture(BlockGaussSeidelSettings::default());
        fixture.pc.set_component_preconditioner(
            {
                let solver = CopySolver::new(1, &fixture.visits, &fixture.rhs_seen);
                solver.borrow_mut().converged = false;
                solver
            },
            1);
        assert!(!fixture.pc.solve_system(&fixture.x, &fixture.b));
    }

    #[test]
    #[should_panic(expected = "only max_iterations == 1 is supported")]
    fn multiple_iterations_are_rejected() {
        let settings = BlockGaussSeidelSettings {
            max_iterations: 2,
            ..BlockGaussSeidelSettings::default()
        };
        let mut fixture = two_component_fixture(settings);
        fixture.pc.solve_system(&fixture.x, &fixture.b);
    }

    #[test]
    fn deallocating_twice_is_a_noop() {
        let mut fixture = two_component_fixture(BlockGaussSeidelSettings::default());
        let x = fixture.x.clone();
        let b = fixture.b.clone();
        fixture.pc.initialize_solver_state(&x, &b);
        fixture.pc.deallocate_solver_state();
        fixture.pc.deallocate_solver_state();
    }
}
