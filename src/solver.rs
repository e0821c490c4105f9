use crate::vector::CompositeVector;

/// Interface for a solver of linear problems of the form `A x = b` posed on
/// composite vectors. Preconditioner drivers hold their sub-solvers through
/// this interface and never inspect the numerical content of the vectors
/// they pass down, only their component and level structure.
///
pub trait LinearSolver {
    /// Must be implemented to improve `x` in place toward the solution of
    /// `A x = b`, returning whether the solve converged to the configured
    /// tolerances. Implementations that apply a fixed amount of work per
    /// call (a single multigrid cycle, say) return `true` unconditionally
    /// and leave the convergence decision to the caller.
    fn solve_system(&mut self, x: &CompositeVector, b: &CompositeVector) -> bool;

    /// Prepare internal state for solves against vectors structured like the
    /// given pair. Called at most once before any number of `solve_system`
    /// calls; `solve_system` brackets itself with initialize/deallocate when
    /// the caller has not done so.
    fn initialize_solver_state(&mut self, _x: &CompositeVector, _b: &CompositeVector) {}

    /// Release any state captured by `initialize_solver_state`. Calling this
    /// when already deallocated is a no-op.
    fn deallocate_solver_state(&mut self) {}

    /// Whether the incoming `x` carries a meaningful initial guess. When
    /// false, solvers zero `x` on entry.
    fn set_initial_guess_nonzero(&mut self, nonzero: bool);

    fn set_max_iterations(&mut self, max_iterations: usize);

    fn set_absolute_tolerance(&mut self, abs_residual_tol: f64);

    fn set_relative_tolerance(&mut self, rel_residual_tol: f64);
}

/// Interface for a linear operator computing `y = A x` and `z = A x + y` on
/// composite vectors.
///
pub trait LinearOperator {
    /// Must be implemented to overwrite `y` with `A x`.
    fn apply(&mut self, x: &CompositeVector, y: &CompositeVector);

    /// Compute `z = A x + y`. The output `z` may alias `y`; the default
    /// implementation applies the operator into a scratch clone of `y` and
    /// accumulates, which tolerates the aliasing.
    fn apply_add(&mut self, x: &CompositeVector, y: &CompositeVector, z: &CompositeVector) {
        let ax = y.clone_vector(format!("{}_apply_add", y.name()));
        ax.allocate_vector_data();
        self.apply(x, &ax);
        z.add(&ax, y);
        ax.free_vector_components();
    }

    /// Prepare internal state (stencil coefficients, communication
    /// schedules) for applications against vectors structured like the given
    /// pair.
    fn initialize_operator_state(&mut self, _input: &CompositeVector, _output: &CompositeVector) {}

    /// Release any state captured by `initialize_operator_state`.
    fn deallocate_operator_state(&mut self) {}
}

// ============================================================================
#[cfg(test)]
mod test {

    use std::rc::Rc;
    use crate::hierarchy::PatchHierarchy;
    use crate::vector::CompositeVector;
    use super::LinearOperator;

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

    #[test]
    fn default_apply_add_tolerates_aliased_output() {
        let hierarchy = Rc::new(PatchHierarchy::single_patch_levels(&[4]));
        let mut x = CompositeVector::new("x", hierarchy.clone(), 0, 0);
        x.add_component("q", hierarchy.reserve_descriptor(), None);
        x.allocate_vector_data();
        x.set_to_scalar(2.0);

        let f = x.clone_vector("f");
        f.allocate_vector_data();
        f.set_to_scalar(1.0);

        // f = 3 * x + f, accumulated in place.
        Scale(3.0).apply_add(&x, &f, &f);
        assert_eq!(f.field(0).borrow().patch(0, 0), [7.0, 7.0, 7.0, 7.0]);
    }
}
