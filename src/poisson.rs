use std::rc::Rc;

use crate::fac::FacStrategy;
use crate::hierarchy::PatchHierarchy;
use crate::vector::CompositeVector;

/// Build a hierarchy suitable for [`PoissonFacStrategy`]: one patch per
/// level, where level zero has `coarsest_zones` interior nodes and each
/// finer level nests its coarse parent at half the spacing, so the node
/// counts follow n = 2 n_coarse + 1.
///
pub fn poisson_hierarchy(num_levels: usize, coarsest_zones: usize) -> Rc<PatchHierarchy> {
    assert!(num_levels >= 1 && coarsest_zones >= 1);
    let mut counts = vec![coarsest_zones];
    for _ in 1..num_levels {
        let n = *counts.last().unwrap();
        counts.push(2 * n + 1);
    }
    Rc::new(PatchHierarchy::single_patch_levels(&counts))
}

/// Multilevel numerics for the one-dimensional Poisson problem -u'' = f on
/// (0, 1) with homogeneous Dirichlet boundaries. Each level discretizes the
/// whole interval with the standard three-point stencil on its own spacing;
/// smoothing is lexicographic Gauss-Seidel, residuals transfer by full
/// weighting, corrections by linear interpolation, and the coarsest level is
/// solved directly.
///
/// Descending through the hierarchy poses the coarse problem for the error,
/// so restricting a residual also resets the corresponding level of the
/// solution registered at `initialize_operator_state` to zero. The strategy
/// therefore expects solves to run against the storage it was initialized
/// with.
///
pub struct PoissonFacStrategy {
    hierarchy: Rc<PatchHierarchy>,
    spacing: Vec<f64>,
    solution: Option<CompositeVector>,
}

impl PoissonFacStrategy {
    pub fn new(hierarchy: Rc<PatchHierarchy>) -> Self {
        let mut spacing = Vec::new();
        for ln in 0..hierarchy.num_levels() {
            let level = hierarchy.level(ln);
            assert!(
                level.num_patches() == 1 && level.patch_box(0).start() == 0,
                "the Poisson strategy requires one domain-spanning patch per level"
            );
            let n = level.patch_box(0).len();
            if ln > 0 {
                let n_coarse = hierarchy.level(ln - 1).patch_box(0).len();
                assert!(
                    n == 2 * n_coarse + 1,
                    "level {} has {} nodes, expected {} to nest level {}",
                    ln, n, 2 * n_coarse + 1, ln - 1
                );
            }
            spacing.push(1.0 / (n as f64 + 1.0));
        }
        Self { hierarchy, spacing, solution: None }
    }

    pub fn spacing(&self, level: usize) -> f64 {
        self.spacing[level]
    }
}

impl FacStrategy for PoissonFacStrategy {
    fn smooth_error(
        &mut self,
        u: &CompositeVector,
        f: &CompositeVector,
        level: usize,
        num_sweeps: usize,
        _pre_sweep: bool,
        _post_sweep: bool,
    ) {
        let h2 = self.spacing[level] * self.spacing[level];
        let u_field = u.field(0);
        let mut u_field = u_field.borrow_mut();
        let f_field = f.field(0);
        let f_field = f_field.borrow();
        gauss_seidel(u_field.patch_mut(level, 0), f_field.patch(level, 0), h2, num_sweeps);
    }

    fn compute_residual(
        &mut self,
        r: &CompositeVector,
        u: &CompositeVector,
        f: &CompositeVector,
        coarsest_ln: usize,
        finest_ln: usize,
    ) {
        let r_field = r.field(0);
        let mut r_field = r_field.borrow_mut();
        let u_field = u.field(0);
        let u_field = u_field.borrow();
        let f_field = f.field(0);
        let f_field = f_field.borrow();

        for ln in coarsest_ln..=finest_ln {
            let h2 = self.spacing[ln] * self.spacing[ln];
            residual(r_field.patch_mut(ln, 0), u_field.patch(ln, 0), f_field.patch(ln, 0), h2);
        }
    }

    fn restrict_residual(&mut self, src: &CompositeVector, dst: &CompositeVector, coarse_ln: usize) {
        let src_field = src.field(0);
        let dst_field = dst.field(0);

        if Rc::ptr_eq(&src_field, &dst_field) {
            let mut field = src_field.borrow_mut();
            let (fine, coarse) = field.two_patches_mut(coarse_ln + 1, coarse_ln, 0);
            full_weight(fine, coarse);
        } else {
            let src_field = src_field.borrow();
            let mut dst_field = dst_field.borrow_mut();
            full_weight(src_field.patch(coarse_ln + 1, 0), dst_field.patch_mut(coarse_ln, 0));
        }

        // The coarse problem is posed for the error, which starts from zero.
        if let Some(solution) = &self.solution {
            solution.hierarchy().set_scalar(solution.component_descriptor(0), coarse_ln, coarse_ln, 0.0);
        }
    }

    fn prolong_error_and_correct(&mut self, src: &CompositeVector, dst: &CompositeVector, fine_ln: usize) {
        let src_field = src.field(0);
        let dst_field = dst.field(0);

        if Rc::ptr_eq(&src_field, &dst_field) {
            let mut field = src_field.borrow_mut();
            let (coarse, fine) = field.two_patches_mut(fine_ln - 1, fine_ln, 0);
            interpolate_and_add(coarse, fine);
        } else {
            let src_field = src_field.borrow();
            let mut dst_field = dst_field.borrow_mut();
            interpolate_and_add(src_field.patch(fine_ln - 1, 0), dst_field.patch_mut(fine_ln, 0));
        }
    }

    fn solve_coarsest_level(&mut self, u: &CompositeVector, f: &CompositeVector, level: usize) {
        let h2 = self.spacing[level] * self.spacing[level];
        let u_field = u.field(0);
        let mut u_field = u_field.borrow_mut();
        let f_field = f.field(0);
        let f_field = f_field.borrow();
        tridiagonal_solve(u_field.patch_mut(level, 0), f_field.patch(level, 0), h2);
    }

    fn initialize_operator_state(&mut self, solution: &CompositeVector, _rhs: &CompositeVector) {
        self.solution = Some(solution.clone());
    }

    fn deallocate_operator_state(&mut self) {
        self.solution = None;
    }
}

/// Lexicographic Gauss-Seidel sweeps for the three-point stencil
/// (2 u[i] - u[i-1] - u[i+1]) / h^2 = f[i] with zero boundary values.
fn gauss_seidel(u: &mut [f64], f: &[f64], h2: f64, num_sweeps: usize) {
    let n = u.len();
    for _ in 0..num_sweeps {
        for i in 0..n {
            let left = if i == 0 { 0.0 } else { u[i - 1] };
            let right = if i + 1 == n { 0.0 } else { u[i + 1] };
            u[i] = 0.5 * (h2 * f[i] + left + right);
        }
    }
}

fn residual(r: &mut [f64], u: &[f64], f: &[f64], h2: f64) {
    let n = u.len();
    for i in 0..n {
        let left = if i == 0 { 0.0 } else { u[i - 1] };
        let right = if i + 1 == n { 0.0 } else { u[i + 1] };
        r[i] = f[i] - (2.0 * u[i] - left - right) / h2;
    }
}

/// Full-weighting restriction: each coarse node sits on an odd fine node and
/// averages it with its two neighbors at weights 1/4, 1/2, 1/4.
fn full_weight(fine: &[f64], coarse: &mut [f64]) {
    for j in 0..coarse.len() {
        coarse[j] = 0.25 * fine[2 * j] + 0.5 * fine[2 * j + 1] + 0.25 * fine[2 * j + 2];
    }
}

/// Linear interpolation of a coarse correction, added into the fine data.
/// Odd fine nodes coincide with coarse nodes; even fine nodes average the
/// two nearest coarse nodes, with the boundary values taken as zero.
fn interpolate_and_add(coarse: &[f64], fine: &mut [f64]) {
    let nc = coarse.len();
    for j in 0..nc {
        fine[2 * j + 1] += coarse[j];
    }
    for j in 0..=nc {
        let left = if j == 0 { 0.0 } else { coarse[j - 1] };
        let right = if j == nc { 0.0 } else { coarse[j] };
        fine[2 * j] += 0.5 * (left + right);
    }
}

/// Direct solve of the three-point system by the Thomas algorithm.
fn tridiagonal_solve(u: &mut [f64], f: &[f64], h2: f64) {
    let n = u.len();
    let diag = 2.0 / h2;
    let off = -1.0 / h2;

    let mut c = vec![0.0; n];
    let mut d = vec![0.0; n];
    c[0] = off / diag;
    d[0] = f[0] / diag;
    for i in 1..n {
        let m = diag - off * c[i - 1];
        c[i] = off / m;
        d[i] = (f[i] - off * d[i - 1]) / m;
    }
    u[n - 1] = d[n - 1];
    for i in (0..n - 1).rev() {
        u[i] = d[i] - c[i] * u[i + 1];
    }
}
