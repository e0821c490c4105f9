use std::cell::RefCell;
use std::rc::Rc;

use crate::hierarchy::{FieldData, PatchHierarchy};




/**
 * One component of a composite vector: a named field variable bound to a
 * storage descriptor, with an optional control volume descriptor used to
 * weight inner products.
 */
#[derive(Clone, Debug)]
pub struct Component {
    variable: String,
    descriptor: usize,
    control_volume: Option<usize>,
}




/**
 * A named collection of field components over a contiguous range of
 * hierarchy levels. The vector itself is a lightweight handle: the field
 * values live in the hierarchy's descriptor-indexed store, and cloning the
 * handle aliases the same storage. A structural copy with fresh storage is
 * made with `clone_vector`, and the per-component views returned by
 * `component_vectors` share descriptors with their parent, so writes through
 * a view are immediately visible through the parent and through every other
 * handle onto the same descriptors.
 *
 * Because the data sits behind the hierarchy's interior-mutable store, the
 * arithmetic methods take `&self`; calls where an argument aliases the
 * receiver, such as `f.subtract(&b, &f)`, are part of the intended surface.
 */
#[derive(Clone)]
pub struct CompositeVector {
    name: String,
    hierarchy: Rc<PatchHierarchy>,
    coarsest: usize,
    finest: usize,
    components: Vec<Component>,
}


impl CompositeVector {

    pub fn new(name: impl Into<String>, hierarchy: Rc<PatchHierarchy>, coarsest: usize, finest: usize) -> Self {
        assert!(coarsest <= finest && finest < hierarchy.num_levels(),
            "vector level range {}..={} outside hierarchy with {} levels",
            coarsest, finest, hierarchy.num_levels());
        Self {
            name: name.into(),
            hierarchy,
            coarsest,
            finest,
            components: Vec::new(),
        }
    }


    /**
     * Bind a variable to this vector, referring to an already reserved
     * descriptor. Components are indexed in the order they are added.
     */
    pub fn add_component(&mut self, variable: impl Into<String>, descriptor: usize, control_volume: Option<usize>) {
        self.components.push(Component {
            variable: variable.into(),
            descriptor,
            control_volume,
        });
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hierarchy(&self) -> &Rc<PatchHierarchy> {
        &self.hierarchy
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    pub fn coarsest_level_number(&self) -> usize {
        self.coarsest
    }

    pub fn finest_level_number(&self) -> usize {
        self.finest
    }

    pub fn component_variable(&self, component: usize) -> &str {
        &self.components[component].variable
    }

    pub fn component_descriptor(&self, component: usize) -> usize {
        self.components[component].descriptor
    }

    pub fn control_volume_index(&self, component: usize) -> Option<usize> {
        self.components[component].control_volume
    }


    /**
     * Return a handle to the field data backing one component.
     */
    pub fn field(&self, component: usize) -> Rc<RefCell<FieldData>> {
        self.hierarchy.field(self.components[component].descriptor)
    }


    /**
     * Whether another vector has the same hierarchy, level range, and
     * component count. All vectors participating in one solve are expected
     * to satisfy this.
     */
    pub fn structure_matches(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.hierarchy, &other.hierarchy)
            && self.coarsest == other.coarsest
            && self.finest == other.finest
            && self.components.len() == other.components.len()
    }


    /**
     * Create a vector with the same component and level structure as this
     * one, bound to freshly reserved descriptors. The new vector holds no
     * data until `allocate_vector_data` is called.
     */
    pub fn clone_vector(&self, name: impl Into<String>) -> Self {
        let mut clone = Self::new(name, self.hierarchy.clone(), self.coarsest, self.finest);
        for component in &self.components {
            let descriptor = self.hierarchy.reserve_descriptor();
            clone.add_component(component.variable.clone(), descriptor, component.control_volume);
        }
        clone
    }


    pub fn allocate_vector_data(&self) {
        for component in &self.components {
            self.hierarchy.allocate_data(component.descriptor, self.coarsest, self.finest);
        }
    }


    /**
     * Release the storage behind every component. Freeing an already freed
     * vector is a no-op.
     */
    pub fn free_vector_components(&self) {
        for component in &self.components {
            self.hierarchy.free_data(component.descriptor);
        }
    }


    /**
     * Decompose this vector into one single-component view per component.
     * Each view shares the parent's hierarchy, level range, descriptor, and
     * control volume index; no field data is copied.
     */
    pub fn component_vectors(&self) -> Vec<CompositeVector> {
        self.components
            .iter()
            .enumerate()
            .map(|(k, component)| {
                let mut view = Self::new(
                    format!("{}_component_{}", self.name, k),
                    self.hierarchy.clone(),
                    self.coarsest,
                    self.finest);
                view.add_component(component.variable.clone(), component.descriptor, component.control_volume);
                view
            })
            .collect()
    }


    pub fn set_to_scalar(&self, value: f64) {
        for component in &self.components {
            self.hierarchy.set_scalar(component.descriptor, self.coarsest, self.finest, value);
        }
    }


    pub fn copy_from(&self, src: &Self) {
        debug_assert!(self.structure_matches(src));
        for (dst, src) in self.components.iter().zip(&src.components) {
            self.hierarchy.copy(dst.descriptor, src.descriptor, self.coarsest, self.finest);
        }
    }


    /**
     * Pointwise `self = a - b`. Either source may alias the destination.
     */
    pub fn subtract(&self, a: &Self, b: &Self) {
        debug_assert!(self.structure_matches(a) && self.structure_matches(b));
        for (k, dst) in self.components.iter().enumerate() {
            self.hierarchy.combine(
                dst.descriptor,
                a.components[k].descriptor,
                b.components[k].descriptor,
                self.coarsest,
                self.finest,
                |x, y| x - y);
        }
    }


    /**
     * Pointwise `self = a + b`. Either source may alias the destination.
     */
    pub fn add(&self, a: &Self, b: &Self) {
        debug_assert!(self.structure_matches(a) && self.structure_matches(b));
        for (k, dst) in self.components.iter().enumerate() {
            self.hierarchy.combine(
                dst.descriptor,
                a.components[k].descriptor,
                b.components[k].descriptor,
                self.coarsest,
                self.finest,
                |x, y| x + y);
        }
    }


    /**
     * Inner product with another vector, weighted by the control volume
     * fields of the components that carry one.
     */
    pub fn dot(&self, other: &Self) -> f64 {
        debug_assert!(self.structure_matches(other));
        self.components
            .iter()
            .zip(&other.components)
            .map(|(a, b)| self.hierarchy.dot(a.descriptor, b.descriptor, a.control_volume, self.coarsest, self.finest))
            .sum()
    }


    pub fn l2_norm(&self) -> f64 {
        self.dot(self).sqrt()
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use std::rc::Rc;
    use crate::hierarchy::PatchHierarchy;
    use super::CompositeVector;

    fn vector(name: &str, hierarchy: &Rc<PatchHierarchy>, num_components: usize) -> CompositeVector {
        let mut v = CompositeVector::new(name, hierarchy.clone(), 0, hierarchy.finest_level_number());
        for k in 0..num_components {
            let descriptor = hierarchy.reserve_descriptor();
            v.add_component(format!("q{}", k), descriptor, None);
        }
        v.allocate_vector_data();
        v
    }

    #[test]
    fn component_views_share_storage_with_the_parent() {
        let hierarchy = Rc::new(PatchHierarchy::single_patch_levels(&[4, 8]));
        let x = vector("x", &hierarchy, 2);
        let views = x.component_vectors();

        views[1].set_to_scalar(3.0);
        assert_eq!(x.field(1).borrow().patch(1, 0)[0], 3.0);
        assert_eq!(x.field(0).borrow().patch(1, 0)[0], 0.0);
        assert_eq!(views[1].component_descriptor(0), x.component_descriptor(1));
    }

    #[test]
    fn clone_vector_matches_structure_with_fresh_descriptors() {
        let hierarchy = Rc::new(PatchHierarchy::single_patch_levels(&[4, 8]));
        let x = vector("x", &hierarchy, 2);
        let y = x.clone_vector("y");

        assert!(x.structure_matches(&y));
        assert_eq!(y.component_variable(0), "q0");
        assert_ne!(y.component_descriptor(0), x.component_descriptor(0));
        assert_ne!(y.component_descriptor(1), x.component_descriptor(1));

        y.allocate_vector_data();
        y.set_to_scalar(1.0);
        assert_eq!(x.field(0).borrow().patch(0, 0)[0], 0.0);
    }

    #[test]
    fn arithmetic_and_norms() {
        let hierarchy = Rc::new(PatchHierarchy::single_patch_levels(&[4]));
        let a = vector("a", &hierarchy, 1);
        let b = vector("b", &hierarchy, 1);
        let c = vector("c", &hierarchy, 1);

        a.set_to_scalar(5.0);
        b.set_to_scalar(2.0);
        c.subtract(&a, &b);
        assert_eq!(c.field(0).borrow().patch(0, 0), [3.0, 3.0, 3.0, 3.0]);

        c.add(&c, &b);
        assert_eq!(c.field(0).borrow().patch(0, 0), [5.0, 5.0, 5.0, 5.0]);
        assert_eq!(c.dot(&b), 40.0);
        assert_eq!(b.l2_norm(), 4.0);
    }

    #[test]
    fn copy_into_an_aliasing_handle_is_a_noop() {
        let hierarchy = Rc::new(PatchHierarchy::single_patch_levels(&[4]));
        let a = vector("a", &hierarchy, 1);
        a.set_to_scalar(7.0);

        let alias = a.clone();
        alias.copy_from(&a);
        assert_eq!(a.field(0).borrow().patch(0, 0)[0], 7.0);
    }
}
