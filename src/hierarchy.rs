use std::cell::RefCell;
use std::rc::Rc;




/**
 * A contiguous interval of zone indexes, the footprint of a single patch at
 * its own level's granularity. The lower bound is inclusive and the upper
 * bound is exclusive.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Area(pub i64, pub i64);


impl Area {

    pub fn with_shape(size: usize) -> Self {
        Self(0, size as i64)
    }

    pub fn covering(i0: i64, i1: i64) -> Self {
        assert!(i0 <= i1, "area has negative volume");
        Self(i0, i1)
    }

    pub fn start(&self) -> i64 {
        self.0
    }

    pub fn end(&self) -> i64 {
        self.1
    }

    pub fn len(&self) -> usize {
        (self.1 - self.0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == self.1
    }

    pub fn contains(&self, i: i64) -> bool {
        self.0 <= i && i < self.1
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> {
        self.0..self.1
    }
}




/**
 * One refinement level of a patch hierarchy: an ordered list of patch areas,
 * all at the same granularity. Levels are numbered from the coarsest (level
 * 0) upward, and each level refines the one below it by a fixed ratio of two.
 */
#[derive(Clone, Debug)]
pub struct PatchLevel {
    boxes: Vec<Area>,
}


impl PatchLevel {

    pub fn new(boxes: Vec<Area>) -> Self {
        Self { boxes }
    }

    pub fn num_patches(&self) -> usize {
        self.boxes.len()
    }

    pub fn patch_box(&self, patch: usize) -> Area {
        self.boxes[patch]
    }

    pub fn total_zones(&self) -> usize {
        self.boxes.iter().map(Area::len).sum()
    }
}




/**
 * The field values of one descriptor over a range of hierarchy levels. The
 * outer vector is indexed by level number and spans the whole hierarchy;
 * levels outside the allocated range hold no patch buffers. A freshly
 * reserved descriptor holds no data at all until `PatchHierarchy::allocate_data`
 * is called for it.
 */
pub struct FieldData {
    coarsest: usize,
    finest: usize,
    levels: Vec<Vec<Vec<f64>>>,
}


impl FieldData {

    fn unallocated() -> Self {
        Self { coarsest: 0, finest: 0, levels: Vec::new() }
    }

    pub fn is_allocated(&self) -> bool {
        !self.levels.is_empty()
    }

    pub fn coarsest_level_number(&self) -> usize {
        self.coarsest
    }

    pub fn finest_level_number(&self) -> usize {
        self.finest
    }

    pub fn patch(&self, level: usize, patch: usize) -> &[f64] {
        &self.levels[level][patch]
    }

    pub fn patch_mut(&mut self, level: usize, patch: usize) -> &mut [f64] {
        &mut self.levels[level][patch]
    }


    /**
     * Borrow the patch buffers of two distinct levels at once, one of which
     * is usually read while the other is written. This is what enables
     * in-place inter-level transfers, such as restricting a residual within a
     * single field or correcting a fine level from a coarse one.
     */
    pub fn two_patches_mut(&mut self, level_a: usize, level_b: usize, patch: usize) -> (&mut [f64], &mut [f64]) {
        assert!(level_a != level_b, "two_patches_mut requires distinct levels");

        if level_a < level_b {
            let (head, tail) = self.levels.split_at_mut(level_b);
            (&mut head[level_a][patch], &mut tail[0][patch])
        } else {
            let (head, tail) = self.levels.split_at_mut(level_a);
            (&mut tail[0][patch], &mut head[level_b][patch])
        }
    }
}




/**
 * A stack of patch levels together with a descriptor-indexed field store.
 * Field storage is reserved, allocated, and freed through the hierarchy;
 * vectors and solver strategies refer to fields by descriptor index, so that
 * any number of vector handles can view the same storage. The store uses
 * interior mutability: the control flow built on top of it runs
 * single-threaded within a process, so no locking is involved.
 */
pub struct PatchHierarchy {
    levels: Vec<PatchLevel>,
    fields: RefCell<Vec<Rc<RefCell<FieldData>>>>,
}


impl PatchHierarchy {

    pub fn new(levels: Vec<PatchLevel>) -> Self {
        assert!(!levels.is_empty(), "a patch hierarchy requires at least one level");
        Self {
            levels,
            fields: RefCell::new(Vec::new()),
        }
    }


    /**
     * Convenience constructor for hierarchies where each level is a single
     * patch covering the whole domain, given the zone count of each level
     * from coarsest to finest.
     */
    pub fn single_patch_levels(zone_counts: &[usize]) -> Self {
        Self::new(zone_counts
            .iter()
            .map(|&n| PatchLevel::new(vec![Area::with_shape(n)]))
            .collect())
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn finest_level_number(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn level(&self, level: usize) -> &PatchLevel {
        &self.levels[level]
    }


    /**
     * Reserve a descriptor slot in the field store and return its index. The
     * slot holds no data until `allocate_data` is called.
     */
    pub fn reserve_descriptor(&self) -> usize {
        let mut fields = self.fields.borrow_mut();
        fields.push(Rc::new(RefCell::new(FieldData::unallocated())));
        fields.len() - 1
    }


    /**
     * Allocate zero-initialized patch buffers for the given descriptor over
     * a range of levels (inclusive on both ends).
     */
    pub fn allocate_data(&self, descriptor: usize, coarsest: usize, finest: usize) {
        assert!(coarsest <= finest && finest < self.levels.len(),
            "level range {}..={} outside hierarchy with {} levels", coarsest, finest, self.levels.len());

        let field = self.field(descriptor);
        let mut field = field.borrow_mut();
        field.coarsest = coarsest;
        field.finest = finest;
        field.levels = self.levels
            .iter()
            .enumerate()
            .map(|(ln, level)| {
                if coarsest <= ln && ln <= finest {
                    level.boxes.iter().map(|b| vec![0.0; b.len()]).collect()
                } else {
                    Vec::new()
                }
            })
            .collect();
    }


    /**
     * Release the patch buffers held by the given descriptor. Freeing a
     * descriptor that holds no data is a no-op.
     */
    pub fn free_data(&self, descriptor: usize) {
        let field = self.field(descriptor);
        let mut field = field.borrow_mut();
        *field = FieldData::unallocated();
    }


    /**
     * Return a shared handle to the field data of one descriptor. Callers
     * borrow the data through the handle; distinct descriptors may be
     * borrowed simultaneously.
     */
    pub fn field(&self, descriptor: usize) -> Rc<RefCell<FieldData>> {
        self.fields.borrow()[descriptor].clone()
    }


    pub fn set_scalar(&self, descriptor: usize, coarsest: usize, finest: usize, value: f64) {
        let field = self.field(descriptor);
        let mut field = field.borrow_mut();
        for ln in coarsest..=finest {
            for p in 0..self.levels[ln].num_patches() {
                for x in field.patch_mut(ln, p) {
                    *x = value;
                }
            }
        }
    }


    pub fn copy(&self, dst: usize, src: usize, coarsest: usize, finest: usize) {
        if dst == src {
            return
        }
        let dst = self.field(dst);
        let src = self.field(src);
        let mut dst = dst.borrow_mut();
        let src = src.borrow();

        for ln in coarsest..=finest {
            for p in 0..self.levels[ln].num_patches() {
                dst.patch_mut(ln, p).copy_from_slice(src.patch(ln, p));
            }
        }
    }


    /**
     * Pointwise combine two fields into a destination field: `dst[i] =
     * f(a[i], b[i])` over the given level range. The destination may alias
     * either or both of the sources.
     */
    pub fn combine<F>(&self, dst: usize, a: usize, b: usize, coarsest: usize, finest: usize, f: F)
    where
        F: Fn(f64, f64) -> f64,
    {
        let dst_field = self.field(dst);

        match (dst == a, dst == b) {
            (true, true) => {
                let mut d = dst_field.borrow_mut();
                self.for_each_patch(coarsest, finest, |ln, p| {
                    for x in d.patch_mut(ln, p) {
                        *x = f(*x, *x)
                    }
                })
            }
            (true, false) => {
                let b_field = self.field(b);
                let mut d = dst_field.borrow_mut();
                let bv = b_field.borrow();
                self.for_each_patch(coarsest, finest, |ln, p| {
                    for (x, y) in d.patch_mut(ln, p).iter_mut().zip(bv.patch(ln, p)) {
                        *x = f(*x, *y)
                    }
                })
            }
            (false, true) => {
                let a_field = self.field(a);
                let mut d = dst_field.borrow_mut();
                let av = a_field.borrow();
                self.for_each_patch(coarsest, finest, |ln, p| {
                    for (x, y) in d.patch_mut(ln, p).iter_mut().zip(av.patch(ln, p)) {
                        *x = f(*y, *x)
                    }
                })
            }
            (false, false) => {
                let a_field = self.field(a);
                let b_field = self.field(b);
                let mut d = dst_field.borrow_mut();
                let av = a_field.borrow();
                let bv = b_field.borrow();
                self.for_each_patch(coarsest, finest, |ln, p| {
                    let dp = d.patch_mut(ln, p);
                    for (i, x) in dp.iter_mut().enumerate() {
                        *x = f(av.patch(ln, p)[i], bv.patch(ln, p)[i])
                    }
                })
            }
        }
    }


    /**
     * Inner product of two fields over a level range, optionally weighted
     * pointwise by a control volume field.
     */
    pub fn dot(&self, a: usize, b: usize, weight: Option<usize>, coarsest: usize, finest: usize) -> f64 {
        let a_field = self.field(a);
        let av = a_field.borrow();
        let b_field = self.field(b);
        let mut result = 0.0;

        let accumulate = |result: &mut f64, av: &FieldData, bv: &FieldData, wv: Option<&FieldData>| {
            for ln in coarsest..=finest {
                for p in 0..self.levels[ln].num_patches() {
                    let ap = av.patch(ln, p);
                    let bp = bv.patch(ln, p);
                    match wv {
                        Some(wv) => {
                            let wp = wv.patch(ln, p);
                            for i in 0..ap.len() {
                                *result += ap[i] * bp[i] * wp[i]
                            }
                        }
                        None => {
                            for i in 0..ap.len() {
                                *result += ap[i] * bp[i]
                            }
                        }
                    }
                }
            }
        };

        let w_field = weight.map(|w| self.field(w));
        let wv = w_field.as_ref().map(|w| w.borrow());

        if a == b {
            accumulate(&mut result, &av, &av, wv.as_deref());
        } else {
            let bv = b_field.borrow();
            accumulate(&mut result, &av, &bv, wv.as_deref());
        }
        result
    }


    fn for_each_patch<F>(&self, coarsest: usize, finest: usize, mut f: F)
    where
        F: FnMut(usize, usize),
    {
        for ln in coarsest..=finest {
            for p in 0..self.levels[ln].num_patches() {
                f(ln, p)
            }
        }
    }
}
