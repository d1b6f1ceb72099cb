//! Adaptively refined meshes of axis-aligned line, quadrilateral and hexahedral elements.
//!
//! Elements live in an arena indexed by stable [`ElementId`]s. Refinement appends children to the
//! arena and makes the parent inactive; coarsening removes the children again and reactivates
//! the parent. Parent/child relations are plain indices.
//!
//! Geometry is described on an integer lattice: a base cell spans `2^LATTICE_BITS` lattice units
//! along each axis, and an element at level `l` spans `2^(LATTICE_BITS - l)` units. Lattice
//! coordinates are mapped to physical coordinates by a per-axis affine map, so base cells may be
//! rectangular. Lattice points identify shared vertices and degree-of-freedom sites exactly.
use crate::AmrError;
use log::warn;
use nalgebra::Point3;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::fmt::Display;

pub mod procedural;
pub mod refinement;

/// Number of bits in the lattice extent of a base cell.
pub const LATTICE_BITS: u32 = 24;

/// Hard upper limit for refinement levels.
///
/// Quadratic elements place sites at cell midpoints, which needs one spare lattice bit.
pub const MAX_LEVEL: u8 = (LATTICE_BITS - 2) as u8;

pub type BoundaryId = u16;

/// Integer lattice coordinates. Unused trailing coordinates are zero.
pub type LatticePoint = [i64; 3];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(pub usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lattice extent of an element at the given level.
pub fn cell_size(level: u8) -> i64 {
    1 << (LATTICE_BITS - level as u32)
}

/// Splits a side index into its axis and whether it is the upper face along that axis.
///
/// Side `2a` is the lower face and side `2a + 1` the upper face of axis `a`.
pub fn side_axis(side: usize) -> (usize, bool) {
    (side / 2, side % 2 == 1)
}

/// The side on the other element sharing a face.
pub fn opposite_side(side: usize) -> usize {
    side ^ 1
}

/// Boundary ids assigned by the structured generators.
///
/// Lines use 0 (left) and 1 (right). Squares number bottom, right, top and left as 0 to 3. Cubes
/// number back, bottom, right, top, left and front as 0 to 5.
pub fn default_boundary_id(dim: usize, side: usize) -> BoundaryId {
    const LINE: [BoundaryId; 2] = [0, 1];
    // left, right, bottom, top
    const SQUARE: [BoundaryId; 4] = [3, 1, 0, 2];
    // left, right, bottom, top, back, front
    const CUBE: [BoundaryId; 6] = [4, 2, 1, 3, 0, 5];
    match dim {
        1 => LINE[side],
        2 => SQUARE[side],
        _ => CUBE[side],
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefinementFlag {
    #[default]
    DoNothing,
    Refine,
    Coarsen,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Element {
    id: ElementId,
    level: u8,
    lo: LatticePoint,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    vertices: Vec<NodeId>,
    boundary_ids: [Option<BoundaryId>; 6],
    flag: RefinementFlag,
}

impl Element {
    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Lower corner in lattice coordinates.
    pub fn lo(&self) -> LatticePoint {
        self.lo
    }

    /// Lattice extent along each axis.
    pub fn size(&self) -> i64 {
        cell_size(self.level)
    }

    pub fn parent(&self) -> Option<ElementId> {
        self.parent
    }

    pub fn children(&self) -> &[ElementId] {
        &self.children
    }

    pub fn is_active(&self) -> bool {
        self.children.is_empty()
    }

    /// Vertices in lexicographic order: bit `a` of the local index selects the upper end of axis `a`.
    pub fn vertices(&self) -> &[NodeId] {
        &self.vertices
    }

    /// The boundary id of the given side, if it was ever assigned one.
    ///
    /// Only sides on the domain boundary carry ids.
    pub fn boundary_id(&self, side: usize) -> Option<BoundaryId> {
        self.boundary_ids[side]
    }

    pub fn refinement_flag(&self) -> RefinementFlag {
        self.flag
    }

    /// Whether the lattice point lies in the closed box of the element.
    pub fn contains_lattice_point(&self, dim: usize, point: &LatticePoint) -> bool {
        (0..dim).all(|a| point[a] >= self.lo[a] && point[a] <= self.lo[a] + self.size())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    id: NodeId,
    lattice: LatticePoint,
    position: Point3<f64>,
    // Number of live elements (active or not) that use the node as a vertex
    refcount: usize,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn lattice_point(&self) -> LatticePoint {
        self.lattice
    }

    pub fn position(&self) -> &Point3<f64> {
        &self.position
    }
}

/// Physical bounding box of an element.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElementBox {
    dim: usize,
    lo: [f64; 3],
    hi: [f64; 3],
}

impl ElementBox {
    pub fn new(dim: usize, lo: [f64; 3], hi: [f64; 3]) -> Self {
        Self { dim, lo, hi }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn lo(&self) -> [f64; 3] {
        self.lo
    }

    pub fn hi(&self) -> [f64; 3] {
        self.hi
    }

    /// Edge lengths; unused axes have length zero.
    pub fn lengths(&self) -> [f64; 3] {
        let mut h = [0.0; 3];
        for a in 0..self.dim {
            h[a] = self.hi[a] - self.lo[a];
        }
        h
    }

    pub fn center(&self) -> Point3<f64> {
        self.to_physical(&[0.0; 3])
    }

    pub fn volume(&self) -> f64 {
        self.lengths()[..self.dim].iter().product()
    }

    /// Measure of a side. Sides of one-dimensional elements are points with unit measure.
    pub fn side_area(&self, side: usize) -> f64 {
        let (axis, _) = side_axis(side);
        let h = self.lengths();
        (0..self.dim).filter(|&a| a != axis).map(|a| h[a]).product()
    }

    /// Largest distance between two vertices, i.e. the diagonal.
    pub fn hmax(&self) -> f64 {
        self.lengths().iter().map(|h| h * h).sum::<f64>().sqrt()
    }

    /// Shortest edge length.
    pub fn hmin(&self) -> f64 {
        self.lengths()[..self.dim].iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Maps reference coordinates in `[-1, 1]^dim` to physical coordinates.
    pub fn to_physical(&self, xi: &[f64; 3]) -> Point3<f64> {
        let mut x = Point3::origin();
        for a in 0..self.dim {
            x[a] = 0.5 * (self.lo[a] + self.hi[a]) + 0.5 * (self.hi[a] - self.lo[a]) * xi[a];
        }
        x
    }

    /// Maps physical coordinates to reference coordinates.
    pub fn to_reference(&self, x: &Point3<f64>) -> [f64; 3] {
        let mut xi = [0.0; 3];
        for a in 0..self.dim {
            xi[a] = (2.0 * x[a] - self.lo[a] - self.hi[a]) / (self.hi[a] - self.lo[a]);
        }
        xi
    }

    /// Whether the point lies in the box, with a tolerance relative to the box size.
    pub fn contains(&self, x: &Point3<f64>) -> bool {
        let tol = 1e-10 * self.hmax();
        (0..self.dim).all(|a| x[a] >= self.lo[a] - tol && x[a] <= self.hi[a] + tol)
    }

    pub fn side_center(&self, side: usize) -> Point3<f64> {
        let (axis, upper) = side_axis(side);
        let mut xi = [0.0; 3];
        xi[axis] = if upper { 1.0 } else { -1.0 };
        self.to_physical(&xi)
    }
}

/// Result of a refinement pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefineSummary {
    /// Children created by the pass.
    pub new_elements: Vec<ElementId>,
    /// Number of elements that were refined.
    pub refined: usize,
    /// Number of marked elements skipped because they were at the maximum level.
    pub capped: usize,
}

#[derive(Clone, Debug)]
pub struct Mesh {
    dim: usize,
    origin: [f64; 3],
    // Physical length of one lattice unit along each axis
    spacing: [f64; 3],
    elements: Vec<Option<Element>>,
    nodes: Vec<Option<Node>>,
    node_lookup: FxHashMap<LatticePoint, NodeId>,
    element_lookup: FxHashMap<(u8, LatticePoint), ElementId>,
    // Slots of removed elements and nodes, handed out again lowest first
    free_elements: BinaryHeap<Reverse<usize>>,
    free_nodes: BinaryHeap<Reverse<usize>>,
}

impl Mesh {
    /// Builds a level-0 mesh from integer base cell coordinates.
    ///
    /// Base cell `c` covers `origin + c * cell_lengths` to `origin + (c + 1) * cell_lengths`.
    /// Every side without a neighbor receives its [`default_boundary_id`].
    pub fn from_base_cells(
        dim: usize,
        origin: [f64; 3],
        cell_lengths: [f64; 3],
        cells: impl IntoIterator<Item = [i64; 3]>,
    ) -> Result<Self, AmrError> {
        if !(1..=3).contains(&dim) {
            return Err(AmrError::InvalidMesh(format!("unsupported dimension {dim}")));
        }
        if cell_lengths[..dim].iter().any(|&h| !(h > 0.0) || !h.is_finite()) {
            return Err(AmrError::InvalidMesh(format!(
                "cell lengths must be positive, got {:?}",
                &cell_lengths[..dim]
            )));
        }

        let base = cell_size(0);
        let mut spacing = [0.0; 3];
        for a in 0..dim {
            spacing[a] = cell_lengths[a] / base as f64;
        }

        let mut mesh = Self {
            dim,
            origin,
            spacing,
            elements: Vec::new(),
            nodes: Vec::new(),
            node_lookup: FxHashMap::default(),
            element_lookup: FxHashMap::default(),
            free_elements: BinaryHeap::new(),
            free_nodes: BinaryHeap::new(),
        };

        for cell in cells {
            let mut lo = [0; 3];
            for a in 0..dim {
                lo[a] = cell[a] * base;
            }
            if mesh.element_lookup.contains_key(&(0, lo)) {
                return Err(AmrError::InvalidMesh(format!("duplicate base cell {:?}", &cell[..dim])));
            }
            mesh.push_element(0, lo, None, [None; 6]);
        }

        if mesh.elements.is_empty() {
            return Err(AmrError::InvalidMesh("mesh has no cells".to_string()));
        }

        for index in 0..mesh.elements.len() {
            let id = ElementId(index);
            for side in 0..mesh.n_sides() {
                if mesh.neighbor(id, side).is_none() {
                    let boundary_id = default_boundary_id(dim, side);
                    if let Some(element) = mesh.elements[index].as_mut() {
                        element.boundary_ids[side] = Some(boundary_id);
                    }
                }
            }
        }

        Ok(mesh)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn n_sides(&self) -> usize {
        2 * self.dim
    }

    pub fn n_vertices_per_element(&self) -> usize {
        1 << self.dim
    }

    /// Number of children created when refining an element.
    pub fn n_children(&self) -> usize {
        1 << self.dim
    }

    /// Returns the element with the given id.
    ///
    /// # Panics
    ///
    /// Panics if no element with the given id exists.
    pub fn element(&self, id: ElementId) -> &Element {
        self.try_element(id)
            .unwrap_or_else(|| panic!("element {id} does not exist"))
    }

    pub fn try_element(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(id.0).and_then(Option::as_ref)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("node {id} does not exist"))
    }

    /// Iterates over all live elements (active or not) in increasing id order.
    pub fn elements(&self) -> impl Iterator<Item = &Element> + Clone + '_ {
        self.elements.iter().flatten()
    }

    /// Iterates over the active elements in increasing id order.
    ///
    /// The iterator is lazy and can be restarted by cloning it.
    pub fn active_elements(&self) -> impl Iterator<Item = &Element> + Clone + '_ {
        self.elements().filter(|element| element.is_active())
    }

    pub fn active_element_ids(&self) -> Vec<ElementId> {
        self.active_elements().map(Element::id).collect()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> + Clone + '_ {
        self.nodes.iter().flatten()
    }

    pub fn n_active_elements(&self) -> usize {
        self.active_elements().count()
    }

    pub fn n_elements(&self) -> usize {
        self.elements().count()
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes().count()
    }

    /// Size of the element arena, i.e. one past the largest live or free id.
    ///
    /// Ids of removed elements are reused, so this is bounded by the largest mesh seen so far.
    pub fn element_capacity(&self) -> usize {
        self.elements.len()
    }

    /// Finest level of any active element.
    pub fn max_level(&self) -> u8 {
        self.active_elements().map(Element::level).max().unwrap_or(0)
    }

    pub fn lattice_to_physical(&self, point: &LatticePoint) -> Point3<f64> {
        let mut x = Point3::origin();
        for a in 0..self.dim {
            x[a] = self.origin[a] + point[a] as f64 * self.spacing[a];
        }
        x
    }

    pub fn element_box(&self, id: ElementId) -> ElementBox {
        let element = self.element(id);
        let mut hi_lattice = element.lo;
        for a in 0..self.dim {
            hi_lattice[a] += element.size();
        }
        let lo = self.lattice_to_physical(&element.lo);
        let hi = self.lattice_to_physical(&hi_lattice);
        ElementBox::new(self.dim, [lo.x, lo.y, lo.z], [hi.x, hi.y, hi.z])
    }

    /// The finest element at a level no finer than `id` that shares the given side.
    ///
    /// The neighbor is either active, or inactive and at the same level as `id`. `None` means
    /// that the side lies on the domain boundary.
    pub fn neighbor(&self, id: ElementId, side: usize) -> Option<ElementId> {
        let element = self.element(id);
        let (axis, upper) = side_axis(side);
        let mut outside = element.lo;
        outside[axis] = if upper {
            element.lo[axis] + element.size()
        } else {
            element.lo[axis] - 1
        };

        (0..=element.level).rev().find_map(|level| {
            let size = cell_size(level);
            let mut lo = [0; 3];
            for a in 0..self.dim {
                lo[a] = outside[a] - outside[a].rem_euclid(size);
            }
            self.element_lookup.get(&(level, lo)).copied()
        })
    }

    /// Active elements touching the given side of `id` from the other side.
    pub fn active_neighbors_across(&self, id: ElementId, side: usize) -> Vec<ElementId> {
        let mut result = Vec::new();
        if let Some(neighbor) = self.neighbor(id, side) {
            let (axis, upper) = side_axis(side);
            // The neighbor's children touching the shared face are those on the near half
            let touching_bit = if upper { 0 } else { 1 };
            let mut stack = vec![neighbor];
            while let Some(current) = stack.pop() {
                let element = self.element(current);
                if element.is_active() {
                    result.push(current);
                } else {
                    stack.extend(
                        element
                            .children
                            .iter()
                            .enumerate()
                            .filter(|(c, _)| (c >> axis) & 1 == touching_bit)
                            .map(|(_, &child)| child),
                    );
                }
            }
        }
        result.sort();
        result
    }

    /// All active descendants of an element, or the element itself if it is active.
    pub fn active_descendants(&self, id: ElementId) -> Vec<ElementId> {
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let element = self.element(current);
            if element.is_active() {
                result.push(current);
            } else {
                stack.extend(element.children.iter().copied());
            }
        }
        result.sort();
        result
    }

    /// Looks up the element with the given level and lower corner.
    pub fn find_element(&self, level: u8, lo: &LatticePoint) -> Option<ElementId> {
        self.element_lookup.get(&(level, *lo)).copied()
    }

    /// The active element whose half-open lattice box contains the physical point.
    ///
    /// Points on the upper domain boundary are not contained in any element.
    pub fn locate_active_element(&self, x: &Point3<f64>) -> Option<ElementId> {
        let mut point = [0; 3];
        for a in 0..self.dim {
            let q = ((x[a] - self.origin[a]) / self.spacing[a]).floor();
            if !q.is_finite() {
                return None;
            }
            point[a] = q as i64;
        }
        let base = cell_size(0);
        let mut lo = [0; 3];
        for a in 0..self.dim {
            lo[a] = point[a] - point[a].rem_euclid(base);
        }
        let mut current = self.find_element(0, &lo)?;
        loop {
            let element = self.element(current);
            if element.is_active() {
                return Some(current);
            }
            let half = element.size() / 2;
            let child_index = (0..self.dim).fold(0, |index, a| {
                let upper = point[a] >= element.lo[a] + half;
                index | ((upper as usize) << a)
            });
            current = element.children[child_index];
        }
    }

    pub fn set_refinement_flag(&mut self, id: ElementId, flag: RefinementFlag) {
        if let Some(element) = self.elements.get_mut(id.0).and_then(Option::as_mut) {
            element.flag = flag;
        }
    }

    pub fn clear_refinement_flags(&mut self) {
        for element in self.elements.iter_mut().flatten() {
            element.flag = RefinementFlag::DoNothing;
        }
    }

    /// Reassigns boundary ids of all sides on the domain boundary.
    ///
    /// The closure receives the physical center and index of each boundary side. Returning `None`
    /// leaves the side without an id, which assemblers reject as unrecognized.
    pub fn set_boundary_ids(&mut self, f: impl Fn(&Point3<f64>, usize) -> Option<BoundaryId>) {
        for index in 0..self.elements.len() {
            let id = ElementId(index);
            if self.try_element(id).is_none() {
                continue;
            }
            let element_box = self.element_box(id);
            for side in 0..self.n_sides() {
                if self.neighbor(id, side).is_none() {
                    let boundary_id = f(&element_box.side_center(side), side);
                    if let Some(element) = self.elements[index].as_mut() {
                        element.boundary_ids[side] = boundary_id;
                    }
                }
            }
        }
    }

    /// Refines the marked elements.
    ///
    /// All ids are validated before the mesh is modified, so the pass is applied completely or
    /// not at all. Elements at `max_level` (or [`MAX_LEVEL`]) are skipped and counted as capped.
    pub fn refine(&mut self, marked: &[ElementId], max_level: u8) -> Result<RefineSummary, AmrError> {
        let mut marked = marked.to_vec();
        marked.sort();
        marked.dedup();
        for &id in &marked {
            match self.try_element(id) {
                None => {
                    return Err(AmrError::InvalidElement {
                        element: id,
                        reason: "element does not exist".to_string(),
                    })
                }
                Some(element) if !element.is_active() => {
                    return Err(AmrError::InvalidElement {
                        element: id,
                        reason: "only active elements can be refined".to_string(),
                    })
                }
                _ => {}
            }
        }

        let max_level = max_level.min(MAX_LEVEL);
        let mut summary = RefineSummary::default();
        for id in marked {
            if self.element(id).level >= max_level {
                summary.capped += 1;
                continue;
            }
            let children = self.refine_element(id);
            summary.new_elements.extend(children);
            summary.refined += 1;
        }
        if summary.capped > 0 {
            warn!(
                "{} element(s) marked for refinement are at the maximum level {}",
                summary.capped, max_level
            );
        }
        Ok(summary)
    }

    /// Coarsens the given parents by removing their children.
    ///
    /// Every parent must be inactive with only active children. The request is validated in full
    /// before any element is removed. Returns the number of coarsened parents.
    pub fn coarsen(&mut self, parents: &[ElementId]) -> Result<usize, AmrError> {
        let mut parents = parents.to_vec();
        parents.sort();
        parents.dedup();
        for &id in &parents {
            let element = self.try_element(id).ok_or_else(|| AmrError::InvalidElement {
                element: id,
                reason: "element does not exist".to_string(),
            })?;
            if element.is_active() {
                return Err(AmrError::InvalidElement {
                    element: id,
                    reason: "active elements cannot be coarsened".to_string(),
                });
            }
            if element
                .children
                .iter()
                .any(|&child| !self.element(child).is_active())
            {
                return Err(AmrError::InvalidElement {
                    element: id,
                    reason: "children must be active to be removed".to_string(),
                });
            }
        }

        for &id in &parents {
            self.coarsen_element(id);
        }
        Ok(parents.len())
    }

    fn refine_element(&mut self, id: ElementId) -> Vec<ElementId> {
        let parent = self.element(id).clone();
        let half = parent.size() / 2;
        let level = parent.level + 1;

        let mut children = Vec::with_capacity(self.n_children());
        for c in 0..self.n_children() {
            let mut lo = parent.lo;
            let mut boundary_ids = [None; 6];
            for a in 0..self.dim {
                let upper = (c >> a) & 1;
                lo[a] += upper as i64 * half;
                // A child inherits the ids of the parent sides it lies on
                boundary_ids[2 * a + upper] = parent.boundary_ids[2 * a + upper];
            }
            children.push(self.push_element(level, lo, Some(id), boundary_ids));
        }

        if let Some(element) = self.elements[id.0].as_mut() {
            element.children = children.clone();
            element.flag = RefinementFlag::DoNothing;
        }
        children
    }

    fn coarsen_element(&mut self, id: ElementId) {
        let children = match self.elements[id.0].as_mut() {
            Some(element) => std::mem::take(&mut element.children),
            None => return,
        };
        for child in children {
            if let Some(element) = self.elements[child.0].take() {
                self.element_lookup.remove(&(element.level, element.lo));
                self.free_elements.push(Reverse(child.0));
                for vertex in element.vertices {
                    self.release_node(vertex);
                }
            }
        }
        if let Some(element) = self.elements[id.0].as_mut() {
            element.flag = RefinementFlag::DoNothing;
        }
    }

    fn push_element(
        &mut self,
        level: u8,
        lo: LatticePoint,
        parent: Option<ElementId>,
        boundary_ids: [Option<BoundaryId>; 6],
    ) -> ElementId {
        let id = match self.free_elements.pop() {
            Some(Reverse(slot)) => ElementId(slot),
            None => {
                self.elements.push(None);
                ElementId(self.elements.len() - 1)
            }
        };
        let size = cell_size(level);
        let vertices = (0..self.n_vertices_per_element())
            .map(|v| {
                let mut point = lo;
                for a in 0..self.dim {
                    point[a] += ((v >> a) & 1) as i64 * size;
                }
                self.acquire_node(point)
            })
            .collect();
        self.elements[id.0] = Some(Element {
            id,
            level,
            lo,
            parent,
            children: Vec::new(),
            vertices,
            boundary_ids,
            flag: RefinementFlag::DoNothing,
        });
        self.element_lookup.insert((level, lo), id);
        id
    }

    fn acquire_node(&mut self, lattice: LatticePoint) -> NodeId {
        if let Some(&id) = self.node_lookup.get(&lattice) {
            if let Some(node) = self.nodes[id.0].as_mut() {
                node.refcount += 1;
            }
            return id;
        }
        let id = match self.free_nodes.pop() {
            Some(Reverse(slot)) => NodeId(slot),
            None => {
                self.nodes.push(None);
                NodeId(self.nodes.len() - 1)
            }
        };
        let position = self.lattice_to_physical(&lattice);
        self.nodes[id.0] = Some(Node {
            id,
            lattice,
            position,
            refcount: 1,
        });
        self.node_lookup.insert(lattice, id);
        id
    }

    fn release_node(&mut self, id: NodeId) {
        let remove = match self.nodes[id.0].as_mut() {
            Some(node) => {
                node.refcount -= 1;
                node.refcount == 0
            }
            None => false,
        };
        if remove {
            if let Some(node) = self.nodes[id.0].take() {
                self.node_lookup.remove(&node.lattice);
                self.free_nodes.push(Reverse(id.0));
            }
        }
    }
}
