//! Finite element families and their tensor-product reference bases.
//!
//! The set of supported element types is closed: an [`FeType`] combines an [`FeFamily`] with a
//! polynomial order, and the [`ShapeCapabilities`] trait answers what a type can do. All bases
//! are tensor products of one-dimensional polynomials on the reference box `[-1, 1]^dim`.
use crate::mesh::LatticePoint;
use crate::AmrError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Display;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeFamily {
    /// Continuous nodal Lagrange elements.
    Lagrange,
    /// Nodal Lagrange elements without inter-element continuity, for DG methods.
    DiscontinuousLagrange,
    /// Cubic Hermite elements with value and mixed derivative dofs at vertices. C1 continuous
    /// on axis-aligned meshes.
    Hermite,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeType {
    pub family: FeFamily,
    pub order: u8,
}

impl FeType {
    pub const fn lagrange(order: u8) -> Self {
        Self {
            family: FeFamily::Lagrange,
            order,
        }
    }

    pub const fn discontinuous(order: u8) -> Self {
        Self {
            family: FeFamily::DiscontinuousLagrange,
            order,
        }
    }

    pub const fn hermite() -> Self {
        Self {
            family: FeFamily::Hermite,
            order: 3,
        }
    }

    /// Checks that the type is available in the given dimension.
    pub fn validate(&self, dim: usize) -> Result<(), AmrError> {
        let unsupported = |reason| {
            Err(AmrError::UnsupportedElementType {
                fe_type: *self,
                dim,
                reason,
            })
        };
        if !(1..=3).contains(&dim) {
            return unsupported("only 1, 2 and 3 dimensional elements are available");
        }
        match self.family {
            FeFamily::Lagrange if !(1..=2).contains(&self.order) => {
                unsupported("continuous Lagrange elements are available for orders 1 and 2")
            }
            FeFamily::DiscontinuousLagrange if self.order > 3 => {
                unsupported("discontinuous Lagrange elements are available up to order 3")
            }
            FeFamily::Hermite if self.order != 3 => unsupported("Hermite elements are only available as cubics"),
            _ => Ok(()),
        }
    }

    /// Quadrature order used when assembling with this type, `2p + 1`.
    pub fn default_quadrature_order(&self) -> usize {
        2 * self.order as usize + 1
    }
}

impl Display for FeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.family, self.order)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Continuity {
    Discontinuous,
    C0,
    C1,
}

/// What an element type is capable of.
pub trait ShapeCapabilities {
    fn continuity(&self) -> Continuity;

    /// Whether the basis has non-trivial second derivatives.
    fn supports_second_derivatives(&self) -> bool;

    /// Whether dofs are shared between neighboring elements.
    fn is_continuous(&self) -> bool {
        self.continuity() != Continuity::Discontinuous
    }
}

impl ShapeCapabilities for FeType {
    fn continuity(&self) -> Continuity {
        match self.family {
            FeFamily::Lagrange => Continuity::C0,
            FeFamily::DiscontinuousLagrange => Continuity::Discontinuous,
            FeFamily::Hermite => Continuity::C1,
        }
    }

    fn supports_second_derivatives(&self) -> bool {
        match self.family {
            FeFamily::Hermite => true,
            FeFamily::Lagrange | FeFamily::DiscontinuousLagrange => self.order >= 2,
        }
    }
}

/// A polynomial in one variable, stored by ascending coefficients.
#[derive(Clone, Debug, PartialEq)]
pub struct Poly1d {
    coefficients: Vec<f64>,
}

impl Poly1d {
    pub fn new(coefficients: Vec<f64>) -> Self {
        Self { coefficients }
    }

    /// The Lagrange polynomial that is one at `nodes[k]` and zero at the other nodes.
    pub fn lagrange(nodes: &[f64], k: usize) -> Self {
        let mut coefficients = vec![1.0];
        for (_, &node) in nodes.iter().enumerate().filter(|&(m, _)| m != k) {
            // Multiply by (x - node) / (nodes[k] - node)
            let scale = 1.0 / (nodes[k] - node);
            let mut next = vec![0.0; coefficients.len() + 1];
            for (i, &c) in coefficients.iter().enumerate() {
                next[i + 1] += c * scale;
                next[i] -= c * node * scale;
            }
            coefficients = next;
        }
        Self { coefficients }
    }

    pub fn degree(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }

    /// Evaluates the given derivative of the polynomial at `x`.
    pub fn evaluate(&self, x: f64, derivative: usize) -> f64 {
        let n = self.coefficients.len();
        if derivative >= n {
            return 0.0;
        }
        let mut result = 0.0;
        for i in (derivative..n).rev() {
            let falling_factorial: f64 = ((i - derivative + 1)..=i).map(|j| j as f64).product();
            result = result * x + self.coefficients[i] * falling_factorial;
        }
        result
    }
}

/// A shape function of a tensor-product basis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShapeFunction {
    /// Index of the one-dimensional factor along each axis.
    pub factors: [usize; 3],
    /// Site of the associated dof as a fraction `site / site_denominator` of the element extent.
    pub site: [i64; 3],
    /// Derivative multi-index represented by the dof (all zero for nodal values).
    pub derivative: [u8; 3],
}

impl ShapeFunction {
    /// Derivative multi-index encoded as a bit mask over axes.
    pub fn component(&self) -> u8 {
        self.derivative
            .iter()
            .enumerate()
            .fold(0, |mask, (a, &d)| mask | (d << a))
    }
}

/// Tensor-product reference basis of a given element type and dimension.
#[derive(Clone, Debug)]
pub struct TensorBasis {
    fe_type: FeType,
    dim: usize,
    polys: Vec<Poly1d>,
    functions: Vec<ShapeFunction>,
    site_denominator: i64,
}

impl TensorBasis {
    pub fn new(fe_type: FeType, dim: usize) -> Result<Self, AmrError> {
        fe_type.validate(dim)?;
        let basis = match fe_type.family {
            FeFamily::Lagrange | FeFamily::DiscontinuousLagrange => Self::nodal(fe_type, dim),
            FeFamily::Hermite => Self::hermite(fe_type, dim),
        };
        Ok(basis)
    }

    fn nodal(fe_type: FeType, dim: usize) -> Self {
        let p = fe_type.order as usize;
        if p == 0 {
            return Self {
                fe_type,
                dim,
                polys: vec![Poly1d::new(vec![1.0])],
                functions: vec![ShapeFunction {
                    factors: [0; 3],
                    site: [1, 1, 1],
                    derivative: [0; 3],
                }],
                site_denominator: 2,
            };
        }

        let nodes: Vec<f64> = (0..=p).map(|m| -1.0 + 2.0 * m as f64 / p as f64).collect();
        let polys = (0..=p).map(|k| Poly1d::lagrange(&nodes, k)).collect();
        let n_per_axis = p + 1;
        let functions = (0..n_per_axis.pow(dim as u32))
            .map(|linear| {
                let mut factors = [0; 3];
                let mut site = [0; 3];
                let mut remainder = linear;
                for a in 0..dim {
                    factors[a] = remainder % n_per_axis;
                    site[a] = factors[a] as i64;
                    remainder /= n_per_axis;
                }
                ShapeFunction {
                    factors,
                    site,
                    derivative: [0; 3],
                }
            })
            .collect();

        Self {
            fe_type,
            dim,
            polys,
            functions,
            site_denominator: p as i64,
        }
    }

    fn hermite(fe_type: FeType, dim: usize) -> Self {
        // Cubic Hermite polynomials on [-1, 1], indexed by 2 * end + derivative
        let polys = vec![
            // value at -1
            Poly1d::new(vec![0.5, -0.75, 0.0, 0.25]),
            // unit reference derivative at -1
            Poly1d::new(vec![0.25, -0.25, -0.25, 0.25]),
            // value at +1
            Poly1d::new(vec![0.5, 0.75, 0.0, -0.25]),
            // unit reference derivative at +1
            Poly1d::new(vec![-0.25, -0.25, 0.25, 0.25]),
        ];
        let n_vertices = 1usize << dim;
        let mut functions = Vec::with_capacity(n_vertices * n_vertices);
        for vertex in 0..n_vertices {
            for component in 0..n_vertices {
                let mut function = ShapeFunction {
                    factors: [0; 3],
                    site: [0; 3],
                    derivative: [0; 3],
                };
                for a in 0..dim {
                    let end = (vertex >> a) & 1;
                    let derivative = (component >> a) & 1;
                    function.factors[a] = 2 * end + derivative;
                    function.site[a] = end as i64;
                    function.derivative[a] = derivative as u8;
                }
                functions.push(function);
            }
        }

        Self {
            fe_type,
            dim,
            polys,
            functions,
            site_denominator: 1,
        }
    }

    pub fn fe_type(&self) -> FeType {
        self.fe_type
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn n_functions(&self) -> usize {
        self.functions.len()
    }

    pub fn functions(&self) -> &[ShapeFunction] {
        &self.functions
    }

    pub fn site_denominator(&self) -> i64 {
        self.site_denominator
    }

    /// Reference coordinates of the site of a shape function.
    pub fn site_reference_coords(&self, function: usize) -> [f64; 3] {
        let f = &self.functions[function];
        let mut xi = [0.0; 3];
        for a in 0..self.dim {
            xi[a] = -1.0 + 2.0 * f.site[a] as f64 / self.site_denominator as f64;
        }
        xi
    }

    /// Lattice point of the site of a shape function on an element with the given lower corner
    /// and lattice extent.
    ///
    /// Only meaningful for continuous families, whose site denominators divide the extent.
    pub fn site_lattice_point(&self, function: usize, lo: &LatticePoint, size: i64) -> LatticePoint {
        let f = &self.functions[function];
        let mut point = *lo;
        for a in 0..self.dim {
            point[a] += size * f.site[a] / self.site_denominator;
        }
        point
    }

    /// Shape functions whose site lies on the given side.
    pub fn functions_on_side(&self, side: usize) -> impl Iterator<Item = usize> + '_ {
        let (axis, upper) = crate::mesh::side_axis(side);
        let target = if upper { self.site_denominator } else { 0 };
        self.functions
            .iter()
            .enumerate()
            .filter(move |(_, f)| f.site[axis] == target)
            .map(|(i, _)| i)
    }

    /// Reference derivative `D^alpha` of a shape function at reference coordinates `xi`.
    ///
    /// Hermite derivative dofs are normalized to unit *reference* derivatives here; see
    /// [`dof_scale`](Self::dof_scale) for the physical normalization.
    pub fn reference_derivative(&self, function: usize, xi: &[f64; 3], alpha: [u8; 3]) -> f64 {
        let f = &self.functions[function];
        (0..self.dim)
            .map(|a| self.polys[f.factors[a]].evaluate(xi[a], alpha[a] as usize))
            .product()
    }

    /// Factor turning unit reference derivative dofs into unit physical derivative dofs on an
    /// element with the given edge lengths.
    pub fn dof_scale(&self, function: usize, lengths: &[f64; 3]) -> f64 {
        let f = &self.functions[function];
        (0..self.dim)
            .filter(|&a| f.derivative[a] > 0)
            .map(|a| 0.5 * lengths[a])
            .product()
    }

    /// Physical derivative `D^alpha` of a shape function at reference coordinates `xi` on an
    /// axis-aligned element with the given edge lengths.
    pub fn physical_derivative(&self, function: usize, xi: &[f64; 3], alpha: [u8; 3], lengths: &[f64; 3]) -> f64 {
        let chain: f64 = (0..self.dim)
            .map(|a| (2.0 / lengths[a]).powi(alpha[a] as i32))
            .product();
        self.dof_scale(function, lengths) * chain * self.reference_derivative(function, xi, alpha)
    }

    /// Values, first and second derivatives of every one-dimensional factor at `x`.
    pub(crate) fn factor_table(&self, x: f64) -> Vec<[f64; 3]> {
        self.polys
            .iter()
            .map(|p| [p.evaluate(x, 0), p.evaluate(x, 1), p.evaluate(x, 2)])
            .collect()
    }

    pub(crate) fn factors(&self, function: usize) -> [usize; 3] {
        self.functions[function].factors
    }
}
