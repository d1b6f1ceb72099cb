//! Evaluation of shape functions and integration weights on physical elements.
use crate::element::{FeType, TensorBasis};
use crate::mesh::{side_axis, ElementBox, ElementId, Mesh};
use crate::quadrature::QGauss;
use crate::AmrError;
use nalgebra::{Matrix3, Point3, Vector3};

/// Shape function values, gradients and Hessians at the points of a quadrature rule.
///
/// Mirrors the usual finite element workspace: after a call to one of the `reinit` methods,
/// `phi()[i][qp]` holds the value of shape function `i` at quadrature point `qp`, and similarly
/// for `dphi`, `d2phi`, `jxw` and `xyz`. Each assembling thread owns its own instance.
#[derive(Clone, Debug)]
pub struct FeValues {
    basis: TensorBasis,
    qrule: QGauss,
    jxw: Vec<f64>,
    xyz: Vec<Point3<f64>>,
    normals: Vec<Vector3<f64>>,
    phi: Vec<Vec<f64>>,
    dphi: Vec<Vec<Vector3<f64>>>,
    d2phi: Vec<Vec<Matrix3<f64>>>,
    element_box: Option<ElementBox>,
}

impl FeValues {
    /// Creates a workspace for integration over element interiors.
    pub fn new(fe_type: FeType, dim: usize, quadrature_order: usize) -> Result<Self, AmrError> {
        let basis = TensorBasis::new(fe_type, dim)?;
        Ok(Self::from_rule(basis, QGauss::new(dim, quadrature_order)))
    }

    /// Creates a workspace for integration over element sides.
    pub fn new_side(fe_type: FeType, dim: usize, quadrature_order: usize) -> Result<Self, AmrError> {
        let basis = TensorBasis::new(fe_type, dim)?;
        Ok(Self::from_rule(basis, QGauss::new(dim - 1, quadrature_order)))
    }

    pub fn from_rule(basis: TensorBasis, qrule: QGauss) -> Self {
        Self {
            basis,
            qrule,
            jxw: Vec::new(),
            xyz: Vec::new(),
            normals: Vec::new(),
            phi: Vec::new(),
            dphi: Vec::new(),
            d2phi: Vec::new(),
            element_box: None,
        }
    }

    pub fn basis(&self) -> &TensorBasis {
        &self.basis
    }

    pub fn fe_type(&self) -> FeType {
        self.basis.fe_type()
    }

    pub fn qrule(&self) -> &QGauss {
        &self.qrule
    }

    pub fn n_shape_functions(&self) -> usize {
        self.basis.n_functions()
    }

    pub fn n_points(&self) -> usize {
        self.xyz.len()
    }

    pub fn jxw(&self) -> &[f64] {
        &self.jxw
    }

    pub fn xyz(&self) -> &[Point3<f64>] {
        &self.xyz
    }

    /// Outward unit normals, only available after [`reinit_side`](Self::reinit_side).
    pub fn normals(&self) -> &[Vector3<f64>] {
        &self.normals
    }

    pub fn phi(&self) -> &[Vec<f64>] {
        &self.phi
    }

    pub fn dphi(&self) -> &[Vec<Vector3<f64>>] {
        &self.dphi
    }

    pub fn d2phi(&self) -> &[Vec<Matrix3<f64>>] {
        &self.d2phi
    }

    /// Box of the element the workspace was last initialized on.
    pub fn element_box(&self) -> Option<&ElementBox> {
        self.element_box.as_ref()
    }

    /// Evaluates on the interior quadrature points of an element.
    pub fn reinit(&mut self, mesh: &Mesh, element: ElementId) -> Result<(), AmrError> {
        assert_eq!(self.qrule.dim(), mesh.dim(), "reinit requires a volume quadrature rule");
        let element_box = mesh.element_box(element);
        let det = jacobian_determinant(&element_box, element)?;
        let points = self.qrule.points().to_vec();
        self.jxw = self.qrule.weights().iter().map(|w| w * det).collect();
        self.normals.clear();
        self.compute(element_box, &points);
        Ok(())
    }

    /// Evaluates on the quadrature points of one side of an element.
    pub fn reinit_side(&mut self, mesh: &Mesh, element: ElementId, side: usize) -> Result<(), AmrError> {
        assert_eq!(self.qrule.dim() + 1, mesh.dim(), "reinit_side requires a side quadrature rule");
        let element_box = mesh.element_box(element);
        jacobian_determinant(&element_box, element)?;

        let (axis, upper) = side_axis(side);
        let lengths = element_box.lengths();
        let side_det: f64 = (0..mesh.dim())
            .filter(|&a| a != axis)
            .map(|a| 0.5 * lengths[a])
            .product();
        let points = self.qrule.side_points(side);
        self.jxw = self.qrule.weights().iter().map(|w| w * side_det).collect();

        let mut normal = Vector3::zeros();
        normal[axis] = if upper { 1.0 } else { -1.0 };
        self.normals = vec![normal; points.len()];
        self.compute(element_box, &points);
        Ok(())
    }

    /// Evaluates at arbitrary physical points, typically quadrature points of a neighbor's side.
    ///
    /// Integration weights are not meaningful for such points and are left empty.
    pub fn reinit_at_points(
        &mut self,
        mesh: &Mesh,
        element: ElementId,
        points: &[Point3<f64>],
    ) -> Result<(), AmrError> {
        let element_box = mesh.element_box(element);
        jacobian_determinant(&element_box, element)?;
        let reference: Vec<_> = points.iter().map(|x| element_box.to_reference(x)).collect();
        self.jxw.clear();
        self.normals.clear();
        self.compute(element_box, &reference);
        Ok(())
    }

    /// Interpolates local coefficients at every evaluation point.
    pub fn interpolate(&self, coefficients: &[f64]) -> Vec<f64> {
        assert_eq!(coefficients.len(), self.n_shape_functions());
        (0..self.n_points())
            .map(|qp| {
                coefficients
                    .iter()
                    .zip(&self.phi)
                    .map(|(c, phi)| c * phi[qp])
                    .sum()
            })
            .collect()
    }

    pub fn interpolate_gradient(&self, coefficients: &[f64]) -> Vec<Vector3<f64>> {
        assert_eq!(coefficients.len(), self.n_shape_functions());
        (0..self.n_points())
            .map(|qp| {
                coefficients
                    .iter()
                    .zip(&self.dphi)
                    .map(|(c, dphi)| dphi[qp] * *c)
                    .sum()
            })
            .collect()
    }

    pub fn interpolate_hessian(&self, coefficients: &[f64]) -> Vec<Matrix3<f64>> {
        assert_eq!(coefficients.len(), self.n_shape_functions());
        (0..self.n_points())
            .map(|qp| {
                coefficients
                    .iter()
                    .zip(&self.d2phi)
                    .map(|(c, d2phi)| d2phi[qp] * *c)
                    .sum()
            })
            .collect()
    }

    fn compute(&mut self, element_box: ElementBox, reference_points: &[[f64; 3]]) {
        let dim = element_box.dim();
        let lengths = element_box.lengths();
        let n_functions = self.basis.n_functions();
        let n_points = reference_points.len();
        let mut inv_half = [0.0; 3];
        for a in 0..dim {
            inv_half[a] = 2.0 / lengths[a];
        }

        self.xyz = reference_points
            .iter()
            .map(|xi| element_box.to_physical(xi))
            .collect();
        self.phi = vec![vec![0.0; n_points]; n_functions];
        self.dphi = vec![vec![Vector3::zeros(); n_points]; n_functions];
        self.d2phi = vec![vec![Matrix3::zeros(); n_points]; n_functions];

        for (qp, xi) in reference_points.iter().enumerate() {
            let tables: Vec<_> = (0..dim).map(|a| self.basis.factor_table(xi[a])).collect();
            for i in 0..n_functions {
                let factors = self.basis.factors(i);
                let scale = self.basis.dof_scale(i, &lengths);
                // [value, first derivative, second derivative] of each 1D factor
                let v: Vec<[f64; 3]> = (0..dim).map(|a| tables[a][factors[a]]).collect();
                let product_except = |skip: &[usize]| -> f64 {
                    (0..dim)
                        .filter(|a| !skip.contains(a))
                        .map(|a| v[a][0])
                        .product()
                };

                self.phi[i][qp] = scale * product_except(&[]);
                for a in 0..dim {
                    self.dphi[i][qp][a] = scale * v[a][1] * inv_half[a] * product_except(&[a]);
                    for b in 0..dim {
                        self.d2phi[i][qp][(a, b)] = if a == b {
                            scale * v[a][2] * inv_half[a] * inv_half[a] * product_except(&[a])
                        } else {
                            scale * v[a][1] * v[b][1] * inv_half[a] * inv_half[b] * product_except(&[a, b])
                        };
                    }
                }
            }
        }
        self.element_box = Some(element_box);
    }
}

fn jacobian_determinant(element_box: &ElementBox, element: ElementId) -> Result<f64, AmrError> {
    let lengths = element_box.lengths();
    let determinant: f64 = lengths[..element_box.dim()].iter().map(|h| 0.5 * h).product();
    if !(determinant > 0.0) || !determinant.is_finite() {
        return Err(AmrError::DegenerateElement { element, determinant });
    }
    Ok(determinant)
}

/// Evaluates `D^alpha` of a finite element field on one element at a physical point.
///
/// `coefficients` are the element-local coefficients of the field in the given basis.
pub fn evaluate_field_derivative(
    basis: &TensorBasis,
    element_box: &ElementBox,
    coefficients: &[f64],
    x: &Point3<f64>,
    alpha: [u8; 3],
) -> f64 {
    let xi = element_box.to_reference(x);
    let lengths = element_box.lengths();
    coefficients
        .iter()
        .enumerate()
        .map(|(i, c)| c * basis.physical_derivative(i, &xi, alpha, &lengths))
        .sum()
}
