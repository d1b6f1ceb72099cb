//! Quadrature rules on reference boxes of any supported dimension.
use amrfem_quadrature::tensor::tensor_gauss;
use amrfem_quadrature::{gauss_points_for_order, Rule};

/// A Gauss rule on `[-1, 1]^dim`, with points padded to three coordinates.
///
/// Rules of dimension zero have a single point with unit weight and are used on the sides of
/// one-dimensional elements.
#[derive(Clone, Debug, PartialEq)]
pub struct QGauss {
    dim: usize,
    order: usize,
    weights: Vec<f64>,
    points: Vec<[f64; 3]>,
}

fn padded<const D: usize>((weights, points): Rule<D>) -> (Vec<f64>, Vec<[f64; 3]>) {
    let points = points
        .into_iter()
        .map(|p| {
            let mut padded = [0.0; 3];
            padded[..D].copy_from_slice(&p);
            padded
        })
        .collect();
    (weights, points)
}

impl QGauss {
    /// A rule on `[-1, 1]^dim` that integrates polynomials of the given per-axis degree exactly.
    ///
    /// # Panics
    ///
    /// Panics if `dim > 3`.
    pub fn new(dim: usize, order: usize) -> Self {
        let n = gauss_points_for_order(order);
        let (weights, points) = match dim {
            0 => padded(tensor_gauss::<0>(n)),
            1 => padded(tensor_gauss::<1>(n)),
            2 => padded(tensor_gauss::<2>(n)),
            3 => padded(tensor_gauss::<3>(n)),
            _ => panic!("quadrature is only available up to dimension 3, got {dim}"),
        };
        Self {
            dim,
            order,
            weights,
            points,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn n_points(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    /// Volume of the reference domain, `2^dim`.
    pub fn reference_volume(&self) -> f64 {
        (1 << self.dim) as f64
    }

    /// Embeds the points of a side rule into the reference box of dimension `dim + 1`, on the
    /// given side of the box.
    pub fn side_points(&self, side: usize) -> Vec<[f64; 3]> {
        let (axis, upper) = crate::mesh::side_axis(side);
        self.points
            .iter()
            .map(|p| {
                let mut xi = [0.0; 3];
                let mut source = p.iter();
                for (a, coord) in xi.iter_mut().enumerate().take(self.dim + 1) {
                    *coord = if a == axis {
                        if upper {
                            1.0
                        } else {
                            -1.0
                        }
                    } else {
                        source.next().copied().unwrap_or(0.0)
                    };
                }
                xi
            })
            .collect()
    }
}
