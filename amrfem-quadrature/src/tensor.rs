//! Quadrature rules on `[-1, 1]^D` formed as tensor products of Gauss rules.
//!
//! Points are ordered lexicographically with the *first* coordinate varying fastest.

use crate::univariate::gauss;
use crate::{Point, Rule};

/// A tensor-product Gauss rule on `[-1, 1]^D` with `num_points_per_dim` points along each axis.
///
/// For `D == 0` the rule consists of a single point with unit weight.
pub fn tensor_gauss<const D: usize>(num_points_per_dim: usize) -> Rule<D> {
    let n = num_points_per_dim;
    let (weights1d, points1d) = gauss(n);
    let total = n.pow(D as u32);

    let mut weights = Vec::with_capacity(total);
    let mut points = Vec::with_capacity(total);
    for linear_index in 0..total {
        let mut w = 1.0;
        let mut point: Point<D> = [0.0; D];
        let mut remainder = linear_index;
        for coord in point.iter_mut() {
            let i = remainder % n;
            remainder /= n;
            w *= weights1d[i];
            *coord = points1d[i][0];
        }
        weights.push(w);
        points.push(point);
    }

    (weights, points)
}

/// A Gauss rule for the reference line segment.
pub fn line_gauss(num_points: usize) -> Rule<1> {
    tensor_gauss::<1>(num_points)
}

/// A Gauss rule for the reference quadrilateral.
pub fn quadrilateral_gauss(num_points_per_dim: usize) -> Rule<2> {
    tensor_gauss::<2>(num_points_per_dim)
}

/// A Gauss rule for the reference hexahedron.
pub fn hexahedron_gauss(num_points_per_dim: usize) -> Rule<3> {
    tensor_gauss::<3>(num_points_per_dim)
}
