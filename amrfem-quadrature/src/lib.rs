//! Gauss quadrature rules for tensor-product reference domains.
//!
//! The reference domain in `D` dimensions is the box `[-1, 1]^D`, so the weights of every rule
//! sum to `2^D`. Rules are stored as a pair of weights and points, in that order.
//!
//! The crate is used by `amrfem` for element and face integration, but has no dependency on it.

pub mod tensor;
pub mod univariate;

/// A D-dimensional point.
pub type Point<const D: usize> = [f64; D];

/// A D-dimensional rule, given as `(weights, points)`.
pub type Rule<const D: usize> = (Vec<f64>, Vec<Point<D>>);

/// A one-dimensional rule.
pub type Rule1d = Rule<1>;

/// A two-dimensional rule.
pub type Rule2d = Rule<2>;

/// A three-dimensional rule.
pub type Rule3d = Rule<3>;

/// Integrates the given function with the given quadrature rule.
pub fn integrate<const D: usize>(rule: &Rule<D>, f: impl Fn(&Point<D>) -> f64) -> f64 {
    let (weights, points) = rule;
    assert_eq!(weights.len(), points.len(), "weights and points must have the same length");
    weights.iter().zip(points).map(|(w, x)| w * f(x)).sum()
}

/// Number of Gauss points per dimension needed to integrate polynomials of the given
/// per-axis degree exactly.
///
/// A rule with `n` points integrates polynomials of degree `2n - 1` exactly.
pub fn gauss_points_for_order(order: usize) -> usize {
    order / 2 + 1
}
