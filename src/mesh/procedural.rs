//! Structured mesh generators.
//!
//! Boundary sides get their ids from [`default_boundary_id`](crate::mesh::default_boundary_id).
use crate::mesh::Mesh;
use crate::AmrError;
use itertools::iproduct;

fn check_counts(counts: &[usize]) -> Result<(), AmrError> {
    if counts.iter().any(|&n| n == 0) {
        return Err(AmrError::InvalidMesh(format!("cell counts must be positive, got {counts:?}")));
    }
    Ok(())
}

fn check_interval(min: f64, max: f64) -> Result<f64, AmrError> {
    if !(max > min) {
        return Err(AmrError::InvalidMesh(format!("empty interval [{min}, {max}]")));
    }
    Ok(max - min)
}

/// A uniform mesh of `n` line elements on `[xmin, xmax]`.
pub fn build_line(n: usize, xmin: f64, xmax: f64) -> Result<Mesh, AmrError> {
    check_counts(&[n])?;
    let length = check_interval(xmin, xmax)?;
    let cells = (0..n as i64).map(|i| [i, 0, 0]);
    Mesh::from_base_cells(1, [xmin, 0.0, 0.0], [length / n as f64, 0.0, 0.0], cells)
}

/// A uniform `nx` by `ny` quadrilateral mesh of `[xmin, xmax] x [ymin, ymax]`.
pub fn build_square(nx: usize, ny: usize, xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Result<Mesh, AmrError> {
    check_counts(&[nx, ny])?;
    let lx = check_interval(xmin, xmax)?;
    let ly = check_interval(ymin, ymax)?;
    let cells = iproduct!(0..ny as i64, 0..nx as i64).map(|(j, i)| [i, j, 0]);
    Mesh::from_base_cells(
        2,
        [xmin, ymin, 0.0],
        [lx / nx as f64, ly / ny as f64, 0.0],
        cells,
    )
}

/// A uniform `nx` by `ny` by `nz` hexahedral mesh of the given box.
pub fn build_cube(
    [nx, ny, nz]: [usize; 3],
    min: [f64; 3],
    max: [f64; 3],
) -> Result<Mesh, AmrError> {
    check_counts(&[nx, ny, nz])?;
    let mut cell_lengths = [0.0; 3];
    for ((h, n), (lo, hi)) in cell_lengths.iter_mut().zip([nx, ny, nz]).zip(min.iter().zip(&max)) {
        *h = check_interval(*lo, *hi)? / n as f64;
    }
    let cells = iproduct!(0..nz as i64, 0..ny as i64, 0..nx as i64).map(|(k, j, i)| [i, j, k]);
    Mesh::from_base_cells(3, min, cell_lengths, cells)
}

/// The L-shaped domain `[-1, 1]^2` without the quadrant `(0, 1] x [-1, 0)`.
///
/// Each unit square quadrant is divided into `n` by `n` cells. The reentrant corner sits at the
/// origin. Boundary sides get the id of the direction they face.
pub fn build_l_shape(n: usize) -> Result<Mesh, AmrError> {
    check_counts(&[n])?;
    let n = n as i64;
    let cells = iproduct!(0..2 * n, 0..2 * n)
        .map(|(j, i)| [i, j, 0])
        .filter(|&[i, j, _]| !(i >= n && j < n));
    let h = 1.0 / n as f64;
    Mesh::from_base_cells(2, [-1.0, -1.0, 0.0], [h, h, 0.0], cells)
}
