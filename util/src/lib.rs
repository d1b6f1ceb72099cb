//! Test helpers shared by the crates in the workspace.

/// Poor man's approx assertion for matrices
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let diff = $x - $y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("left: {}", $x);
            println!("right: {}", $y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

#[macro_export]
macro_rules! assert_panics {
    ($e:expr) => {{
        use std::panic::catch_unwind;
        use std::stringify;
        let expr_string = stringify!($e);
        let result = catch_unwind(|| $e);
        if result.is_ok() {
            panic!("assert_panics!({}) failed.", expr_string);
        }
    }};
}

/// Asserts that a sequence of positive numbers decreases by at least the given factor
/// from each entry to the next.
#[macro_export]
macro_rules! assert_decreasing_by_factor {
    ($values:expr, factor = $factor:expr) => {{
        let values: &[f64] = &$values;
        for pair in values.windows(2) {
            let ratio = pair[0] / pair[1];
            if !(ratio > $factor) {
                println!("values: {:?}", values);
            }
            assert!(
                ratio > $factor,
                "expected reduction by more than {} from {:e} to {:e}, got {}",
                $factor,
                pair[0],
                pair[1],
                ratio
            );
        }
    }};
}

/// Estimated convergence rates `log(e_i / e_{i+1}) / log(h_i / h_{i+1})`.
pub fn convergence_rates(errors: &[f64], resolutions: &[f64]) -> Vec<f64> {
    assert_eq!(errors.len(), resolutions.len());
    errors
        .windows(2)
        .zip(resolutions.windows(2))
        .map(|(e, h)| (e[0] / e[1]).ln() / (h[0] / h[1]).ln())
        .collect()
}
