//! Face hyperplanes in allocation space.
//!
//! A face is pinned down by K frontier allocations; its equation
//! `w . x = c` falls out of a K x K linear system, normalized so the
//! weight of the anchor app (smallest id) is 1.

use std::fmt;
use nalgebra::{DMatrix, DVector};

use crate::data::{Allocation, AppId};

/// Largest residual tolerated before a solve is declared singular, and the
/// tolerance used when checking the face equation.
pub const FACE_TOL: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceError {
    /// Every face point allocates zero to the anchor app.
    Underconstrained,
    /// The face points are affinely dependent.
    Singular,
}

impl fmt::Display for FaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaceError::Underconstrained => write!(f, "underconstrained in anchor app"),
            FaceError::Singular => write!(f, "singular face system"),
        }
    }
}

impl std::error::Error for FaceError {}

/// Solve for the hyperplane through the face allocations.
///
/// Row i encodes `a_i[anchor] = c - sum_{j != anchor} w_j a_i[j]`, i.e.
/// `[1, -a_i[2], ..., -a_i[K]] . (c, w_2, ..., w_K) = a_i[anchor]`.
/// Returns `(c, w)` with the full weight vector `w = (1, w_2, ..., w_K)`
/// in `app_ids` order.
pub fn face_equation(
    allocs: &[&Allocation],
    app_ids: &[AppId],
    anchor: AppId,
) -> Result<(f64, Vec<f64>), FaceError> {
    let n = app_ids.len();
    debug_assert_eq!(allocs.len(), n);
    debug_assert_eq!(app_ids[0], anchor);

    if !allocs.iter().any(|a| a.get(anchor) > 0.0) {
        return Err(FaceError::Underconstrained);
    }

    let a = DMatrix::from_fn(n, n, |r, c| {
        if c == 0 { 1.0 } else { -allocs[r].get(app_ids[c]) }
    });
    let b = DVector::from_fn(n, |r, _| allocs[r].get(anchor));

    let x = match a.clone().lu().solve(&b) {
        Some(x) => x,
        None => return Err(FaceError::Singular),
    };

    // partial-pivot LU can hand back garbage near singularity
    let residual = (&a * &x - &b).amax();
    if !residual.is_finite() || residual > FACE_TOL {
        return Err(FaceError::Singular);
    }

    let c = x[0];
    let mut weights = Vec::with_capacity(n);
    weights.push(1.0);
    weights.extend(x.iter().skip(1));
    return Ok((c, weights));
}

/// A face points into the hull only if every weight is nonnegative.
pub fn valid_weights(w: &[f64]) -> bool {
    w.iter().all(|&x| x >= 0.0)
}
