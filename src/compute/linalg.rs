//! Dense linear algebra for small constraint systems and CMA-ES.
//!
//! Matrices are row-major `f64` slices with an explicit dimension.

/// Pivot magnitude below which a system is treated as singular.
pub const PIVOT_EPSILON: f64 = 1e-12;

/// Linear algebra failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LinalgError {
    #[error("Matrix is singular (pivot {pivot:e} in column {column})")]
    Singular { column: usize, pivot: f64 },
    #[error("Expected {expected} elements, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Borrowed working buffers handed out by [`SolverScratch::acquire`].
///
/// The slices stay valid until the scratch is acquired again or reset.
pub struct ScratchBuffers<'a> {
    /// `rows x cols` constraint Jacobian.
    pub jacobian: &'a mut [f64],
    /// `rows x rows` system matrix.
    pub system: &'a mut [f64],
    /// Right-hand side, overwritten with the solution.
    pub rhs: &'a mut [f64],
    /// Per-coordinate output, e.g. accelerations.
    pub output: &'a mut [f64],
}

/// Caller-owned scratch space for repeated constraint solves.
///
/// One integrator run owns one scratch. Every `acquire` zeroes and resizes
/// the buffers, so nothing computed by a previous solve leaks into the next.
#[derive(Debug, Default)]
pub struct SolverScratch {
    jacobian: Vec<f64>,
    system: Vec<f64>,
    rhs: Vec<f64>,
    output: Vec<f64>,
}

impl SolverScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zeroed buffers for `rows` constraints over `cols` coordinates.
    pub fn acquire(&mut self, rows: usize, cols: usize) -> ScratchBuffers<'_> {
        refill(&mut self.jacobian, rows * cols);
        refill(&mut self.system, rows * rows);
        refill(&mut self.rhs, rows);
        refill(&mut self.output, cols);
        ScratchBuffers {
            jacobian: &mut self.jacobian,
            system: &mut self.system,
            rhs: &mut self.rhs,
            output: &mut self.output,
        }
    }

    /// Drop all contents while keeping the allocations.
    pub fn reset(&mut self) {
        self.jacobian.clear();
        self.system.clear();
        self.rhs.clear();
        self.output.clear();
    }

    /// Total allocated elements across all buffers.
    pub fn capacity(&self) -> usize {
        self.jacobian.capacity()
            + self.system.capacity()
            + self.rhs.capacity()
            + self.output.capacity()
    }
}

fn refill(buffer: &mut Vec<f64>, len: usize) {
    buffer.clear();
    buffer.resize(len, 0.0);
}

/// Solve `a x = b` in place by Gaussian elimination with partial pivoting.
///
/// `a` is destroyed; `b` holds the solution on success.
pub fn solve_in_place(a: &mut [f64], b: &mut [f64], n: usize) -> Result<(), LinalgError> {
    if a.len() != n * n {
        return Err(LinalgError::DimensionMismatch {
            expected: n * n,
            actual: a.len(),
        });
    }
    if b.len() != n {
        return Err(LinalgError::DimensionMismatch {
            expected: n,
            actual: b.len(),
        });
    }

    for col in 0..n {
        let mut pivot_row = col;
        let mut pivot = a[col * n + col].abs();
        for row in (col + 1)..n {
            let candidate = a[row * n + col].abs();
            if candidate > pivot {
                pivot = candidate;
                pivot_row = row;
            }
        }
        if !(pivot > PIVOT_EPSILON) {
            return Err(LinalgError::Singular { column: col, pivot });
        }

        if pivot_row != col {
            for k in 0..n {
                a.swap(col * n + k, pivot_row * n + k);
            }
            b.swap(col, pivot_row);
        }

        let diag = a[col * n + col];
        for row in (col + 1)..n {
            let factor = a[row * n + col] / diag;
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row * n + k] -= factor * a[col * n + k];
            }
            b[row] -= factor * b[col];
        }
    }

    for row in (0..n).rev() {
        let mut sum = b[row];
        for k in (row + 1)..n {
            sum -= a[row * n + k] * b[k];
        }
        b[row] = sum / a[row * n + row];
    }
    Ok(())
}

/// Eigenvalues and eigenvectors of a symmetric matrix via cyclic Jacobi sweeps.
///
/// Returns `(values, vectors)` where column `i` of the row-major `vectors`
/// matrix is the eigenvector for `values[i]`.
pub fn symmetric_eigen(matrix: &[f64], n: usize) -> Result<(Vec<f64>, Vec<f64>), LinalgError> {
    if matrix.len() != n * n {
        return Err(LinalgError::DimensionMismatch {
            expected: n * n,
            actual: matrix.len(),
        });
    }

    let mut a = matrix.to_vec();
    let mut v = vec![0.0; n * n];
    for i in 0..n {
        v[i * n + i] = 1.0;
    }

    let scale: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt().max(f64::MIN_POSITIVE);

    for _sweep in 0..64 {
        let off: f64 = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .map(|(i, j)| a[i * n + j] * a[i * n + j])
            .sum::<f64>()
            .sqrt();
        if off <= 1e-14 * scale {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[p * n + q];
                if apq.abs() <= f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[q * n + q] - a[p * n + p]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    if k == p || k == q {
                        continue;
                    }
                    let akp = a[k * n + p];
                    let akq = a[k * n + q];
                    let new_kp = c * akp - s * akq;
                    let new_kq = s * akp + c * akq;
                    a[k * n + p] = new_kp;
                    a[p * n + k] = new_kp;
                    a[k * n + q] = new_kq;
                    a[q * n + k] = new_kq;
                }
                a[p * n + p] -= t * apq;
                a[q * n + q] += t * apq;
                a[p * n + q] = 0.0;
                a[q * n + p] = 0.0;

                for k in 0..n {
                    let vkp = v[k * n + p];
                    let vkq = v[k * n + q];
                    v[k * n + p] = c * vkp - s * vkq;
                    v[k * n + q] = s * vkp + c * vkq;
                }
            }
        }
    }

    let values = (0..n).map(|i| a[i * n + i]).collect();
    Ok((values, v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_with_pivoting() {
        // Zero leading entry forces a row swap.
        let mut a = vec![0.0, 2.0, 1.0, 1.0, 1.0, 0.0, 2.0, 0.0, 3.0];
        let mut b = vec![7.0, 3.0, 11.0];
        solve_in_place(&mut a, &mut b, 3).unwrap();

        let expected = [1.0, 2.0, 3.0];
        for (x, e) in b.iter().zip(expected) {
            assert!((x - e).abs() < 1e-12, "{x} vs {e}");
        }
    }

    #[test]
    fn test_singular_system_reported() {
        let mut a = vec![1.0, 2.0, 2.0, 4.0];
        let mut b = vec![1.0, 2.0];
        let err = solve_in_place(&mut a, &mut b, 2).unwrap_err();
        assert!(matches!(err, LinalgError::Singular { column: 1, .. }));
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut a = vec![1.0; 3];
        let mut b = vec![1.0; 2];
        assert!(matches!(
            solve_in_place(&mut a, &mut b, 2),
            Err(LinalgError::DimensionMismatch { expected: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_symmetric_eigen_reconstructs() {
        let n = 3;
        let m = vec![4.0, 1.0, 0.5, 1.0, 3.0, 0.2, 0.5, 0.2, 2.0];
        let (values, vectors) = symmetric_eigen(&m, n).unwrap();

        // A v_i = lambda_i v_i for every column.
        for i in 0..n {
            for row in 0..n {
                let av: f64 = (0..n).map(|k| m[row * n + k] * vectors[k * n + i]).sum();
                assert!((av - values[i] * vectors[row * n + i]).abs() < 1e-9);
            }
        }

        let trace: f64 = values.iter().sum();
        assert!((trace - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_eigen_of_diagonal_is_identity_basis() {
        let m = vec![2.0, 0.0, 0.0, 5.0];
        let (values, vectors) = symmetric_eigen(&m, 2).unwrap();
        assert_eq!(values, vec![2.0, 5.0]);
        assert_eq!(vectors, vec![1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_scratch_acquire_zeroes_buffers() {
        let mut scratch = SolverScratch::new();
        {
            let buffers = scratch.acquire(2, 4);
            assert_eq!(buffers.jacobian.len(), 8);
            assert_eq!(buffers.system.len(), 4);
            assert_eq!(buffers.rhs.len(), 2);
            assert_eq!(buffers.output.len(), 4);
            buffers.jacobian.fill(7.0);
            buffers.rhs.fill(3.0);
        }

        let buffers = scratch.acquire(2, 4);
        assert!(buffers.jacobian.iter().all(|&x| x == 0.0));
        assert!(buffers.rhs.iter().all(|&x| x == 0.0));

        let capacity = scratch.capacity();
        scratch.reset();
        assert_eq!(scratch.capacity(), capacity);
    }
}
