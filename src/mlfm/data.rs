//! Observations on a shared time grid.
//!
//! Time points must be finite and strictly increasing; the value matrix is
//! `N×K` (row = time, column = state) and finite. Likelihood code works on
//! the **state-major** stacking `y[k·N + n] = Y[n, k]`.
use crate::mlfm::errors::{MlfmError, MlfmResult};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

#[derive(Debug, Clone, PartialEq)]
pub struct Observations {
    times: Array1<f64>,
    values: Array2<f64>,
}

impl Observations {
    /// Validate and store a time grid with its observations.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::TooFewTimes`] for fewer than two time points.
    /// - [`MlfmError::NonFiniteTime`] / [`MlfmError::NonIncreasingTimes`].
    /// - [`MlfmError::ObservationShape`] if `values` does not have one row
    ///   per time point and at least one column.
    /// - [`MlfmError::NonFiniteObservation`] for the first NaN/±inf value.
    pub fn new(times: Array1<f64>, values: Array2<f64>) -> MlfmResult<Self> {
        let n = times.len();
        if n < 2 {
            return Err(MlfmError::TooFewTimes { len: n });
        }
        for (index, &value) in times.iter().enumerate() {
            if !value.is_finite() {
                return Err(MlfmError::NonFiniteTime { index, value });
            }
            if index > 0 && value <= times[index - 1] {
                return Err(MlfmError::NonIncreasingTimes {
                    index,
                    previous: times[index - 1],
                    current: value,
                });
            }
        }
        let (rows, cols) = values.dim();
        if rows != n || cols == 0 {
            return Err(MlfmError::ObservationShape {
                expected_rows: n,
                expected_cols: cols.max(1),
                rows,
                cols,
            });
        }
        if let Some(((row, col), &value)) = values.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(MlfmError::NonFiniteObservation { row, col, value });
        }
        Ok(Self { times, values })
    }

    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    pub fn n_states(&self) -> usize {
        self.values.ncols()
    }

    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.times.view()
    }

    /// The `N×K` observation matrix.
    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    /// State-major stacking `y[k·N + n] = Y[n, k]`.
    pub fn stacked(&self) -> Array1<f64> {
        self.values.t().iter().copied().collect()
    }
}
