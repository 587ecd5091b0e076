use std::collections::VecDeque;

/// Sliding-window moving average with outlier rejection.
///
/// Keeps the `size` most recent samples. The reported value is the mean of
/// the samples that are strictly positive and lie within two sample standard
/// deviations of the window mean.
#[derive(Clone, Debug)]
pub struct Swma {
    size: usize,
    label: &'static str,
    values: VecDeque<f64>,
    last: f64,
}

impl Swma {
    pub fn new(size: usize, label: &'static str) -> Self {
        let size = size.max(1);
        Self {
            size,
            label,
            values: VecDeque::with_capacity(size + 1),
            last: 0.0,
        }
    }

    /// Feed an optional sample and return the filtered average.
    ///
    /// `None`, zero and NaN do not enter the window; the last computed value
    /// is returned unchanged.
    pub fn next(&mut self, value: Option<f64>) -> f64 {
        let Some(value) = value.filter(|v| *v != 0.0 && !v.is_nan()) else {
            return self.last;
        };

        self.values.push_back(value);
        if self.values.len() > self.size {
            self.values.pop_front();
        }

        self.last = self.calc();
        tracing::trace!(
            label = self.label,
            value,
            filtered = self.last,
            window = self.values.len(),
            "swma sample"
        );
        self.last
    }

    /// Last value returned by [`Swma::next`].
    pub fn last(&self) -> f64 {
        self.last
    }

    /// Forget the window. The last computed value stays until a new sample.
    pub fn reset(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[expect(clippy::cast_precision_loss)] // window sizes are tiny
    fn calc(&self) -> f64 {
        let n = self.values.len() as f64;
        let mean = self.values.iter().sum::<f64>() / n;

        // A single sample or a flat window has no spread to filter on.
        let std = if self.values.len() > 1 {
            (self.values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };

        let (sum, count) = self
            .values
            .iter()
            .filter(|x| **x > 0.0 && (std == 0.0 || (**x - mean).abs() < 2.0 * std))
            .fold((0.0, 0_u32), |(s, c), x| (s + x, c + 1));

        if count == 0 {
            0.0
        } else {
            sum / f64::from(count)
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::window_of_one(1)]
    #[case::window_of_two(2)]
    #[case::window_of_twenty(20)]
    fn constant_input_converges_exactly(#[case] size: usize) {
        let mut swma = Swma::new(size, "test");
        let mut out = 0.0;
        for _ in 0..size * 3 {
            out = swma.next(Some(1234.5));
        }
        assert!((out - 1234.5).abs() < f64::EPSILON);
        assert_eq!(swma.len(), size);
    }

    #[rstest]
    #[case::none(None)]
    #[case::zero(Some(0.0))]
    #[case::nan(Some(f64::NAN))]
    fn ignored_input_returns_last(#[case] value: Option<f64>) {
        let mut swma = Swma::new(4, "test");
        swma.next(Some(100.0));
        let before = swma.len();
        assert!((swma.next(value) - 100.0).abs() < f64::EPSILON);
        assert_eq!(swma.len(), before);
    }

    #[test]
    fn single_outlier_is_rejected() {
        let mut swma = Swma::new(10, "test");
        for v in [100.0, 101.0, 99.0, 100.0, 102.0, 98.0, 100.0, 101.0, 99.0] {
            swma.next(Some(v));
        }
        let stable = swma.last();
        let with_outlier = swma.next(Some(10_000.0));
        assert!(
            (with_outlier - stable).abs() < 1.0,
            "outlier moved output from {stable} to {with_outlier}"
        );
    }

    #[test]
    fn negative_samples_are_excluded() {
        let mut swma = Swma::new(3, "test");
        swma.next(Some(-50.0));
        let out = swma.next(Some(200.0));
        assert!((out - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn oldest_sample_leaves_the_window() {
        let mut swma = Swma::new(2, "test");
        swma.next(Some(10.0));
        swma.next(Some(20.0));
        let out = swma.next(Some(30.0));
        assert!((out - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn reset_clears_window_but_keeps_last() {
        let mut swma = Swma::new(3, "test");
        swma.next(Some(10.0));
        swma.next(Some(12.0));
        swma.reset();
        assert!(swma.is_empty());
        assert!((swma.next(None) - 11.0).abs() < f64::EPSILON);
        assert!((swma.next(Some(40.0)) - 40.0).abs() < f64::EPSILON);
    }
}
