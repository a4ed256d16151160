//! Small order statistics used by the fit diagnostics.

/// Median of a slice (sorted in place). `None` for empty input.
pub fn median_mut(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

/// Median of `|v|` over an iterator.
pub fn median_abs<I: IntoIterator<Item = f64>>(values: I) -> Option<f64> {
    let mut abs: Vec<f64> = values.into_iter().map(f64::abs).collect();
    median_mut(&mut abs)
}
