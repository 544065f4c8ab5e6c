/// Normalizes a kernel size: sizes below 2 disable the filter, even sizes are
/// bumped to the next odd size.
pub(crate) fn odd_kernel(kernel: usize) -> Option<usize> {
    match kernel {
        0 | 1 => None,
        k if k % 2 == 0 => Some(k + 1),
        k => Some(k),
    }
}

/// Square max (`dilate = true`) or min filter over a binary raster.
///
/// The square window is separable, so it runs as a horizontal pass followed by
/// a vertical pass. Out-of-frame pixels are ignored, matching max-pooling with
/// padding that never wins.
pub(crate) fn filter(
    bits: &[bool],
    width: usize,
    height: usize,
    kernel: usize,
    dilate: bool,
) -> Vec<bool> {
    let radius = kernel / 2;
    let reduce = |acc: bool, v: bool| if dilate { acc || v } else { acc && v };

    let mut rows = vec![false; bits.len()];
    for y in 0..height {
        let row = &bits[y * width..(y + 1) * width];
        for x in 0..width {
            let lo = x.saturating_sub(radius);
            let hi = (x + radius).min(width - 1);
            rows[y * width + x] = row[lo..=hi].iter().fold(!dilate, |acc, v| reduce(acc, *v));
        }
    }

    let mut out = vec![false; bits.len()];
    for x in 0..width {
        for y in 0..height {
            let lo = y.saturating_sub(radius);
            let hi = (y + radius).min(height - 1);
            out[y * width + x] = (lo..=hi)
                .map(|yy| rows[yy * width + x])
                .fold(!dilate, reduce);
        }
    }
    out
}
