use crate::float_trait::ZapFloat;

/// Reflect index for boundary handling (scipy.ndimage 'reflect' mode).
///
/// The signal is extended by mirroring about the edge of the last sample:
/// `d c b a | a b c d | d c b a`. Offsets of any size fold back periodically,
/// so windows wider than the signal stay valid.
#[inline(always)]
pub fn reflect_index(idx: isize, len: usize) -> usize {
    let n = len as isize;
    let period = 2 * n;
    let m = idx.rem_euclid(period);
    if m < n {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

/// Offset of the first window element relative to the output sample.
/// Matches scipy's centering for both odd and even window sizes.
#[inline(always)]
fn window_origin(window_size: usize) -> isize {
    -((window_size / 2) as isize)
}

/// Compute 1D box (uniform) filter with reflect padding.
/// Mirrors `scipy.ndimage.uniform_filter1d(input, window_size, mode='reflect')`.
pub fn uniform_filter_1d<F: ZapFloat>(input: &[F], window_size: usize) -> Vec<F> {
    let n = input.len();
    if n == 0 || window_size <= 1 {
        return input.to_vec();
    }
    let origin = window_origin(window_size);
    let norm = F::one() / F::usize_as(window_size);

    (0..n)
        .map(|i| {
            let mut sum = F::zero();
            for r in 0..window_size {
                let idx = reflect_index(i as isize + origin + r as isize, n);
                sum += input[idx];
            }
            sum * norm
        })
        .collect()
}

/// Compute 1D median filter with reflect padding.
/// Mirrors `scipy.ndimage.median_filter` with mode='reflect' along one axis:
/// for even windows the upper of the two middle samples is taken.
pub fn compute_1d_median_filter<F: ZapFloat>(input: &[F], window_size: usize) -> Vec<F> {
    let n = input.len();
    if n == 0 || window_size <= 1 {
        return input.to_vec();
    }
    let origin = window_origin(window_size);
    let rank = window_size / 2;
    let mut output = Vec::with_capacity(n);
    let mut window_buffer = Vec::with_capacity(window_size);

    for i in 0..n {
        window_buffer.clear();
        for r in 0..window_size {
            let idx = reflect_index(i as isize + origin + r as isize, n);
            window_buffer.push(input[idx]);
        }

        // select_nth_unstable finds the rank element in O(n)
        let (_, &mut value, _) = window_buffer.select_nth_unstable_by(rank, |a, b| {
            a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
        });
        output.push(value);
    }
    output
}

/// Compute median of a slice using partial sorting.
/// Even lengths average the two middle elements (numpy convention).
pub fn median_slice<F: ZapFloat>(data: &mut [F]) -> F {
    let n = data.len();
    if n == 0 {
        return F::zero();
    }
    if n == 1 {
        return data[0];
    }

    let mid = n / 2;
    let (left, upper, _) = data.select_nth_unstable_by(mid, |a, b| {
        a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
    });
    let upper = *upper;

    if n % 2 == 1 {
        upper
    } else {
        // The lower middle is the max of the left partition
        let lower = left
            .iter()
            .copied()
            .fold(F::neg_infinity(), |acc, x| if x > acc { x } else { acc });
        (lower + upper) / F::from_f64_c(2.0)
    }
}

/// Mean and population standard deviation of a slice.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}
