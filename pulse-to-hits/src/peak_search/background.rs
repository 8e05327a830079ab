use crate::Real;

/// Estimates the smooth background under a spectrum by sensitive nonlinear
/// iterative peak (SNIP) clipping, widening the clipping window from one
/// sample up to `iterations` samples.
pub(crate) fn snip_background(
    source: &[Real],
    iterations: usize,
    background: &mut Vec<Real>,
    work: &mut Vec<Real>,
) {
    background.clear();
    background.extend_from_slice(source);
    let n = source.len();
    for p in 1..=iterations {
        if 2 * p >= n {
            break;
        }
        work.clear();
        work.extend_from_slice(background);
        for i in p..n - p {
            let average = (background[i - p] + background[i + p]) / 2.0;
            work[i] = background[i].min(average);
        }
        std::mem::swap(background, work);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_never_exceeds_source() {
        let mut source: Vec<Real> = (0..100).map(|i| 5.0 + 0.01 * i as Real).collect();
        source[50] += 40.0;
        source[51] += 30.0;
        let mut background = Vec::new();
        snip_background(&source, 8, &mut background, &mut Vec::new());
        assert!(source.iter().zip(&background).all(|(s, b)| b <= s));
        assert!(background[50] < 6.0);
        assert!((background[20] - source[20]).abs() < 1e-9);
    }
}
