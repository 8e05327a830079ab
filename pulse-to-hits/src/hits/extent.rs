use crate::Real;

/// Samples below this value count as this value when integrating a hit.
pub const CHARGE_FLOOR: Real = 0.1;

/// Walks out from `peak` while `|sample|` stays at or above both
/// `threshold * |samples[peak]|` and `noise_floor`, and returns the half-open
/// range `[begin, end)` it covers.
pub fn hit_extent(
    samples: &[Real],
    peak: usize,
    threshold: Real,
    noise_floor: Real,
) -> (usize, usize) {
    let Some(height) = samples.get(peak) else {
        return (peak, peak);
    };
    let limit = (threshold * height.abs()).max(noise_floor);
    let begin = samples[..peak]
        .iter()
        .rposition(|v| v.abs() < limit)
        .map_or(0, |i| i + 1);
    let end = samples[peak + 1..]
        .iter()
        .position(|v| v.abs() < limit)
        .map_or(samples.len(), |i| peak + 1 + i);
    (begin, end)
}

/// Limits `[begin, end)` for the peak at `positions[index]` to the midpoints
/// with its neighbours. `positions` must be sorted.
pub fn clip_to_neighbours(
    positions: &[Real],
    index: usize,
    (mut begin, mut end): (usize, usize),
) -> (usize, usize) {
    let position = positions[index];
    if let Some(lower) = index.checked_sub(1).map(|i| positions[i]) {
        begin = begin.max(((position + lower) / 2.0) as usize);
    }
    if let Some(upper) = positions.get(index + 1) {
        end = end.min(((position + upper) / 2.0) as usize);
    }
    (begin, end)
}

/// Charge-weighted moments of the sample indices in `[begin, end)`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HitMoments {
    pub charge: Real,
    pub mean: Real,
    pub mean_square: Real,
    pub count: usize,
}

impl HitMoments {
    pub fn new(samples: &[Real], begin: usize, end: usize) -> Self {
        let mut charge = 0.0;
        let mut first = 0.0;
        let mut second = 0.0;
        for (j, sample) in samples.iter().enumerate().take(end).skip(begin) {
            let v = sample.max(CHARGE_FLOOR);
            let x = j as Real;
            charge += v;
            first += v * x;
            second += v * x * x;
        }
        if charge <= 0.0 {
            return Self::default();
        }
        Self {
            charge,
            mean: first / charge,
            mean_square: second / charge,
            count: end.saturating_sub(begin),
        }
    }

    /// Time spread of the hit, including one sample of intrinsic width.
    pub fn rms(&self, digit_step: Real) -> Real {
        digit_step * ((self.mean_square - self.mean * self.mean).max(0.0) + 1.0).sqrt()
    }
}

/// Splits `[begin, end)` until each piece has a time RMS within `limit`
/// (or is a single sample). Each split uses `ceil(rms/limit)` pieces of
/// equal fractional width so the rounding is spread across the range.
pub fn split_range(
    samples: &[Real],
    (begin, end): (usize, usize),
    digit_step: Real,
    limit: Real,
    ranges: &mut Vec<(usize, usize)>,
) {
    if end <= begin {
        return;
    }
    let rms = HitMoments::new(samples, begin, end).rms(digit_step);
    if rms <= limit || end - begin <= 1 {
        ranges.push((begin, end));
        return;
    }
    let pieces = ((rms / limit).ceil() as usize).clamp(2, end - begin);
    let width = (end - begin) as Real / pieces as Real;
    for piece in 0..pieces {
        let from = begin + (piece as Real * width) as usize;
        let to = if piece + 1 == pieces {
            end
        } else {
            begin + ((piece + 1) as Real * width) as usize
        };
        split_range(samples, (from, to), digit_step, limit, ranges);
    }
}
