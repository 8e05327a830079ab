use crate::Real;

/// Smooths a positive spectrum by building the stationary distribution of a
/// Markov chain whose transition probabilities come from neighbouring
/// channels within `window`.
///
/// The result has the same total content as `source`. Spectra with no
/// positive content are copied unchanged.
pub(crate) fn markov_smooth(source: &[Real], window: usize, output: &mut Vec<Real>) {
    output.clear();
    output.extend_from_slice(source);
    let n = source.len();
    let maximum = source.iter().copied().fold(0.0, Real::max);
    if n < 2 || window == 0 || maximum <= 0.0 {
        return;
    }
    let area: Real = source.iter().sum();
    let last = n - 1;
    let level = |i: usize| source[i.min(last)] / maximum;

    let transition = |a: Real, b: Real| {
        let scale = if a + b <= 0.0 { 1.0 } else { (a + b).sqrt() };
        ((a - b) / scale).exp()
    };

    output[0] = 1.0;
    let mut norm = 1.0;
    for i in 0..last {
        let here = level(i);
        let next = level(i + 1);
        let mut up = 0.0;
        let mut down = 0.0;
        for l in 1..=window {
            up += transition(level(i + l), here);
            down += transition(level((i + 1).saturating_sub(l)), next);
        }
        output[i + 1] = output[i] * up / down;
        norm += output[i + 1];
    }
    output.iter_mut().for_each(|v| *v = *v / norm * area);
}
