/// Maps a squared L2 distance to a similarity percentage in `(0, 100]`.
///
/// `sim = exp(-d / (2 * sigma^2)) * 100`. Identical vectors score 100.
pub fn distance_to_similarity_percent(distance: f32, sigma: f32) -> f32 {
    let d = distance.max(0.0);
    (-d / (2.0 * sigma * sigma)).exp() * 100.0
}
