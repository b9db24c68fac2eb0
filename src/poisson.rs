use rand::Rng;

const NEG_INV_2_48: f64 = -1.0 / (1u64 << 48) as f64;

/// Draw an exponentially distributed interval with the given mean, rounded
/// to whole seconds. Uses a 48-bit uniform, so the result is never negative
/// and a zero mean always yields zero.
pub fn poisson_interval<R: Rng>(rng: &mut R, mean_secs: u32) -> u64 {
    let bits = rng.gen::<u64>() & ((1u64 << 48) - 1);
    (f64::ln_1p(bits as f64 * NEG_INV_2_48) * -(mean_secs as f64) + 0.5) as u64
}
