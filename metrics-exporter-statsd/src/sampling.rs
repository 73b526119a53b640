use parking_lot::Mutex;
use rand::{Rng as _, RngCore};

/// A source of uniform random draws for sampled counters.
///
/// Sampled counters are emitted only when a draw is at or below the sample rate, so swapping in a seeded generator, or
/// a scripted sequence of draws, makes sampling decisions reproducible.
pub trait SampleSource: Send + Sync {
    /// Returns a value drawn uniformly from `[0, 1)`.
    fn sample(&self) -> f64;
}

/// Draws from the thread-local random number generator.
///
/// This is the default sampler.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadRngSampler;

impl SampleSource for ThreadRngSampler {
    fn sample(&self) -> f64 {
        rand::rng().random()
    }
}

/// Draws from a shared generator, such as a seeded one.
impl<R> SampleSource for Mutex<R>
where
    R: RngCore + Send,
{
    fn sample(&self) -> f64 {
        self.lock().random()
    }
}
