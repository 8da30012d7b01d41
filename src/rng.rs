use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

/// A stream of independent standard-normal draws.
///
/// Every random shock in the crate comes through this trait, so a run is fully
/// determined by the source handed to it.
pub trait ShockSource {
    fn fill_standard_normal(&mut self, out: &mut [f64]);
}

/// Standard-normal draws from any `rand` generator.
pub struct NormalStream<R> {
    rng: R,
}

impl<R: RngCore> NormalStream<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl NormalStream<ChaCha8Rng> {
    /// Seeded ChaCha8 stream for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self::new(ChaCha8Rng::seed_from_u64(seed))
    }

    /// Independent stream for one chunk of scenarios.
    ///
    /// All chunks share the seed and differ by ChaCha stream id, so their outputs
    /// never overlap.
    pub fn for_chunk(seed: u64, chunk: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(chunk);
        Self::new(rng)
    }
}

impl<R: RngCore> ShockSource for NormalStream<R> {
    fn fill_standard_normal(&mut self, out: &mut [f64]) {
        for z in out.iter_mut() {
            *z = self.rng.sample(StandardNormal);
        }
    }
}
