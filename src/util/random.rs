use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};


/// Source of randomness for simulated packet loss. Sessions own their instance, so a seeded
///  implementation makes simulation runs reproducible.
#[cfg_attr(test, mockall::automock)]
pub trait RandomSource: Send + 'static {
    /// uniformly distributed in `1..=100`
    fn percentile_draw(&mut self) -> u8;
}

pub struct RngRandom {
    rng: StdRng,
}
impl RngRandom {
    pub fn from_entropy() -> RngRandom {
        RngRandom {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> RngRandom {
        RngRandom {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}
impl RandomSource for RngRandom {
    fn percentile_draw(&mut self) -> u8 {
        self.rng.gen_range(1..=100)
    }
}
