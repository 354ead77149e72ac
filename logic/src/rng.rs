/// Injected RNG (§6: `RNG::random_int() -> int`), used for `Ping` nonces.
pub trait RandomSource: Send + Sync {
    fn random_u64(&self) -> u64;
}

/// Default `RandomSource` backed by `rand::thread_rng`.
#[derive(Default)]
pub struct ThreadRandomSource;

impl RandomSource for ThreadRandomSource {
    fn random_u64(&self) -> u64 {
        rand::random()
    }
}
