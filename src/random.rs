use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;
use std::sync::Mutex;

/// Source of randomness for the impairment simulator, abstracted for deterministic tests
#[cfg_attr(test, mockall::automock)]
pub trait Random: Send + Sync {
    /// uniformly distributed in `[0, 1)`
    fn next_f64(&self) -> f64;
    fn gen_usize_range(&self, range: Range<usize>) -> usize;
}

pub struct RngRandom {}
impl Random for RngRandom {
    fn next_f64(&self) -> f64 {
        rand::thread_rng().gen()
    }

    fn gen_usize_range(&self, range: Range<usize>) -> usize {
        rand::thread_rng().gen_range(range)
    }
}

/// Reproducible randomness: the same seed yields the same impairment decisions
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}
impl SeededRandom {
    pub fn new(seed: u64) -> SeededRandom {
        SeededRandom {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}
impl Random for SeededRandom {
    fn next_f64(&self) -> f64 {
        self.rng.lock().unwrap().gen()
    }

    fn gen_usize_range(&self, range: Range<usize>) -> usize {
        self.rng.lock().unwrap().gen_range(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_is_reproducible() {
        let a = SeededRandom::new(99);
        let b = SeededRandom::new(99);

        for _ in 0..20 {
            assert_eq!(a.next_f64(), b.next_f64());
            assert_eq!(a.gen_usize_range(4..100), b.gen_usize_range(4..100));
        }
    }

    #[test]
    fn test_ranges() {
        let random = RngRandom {};
        for _ in 0..100 {
            let f = random.next_f64();
            assert!((0.0..1.0).contains(&f));
            assert!((4..7).contains(&random.gen_usize_range(4..7)));
        }
    }
}
