//! Случайная высота узла: геометрическое распределение, cap = max_height.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Схема повышения уровня.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeightScheme {
    /// P(ещё один уровень) = 1/2.
    Half,
    /// P(ещё один уровень) = 1/3.
    Third,
}

#[derive(Debug)]
pub(crate) struct HeightGen {
    scheme: HeightScheme,
    max_height: usize,
    rng: StdRng,
}

impl HeightGen {
    pub(crate) fn new(scheme: HeightScheme, max_height: usize) -> Self {
        Self {
            scheme,
            max_height,
            rng: StdRng::from_entropy(),
        }
    }

    pub(crate) fn with_seed(scheme: HeightScheme, max_height: usize, seed: u64) -> Self {
        Self {
            scheme,
            max_height,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Высота в диапазоне 1..=max_height.
    pub(crate) fn roll(&mut self) -> usize {
        let mut h = 1;
        match self.scheme {
            HeightScheme::Half => {
                // trailing ones случайного слова: каждый бит — монетка 1/2
                let mut bits: u64 = self.rng.gen();
                while h < self.max_height && (bits & 1) == 1 {
                    h += 1;
                    bits >>= 1;
                    if bits == 0 {
                        bits = self.rng.gen();
                    }
                }
            }
            HeightScheme::Third => {
                while h < self.max_height && self.rng.gen_range(0..3u32) == 0 {
                    h += 1;
                }
            }
        }
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heights_are_capped() {
        let mut g = HeightGen::with_seed(HeightScheme::Half, 4, 7);
        for _ in 0..10_000 {
            let h = g.roll();
            assert!((1..=4).contains(&h));
        }
        let mut g = HeightGen::with_seed(HeightScheme::Third, 1, 7);
        for _ in 0..1000 {
            assert_eq!(g.roll(), 1);
        }
    }

    #[test]
    fn half_scheme_is_roughly_geometric() {
        let mut g = HeightGen::with_seed(HeightScheme::Half, 16, 42);
        let n = 20_000;
        let ones = (0..n).filter(|_| g.roll() == 1).count();
        // ожидание n/2; допуск широкий
        assert!(ones > n * 4 / 10 && ones < n * 6 / 10, "ones={ones}");
    }
}
