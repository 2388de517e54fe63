use std::fmt;
use std::str::FromStr;

/// Distance metrics over fixed-width numeric vectors.
///
/// Every metric is defined for `f32` and `f64` element types and returns a
/// non-negative `f64`. The inner loops are plain indexed folds over equal
/// lengths so the compiler can vectorize them; callers validate shape
/// before getting here (the `debug_assert` only guards internal misuse).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Distance {
    L1,
    L2,
    L2Squared,
    ChiSquared,
    Cosine,
    Hamming,
}

macro_rules! impl_eval {
    ($name:ident, $elem:ty) => {
        pub fn $name(&self, a: &[$elem], b: &[$elem]) -> f64 {
            debug_assert_eq!(a.len(), b.len(), "shape checked by the caller");
            match self {
                Distance::L1 => a
                    .iter()
                    .zip(b)
                    .map(|(&x, &y)| (x as f64 - y as f64).abs())
                    .sum(),
                Distance::L2 => self::Distance::L2Squared.$name(a, b).sqrt(),
                Distance::L2Squared => a
                    .iter()
                    .zip(b)
                    .map(|(&x, &y)| {
                        let d = x as f64 - y as f64;
                        d * d
                    })
                    .sum(),
                Distance::ChiSquared => a
                    .iter()
                    .zip(b)
                    .map(|(&x, &y)| {
                        let (x, y) = (x as f64, y as f64);
                        let denom = x + y;
                        if denom == 0.0 {
                            0.0
                        } else {
                            (x - y) * (x - y) / denom
                        }
                    })
                    .sum(),
                Distance::Cosine => {
                    let mut dot = 0.0f64;
                    let mut norm_a = 0.0f64;
                    let mut norm_b = 0.0f64;
                    for (&x, &y) in a.iter().zip(b) {
                        let (x, y) = (x as f64, y as f64);
                        dot += x * y;
                        norm_a += x * x;
                        norm_b += y * y;
                    }
                    let denom = norm_a.sqrt() * norm_b.sqrt();
                    if denom == 0.0 {
                        1.0
                    } else {
                        // Clamp: rounding can push the ratio past 1.
                        (1.0 - dot / denom).max(0.0)
                    }
                }
                Distance::Hamming => a
                    .iter()
                    .zip(b)
                    .filter(|(x, y)| x.to_bits() != y.to_bits())
                    .count() as f64,
            }
        }
    };
}

impl Distance {
    impl_eval!(eval_f32, f32);
    impl_eval!(eval_f64, f64);
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Distance::L1 => "L1",
            Distance::L2 => "L2",
            Distance::L2Squared => "L2SQUARED",
            Distance::ChiSquared => "CHISQUARED",
            Distance::Cosine => "COSINE",
            Distance::Hamming => "HAMMING",
        };
        f.write_str(name)
    }
}

impl FromStr for Distance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "L1" => Ok(Distance::L1),
            "L2" => Ok(Distance::L2),
            "L2SQUARED" => Ok(Distance::L2Squared),
            "CHISQUARED" => Ok(Distance::ChiSquared),
            "COSINE" => Ok(Distance::Cosine),
            "HAMMING" => Ok(Distance::Hamming),
            other => Err(format!("unknown distance function: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn known_values_f32() {
        let a = [1.0f32, 0.0, 0.0, 0.0];
        let b = [0.0f32, 1.0, 0.0, 0.0];
        close(Distance::L1.eval_f32(&a, &b), 2.0);
        close(Distance::L2Squared.eval_f32(&a, &b), 2.0);
        close(Distance::L2.eval_f32(&a, &b), 2.0f64.sqrt());
        close(Distance::Cosine.eval_f32(&a, &b), 1.0);
        close(Distance::Hamming.eval_f32(&a, &b), 2.0);
        close(Distance::ChiSquared.eval_f32(&a, &b), 2.0);
    }

    #[test]
    fn identical_vectors_are_at_zero() {
        let v = [0.25f64, -3.5, 7.0];
        for metric in [
            Distance::L1,
            Distance::L2,
            Distance::L2Squared,
            Distance::Cosine,
            Distance::Hamming,
        ] {
            close(metric.eval_f64(&v, &v), 0.0);
        }
    }

    #[test]
    fn zero_norm_cosine_is_defined() {
        let zero = [0.0f32; 3];
        let v = [1.0f32, 2.0, 3.0];
        close(Distance::Cosine.eval_f32(&zero, &v), 1.0);
    }

    #[test]
    fn hamming_is_bit_exact() {
        let a = [f64::NAN, 1.0];
        let b = [f64::NAN, 1.0];
        close(Distance::Hamming.eval_f64(&a, &b), 0.0);
        let c = [-f64::NAN, 1.0];
        close(Distance::Hamming.eval_f64(&a, &c), 1.0);
    }
}
