// src/services/generator/sampling.rs
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{GenerationError, GenerationParameters};

/// Picks the next token from a logits vector.
///
/// With `do_sample` the draw is temperature-scaled nucleus sampling and
/// therefore non-deterministic unless a seed is configured. Without it the
/// highest logit wins.
pub struct Sampler {
    rng: StdRng,
    do_sample: bool,
    temperature: f32,
    top_p: f32,
}

impl Sampler {
    pub fn new(params: &GenerationParameters) -> Self {
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng,
            do_sample: params.do_sample,
            temperature: params.temperature,
            top_p: params.top_p,
        }
    }

    pub fn sample(&mut self, logits: &[f32]) -> Result<u32, GenerationError> {
        if !self.do_sample {
            return argmax(logits)
                .map(|i| i as u32)
                .ok_or_else(|| GenerationError::Inference("no finite logits to decode".into()));
        }

        let candidates = nucleus(logits, self.temperature, self.top_p);
        let total: f32 = candidates.iter().map(|(_, p)| p).sum();
        if candidates.is_empty() || total <= 0.0 {
            return Err(GenerationError::Inference("no finite logits to sample".into()));
        }

        let mut target = self.rng.random::<f32>() * total;
        for &(token, p) in &candidates {
            if target < p {
                return Ok(token as u32);
            }
            target -= p;
        }
        // Float rounding can leave a sliver past the last candidate.
        Ok(candidates[candidates.len() - 1].0 as u32)
    }
}

fn argmax(logits: &[f32]) -> Option<usize> {
    logits
        .iter()
        .enumerate()
        .filter(|(_, l)| l.is_finite())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}

/// Softmax over `logits / temperature`, sorted by probability, truncated to
/// the smallest prefix whose mass reaches `top_p`. Non-finite logits are
/// dropped. Probabilities are not renormalized; callers draw against the sum.
pub(crate) fn nucleus(logits: &[f32], temperature: f32, top_p: f32) -> Vec<(usize, f32)> {
    let Some(max) = logits
        .iter()
        .copied()
        .filter(|l| l.is_finite())
        .max_by(f32::total_cmp)
    else {
        return Vec::new();
    };

    let mut probs: Vec<(usize, f32)> = logits
        .iter()
        .enumerate()
        .filter(|(_, l)| l.is_finite())
        .map(|(i, &l)| (i, ((l - max) / temperature).exp()))
        .collect();
    let total: f32 = probs.iter().map(|(_, p)| p).sum();
    for (_, p) in probs.iter_mut() {
        *p /= total;
    }
    probs.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut cumulative = 0.0;
    let mut keep = probs.len();
    for (idx, (_, p)) in probs.iter().enumerate() {
        cumulative += p;
        if cumulative >= top_p {
            keep = idx + 1;
            break;
        }
    }
    probs.truncate(keep);
    probs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(do_sample: bool, top_p: f32, temperature: f32) -> GenerationParameters {
        GenerationParameters {
            do_sample,
            top_p,
            temperature,
            seed: Some(7),
            ..GenerationParameters::default()
        }
    }

    #[test]
    fn greedy_takes_the_largest_logit() {
        let mut sampler = Sampler::new(&params(false, 0.9, 0.7));
        assert_eq!(sampler.sample(&[0.1, 3.0, -2.0, 2.9]).unwrap(), 1);
    }

    #[test]
    fn greedy_ignores_nan() {
        let mut sampler = Sampler::new(&params(false, 0.9, 0.7));
        assert_eq!(sampler.sample(&[f32::NAN, 1.0, 0.5]).unwrap(), 1);
    }

    #[test]
    fn nucleus_keeps_only_the_head() {
        // One dominant token carries well over 90% of the mass.
        let kept = nucleus(&[10.0, 0.0, 0.0, 0.0], 1.0, 0.9);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].0, 0);
    }

    #[test]
    fn nucleus_full_mass_keeps_everything() {
        let kept = nucleus(&[1.0, 1.0, 1.0], 1.0, 1.0);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn nucleus_drops_impossible_tokens() {
        let kept = nucleus(&[f32::NEG_INFINITY, 0.0, 0.0], 1.0, 1.0);
        assert!(kept.iter().all(|(i, _)| *i != 0));
    }

    #[test]
    fn sampling_stays_inside_the_nucleus() {
        let mut sampler = Sampler::new(&params(true, 0.5, 0.7));
        for _ in 0..200 {
            assert_eq!(sampler.sample(&[0.0, 8.0, 0.0, 0.0]).unwrap(), 1);
        }
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let logits = [1.0, 1.1, 0.9, 1.05, 0.95];
        let mut a = Sampler::new(&params(true, 1.0, 1.0));
        let mut b = Sampler::new(&params(true, 1.0, 1.0));
        let xs: Vec<u32> = (0..32).map(|_| a.sample(&logits).unwrap()).collect();
        let ys: Vec<u32> = (0..32).map(|_| b.sample(&logits).unwrap()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn all_impossible_is_an_error() {
        let mut sampler = Sampler::new(&params(true, 0.9, 0.7));
        let err = sampler.sample(&[f32::NEG_INFINITY; 4]).unwrap_err();
        assert!(matches!(err, GenerationError::Inference(_)));

        let mut greedy = Sampler::new(&params(false, 0.9, 0.7));
        assert!(greedy.sample(&[]).is_err());
    }
}
