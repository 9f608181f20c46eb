//! Local stand-ins used when the generation service fails.

use rand::seq::SliceRandom;
use rand::Rng;

/// Captions shown when image analysis fails.
pub const FALLBACK_CAPTIONS: [&str; 4] = [
    "soft light, a centered subject, and a calm palette",
    "gentle contrast, a still focal point, and a quiet mood",
    "warm tones, soft shadows, and an intimate composition",
    "clean lines, muted color, and a grounded atmosphere",
];

/// Reply used when a chat turn fails.
pub const FALLBACK_CHAT_REPLY: &str = "I caught a gentle moment here - soft light, a steady calm, and the feeling of holding onto something tender.";

/// Pick one of [`FALLBACK_CAPTIONS`].
#[must_use]
pub fn fallback_caption<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    FALLBACK_CAPTIONS
        .choose(rng)
        .copied()
        .unwrap_or(FALLBACK_CAPTIONS[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn caption_comes_from_the_set() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..32 {
            assert!(FALLBACK_CAPTIONS.contains(&fallback_caption(&mut rng)));
        }
    }

    #[test]
    fn seeded_choice_is_stable() {
        let a = fallback_caption(&mut StdRng::seed_from_u64(42));
        let b = fallback_caption(&mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }
}
