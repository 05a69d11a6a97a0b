//! `generateName` suffix synthesis, used when a create request supplies a
//! base name but no concrete name (spec §4.5.2 step 2).
use rand::Rng;

const SUFFIX_LEN: usize = 5;
// Excludes visually ambiguous characters (0/O, 1/l/I), matching the
// well-known apiserver alphabet.
const ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

pub fn generate(base: &str) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{base}{suffix}")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn appends_fixed_length_suffix() {
        let name = generate("widget-");
        assert_eq!(name.len(), "widget-".len() + SUFFIX_LEN);
        assert!(name.starts_with("widget-"));
    }

    #[test]
    fn suffixes_are_not_always_identical() {
        let a = generate("x");
        let b = generate("x");
        // Flaky only with probability ~1/28^5; acceptable for a unit test.
        assert_ne!(a, b);
    }
}
