//! Spintax resolution: `{Hi|Hello|Hey} there` picks one option per group.
//!
//! Groups are resolved left to right by re-scanning after each substitution,
//! so sequential groups in one template all resolve in a single call. The
//! pass count is bounded so a malformed template can never loop.

use rand::Rng;

/// Upper bound on substitutions per template. Real templates carry a handful
/// of groups; anything past this is malformed input.
const MAX_GROUPS: usize = 128;

/// Resolves every well-formed alternation group in `template`. Unbalanced
/// braces are left in place verbatim.
pub fn resolve(template: &str, rng: &mut impl Rng) -> String {
    let mut out = template.to_string();
    for _ in 0..MAX_GROUPS {
        let Some((open, close)) = innermost_group(&out) else {
            break;
        };
        let choices: Vec<&str> = out[open + 1..close].split('|').collect();
        let pick = choices[rng.random_range(0..choices.len())].to_string();
        out.replace_range(open..=close, &pick);
    }
    out
}

/// Finds the first `}` and the nearest `{` before it, i.e. the leftmost
/// group whose body contains no nested braces.
fn innermost_group(s: &str) -> Option<(usize, usize)> {
    let close = s.find('}')?;
    let open = s[..close].rfind('{')?;
    Some((open, close))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_single_group() {
        let mut rng = StdRng::seed_from_u64(1);
        let out = resolve("{Hi|Hello|Hey} there", &mut rng);
        assert!(["Hi there", "Hello there", "Hey there"].contains(&out.as_str()));
    }

    #[test]
    fn test_sequential_groups() {
        let mut rng = StdRng::seed_from_u64(7);
        let out = resolve("{A|B}-{C|D}", &mut rng);
        assert!(["A-C", "A-D", "B-C", "B-D"].contains(&out.as_str()));
    }

    #[test]
    fn test_deterministic_with_seeded_rng() {
        let a = resolve("{A|B}-{C|D}-{E|F}", &mut StdRng::seed_from_u64(42));
        let b = resolve("{A|B}-{C|D}-{E|F}", &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_groups_passthrough() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(resolve("plain text", &mut rng), "plain text");
    }

    #[test]
    fn test_unbalanced_open_terminates() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(resolve("{A|B", &mut rng), "{A|B");
    }

    #[test]
    fn test_unbalanced_close_terminates() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(resolve("A|B}", &mut rng), "A|B}");
    }

    #[test]
    fn test_single_option_group() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(resolve("{only} one", &mut rng), "only one");
    }

    #[test]
    fn test_empty_option_allowed() {
        let mut rng = StdRng::seed_from_u64(3);
        let out = resolve("Hey{ there|}!", &mut rng);
        assert!(["Hey there!", "Hey!"].contains(&out.as_str()));
    }
}
