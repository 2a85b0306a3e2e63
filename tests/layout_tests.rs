use keyweave::layout::{feedback, random_layout, validate, LayoutString, ValidationError};
use proptest::prelude::*;
use rstest::rstest;

const EXAMPLE: &str = "zluaqwbdgyjßcrieomntshvxüäöpf,.k";

fn keys(symbols: &str) -> Vec<String> {
    symbols.chars().map(String::from).collect()
}

#[test]
fn test_example_layout_is_valid() {
    let layout = LayoutString::from(EXAMPLE);
    assert_eq!(layout.symbol_count(), 32);
    assert!(validate(&layout, &keys(EXAMPLE)).is_ok());
    assert_eq!(feedback(&layout, &keys(EXAMPLE)), None);
}

#[rstest]
#[case("  ZLUA qwbd\tgyjß crie omnt shvx üäöp f,.k ", EXAMPLE)]
#[case("ABC", "abc")]
#[case("a b c", "abc")]
fn test_normalization(#[case] raw: &str, #[case] expected: &str) {
    assert_eq!(LayoutString::normalized(raw).as_str(), expected);
}

#[rstest]
#[case("abcd", ValidationError::Length { expected: 5, actual: 4 })]
#[case("abcdee", ValidationError::Length { expected: 5, actual: 6 })]
#[case("abcaa", ValidationError::Duplicates("a".into()))]
#[case("abcdx", ValidationError::Unknown("x".into()))]
// Duplicates are reported before unknown symbols.
#[case("aacdx", ValidationError::Duplicates("a".into()))]
fn test_validation_errors(#[case] layout: &str, #[case] expected: ValidationError) {
    let err = validate(&LayoutString::from(layout), &keys("abcde")).unwrap_err();
    assert_eq!(err, expected);
}

#[rstest]
#[case("abcaa", "Duplicates: \"a\". Missing: \"de\". ")]
#[case("abcdx", "Missing: \"e\". Unknown: \"x\". ")]
#[case("abcd", "Missing: \"e\". ")]
#[case("abcdea", "Duplicates: \"a\". ")]
fn test_feedback_messages(#[case] layout: &str, #[case] expected: &str) {
    let msg = feedback(&LayoutString::from(layout), &keys("abcde")).unwrap();
    assert_eq!(msg, expected);
}

#[test]
fn test_random_layout_keeps_fixed_positions() {
    let mut rng = fastrand::Rng::with_seed(7);
    let keyset = keys(EXAMPLE);
    for _ in 0..50 {
        let layout = random_layout(&mut rng, &keyset, ",.");
        let symbols: Vec<char> = layout.symbols().collect();
        assert_eq!(symbols[29], ',');
        assert_eq!(symbols[30], '.');
        assert!(validate(&layout, &keyset).is_ok());
    }
}

// --- PROPERTIES ---

prop_compose! {
    fn arb_keyset()(symbols in proptest::collection::hash_set(proptest::char::range('a', 'z'), 2..26)) -> Vec<String> {
        symbols.into_iter().map(String::from).collect()
    }
}

proptest! {
    #[test]
    fn prop_random_layout_is_a_permutation(keyset in arb_keyset(), seed in any::<u64>()) {
        let mut rng = fastrand::Rng::with_seed(seed);
        let fixed: String = keyset.iter().take(1).cloned().collect();
        let layout = random_layout(&mut rng, &keyset, &fixed);

        prop_assert!(validate(&layout, &keyset).is_ok());
        prop_assert_eq!(layout.symbols().next().map(String::from), Some(fixed));
    }

    #[test]
    fn prop_swapping_a_symbol_for_a_duplicate_is_rejected(keyset in arb_keyset(), pos in any::<prop::sample::Index>()) {
        let mut symbols: Vec<String> = keyset.clone();
        let i = pos.index(symbols.len());
        let j = (i + 1) % symbols.len();
        symbols[i] = symbols[j].clone();
        let layout = LayoutString::new(symbols.concat());

        let is_duplicate = matches!(validate(&layout, &keyset), Err(ValidationError::Duplicates(_)));
        prop_assert!(is_duplicate);
        prop_assert!(feedback(&layout, &keyset).unwrap().contains("Missing"));
    }

    #[test]
    fn prop_normalized_input_has_no_whitespace(raw in "[a-zA-Z ,.]{0,40}") {
        let layout = LayoutString::normalized(&raw);
        prop_assert!(!layout.as_str().contains(' '));
        prop_assert_eq!(layout.as_str().to_lowercase(), layout.as_str());
    }
}
