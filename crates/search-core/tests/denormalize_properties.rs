use common::ScoredHit;
use proptest::prelude::*;
use search_core::{denormalize, denormalize_all, merge_channels};

fn words() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{2,8}", 1..12)
}

proptest! {
    #[test]
    fn denormalize_is_deterministic(term in "[a-zA-Z]{0,6}", text in "[a-zA-Z ]{0,40}") {
        prop_assert_eq!(denormalize(&term, &text), denormalize(&term, &text));
    }

    #[test]
    fn literal_prefix_matches_first_word_with_that_prefix(
        words in words(),
        pick in any::<prop::sample::Index>(),
        cut in any::<prop::sample::Index>(),
    ) {
        let word = &words[pick.index(words.len())];
        let prefix = &word[..=cut.index(word.len())];
        let text = words.join(" ");

        let mut offset = 0;
        let mut expected = None;
        for candidate in &words {
            if candidate.starts_with(prefix) {
                expected = Some((candidate.clone(), offset));
                break;
            }
            offset += candidate.len() + 1;
        }

        let found = denormalize(prefix, &text).expect("prefix of a word must match");
        prop_assert_eq!(Some((found.surface, found.offset)), expected);
    }

    #[test]
    fn keep_order_sorts_without_changing_the_set(
        terms in prop::collection::vec("[a-z]{1,6}", 0..8),
        title in words(),
        body in words(),
    ) {
        let title = title.join(" ");
        let body = body.join(" ");
        let ordered = denormalize_all(&terms, &title, &body, true);
        let unordered = denormalize_all(&terms, &title, &body, false);

        prop_assert!(ordered.windows(2).all(|w| w[0].offset <= w[1].offset));
        let mut a = ordered.clone();
        let mut b = unordered.clone();
        a.sort_by(|x, y| x.surface.cmp(&y.surface));
        b.sort_by(|x, y| x.surface.cmp(&y.surface));
        prop_assert_eq!(a, b);
    }

    #[test]
    fn merged_channels_stay_within_both_sizes(
        lexical in prop::collection::vec("[a-f]", 0..6),
        semantic in prop::collection::vec("[a-f]", 0..6),
    ) {
        let to_hits = |ids: &[String]| {
            ids.iter()
                .map(|id| ScoredHit { id: id.clone(), score: 1.0 })
                .collect::<Vec<_>>()
        };
        let fused = merge_channels("a", to_hits(&lexical), to_hits(&semantic));
        prop_assert!(fused.candidates.len() <= lexical.len() + semantic.len());
        prop_assert!(fused.candidates.iter().all(|c| c.id != "a"));
        for candidate in &fused.candidates {
            prop_assert_eq!(candidate.bm25_score.is_some(), lexical.contains(&candidate.id));
            prop_assert_eq!(candidate.cosine_score.is_some(), semantic.contains(&candidate.id));
        }
    }
}
