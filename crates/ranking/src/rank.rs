use common::{EngineError, Result};

pub fn rank<T: Clone>(scores: &[f32], ids: &[T]) -> Result<(Vec<f32>, Vec<T>)> {
    if scores.len() != ids.len() {
        return Err(EngineError::InvalidInput(format!(
            "{} scores for {} ids",
            scores.len(),
            ids.len()
        )));
    }
    let key = |idx: usize| {
        let score = scores[idx];
        if score.is_nan() { f32::NEG_INFINITY } else { score }
    };
    let mut order = (0..scores.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| key(b).total_cmp(&key(a)));
    Ok((
        order.iter().map(|&idx| scores[idx]).collect(),
        order.iter().map(|&idx| ids[idx].clone()).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::rank;

    #[test]
    fn sorts_descending_and_keeps_tie_order() {
        let (scores, ids) = rank(&[0.2, 0.9, 0.5, 0.9], &["a", "b", "c", "d"]).expect("rank");
        assert_eq!(scores, vec![0.9, 0.9, 0.5, 0.2]);
        assert_eq!(ids, vec!["b", "d", "c", "a"]);
    }

    #[test]
    fn nan_goes_last() {
        let (_, ids) = rank(&[f32::NAN, 0.1], &[1, 2]).expect("rank");
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        assert!(rank(&[1.0], &["a", "b"]).is_err());
    }

    proptest! {
        #[test]
        fn ranked_output_is_a_sorted_permutation(scores in prop::collection::vec(-10.0f32..10.0, 0..40)) {
            let ids = (0..scores.len()).collect::<Vec<_>>();
            let (ranked, order) = rank(&scores, &ids).expect("rank");
            prop_assert!(ranked.windows(2).all(|w| w[0] >= w[1]));
            let mut seen = order.clone();
            seen.sort_unstable();
            prop_assert_eq!(seen, ids);
            for (score, idx) in ranked.iter().zip(&order) {
                prop_assert_eq!(*score, scores[*idx]);
            }
        }
    }
}
