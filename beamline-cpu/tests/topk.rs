//! Two-stage beam top-k against a plain sort.

use beamline::{vocab_parts, Candidates, TopKSelector, MAX_BEAMS};
use beamline_cpu::{CpuBackend, CpuStream};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Sort every candidate of each batch element and keep the best `2 * num_beams`.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn naive_topk(
    scores: &[f32],
    batch_size: usize,
    num_beams: usize,
    vocab_size: usize,
) -> Candidates {
    let k = 2 * num_beams;
    let mut out = Candidates {
        scores: Vec::new(),
        tokens: Vec::new(),
        beams: Vec::new(),
    };
    for batch in 0..batch_size {
        let span = batch * num_beams * vocab_size..(batch + 1) * num_beams * vocab_size;
        let mut all: Vec<(f32, usize)> = scores[span]
            .iter()
            .enumerate()
            .map(|(flat, &s)| (s, flat))
            .collect();
        all.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        for &(score, flat) in &all[..k] {
            out.scores.push(score);
            out.tokens.push((flat % vocab_size) as i32);
            out.beams.push((flat / vocab_size) as i32);
        }
    }
    out
}

fn select(scores: &[f32], batch_size: usize, num_beams: usize, vocab_size: usize) -> Candidates {
    let mut selector =
        TopKSelector::<CpuBackend>::new(&CpuStream, batch_size, num_beams, vocab_size).unwrap();
    selector.select(&scores.to_vec()).unwrap();
    selector.candidates().unwrap()
}

#[test]
fn matches_naive_sort_on_large_vocab() {
    let vocab_size = 50_000;
    let batch_size = 2;
    let mut rng = StdRng::seed_from_u64(42);

    for num_beams in [1, 2, 4, 8] {
        assert!(vocab_parts(batch_size * num_beams, vocab_size) > 1);
        let scores: Vec<f32> = (0..batch_size * num_beams * vocab_size)
            .map(|_| rng.gen_range(-20.0..0.0))
            .collect();

        let got = select(&scores, batch_size, num_beams, vocab_size);
        let want = naive_topk(&scores, batch_size, num_beams, vocab_size);
        assert_eq!(got, want, "num_beams = {num_beams}");
    }
}

#[test]
fn candidates_are_best_first() {
    let mut rng = StdRng::seed_from_u64(7);
    let scores: Vec<f32> = (0..4 * 1000).map(|_| rng.gen()).collect();
    let got = select(&scores, 1, 4, 1000);
    assert!(got.scores.windows(2).all(|w| w[0] >= w[1]));
}

#[test]
fn single_part_vocab() {
    // vocab_parts(2, 1) is 1: the whole row is one partition.
    let scores = vec![0.5, 0.25];
    let got = select(&scores, 1, 2, 1);
    assert_eq!(got.scores[..2], [0.5, 0.25]);
    assert_eq!(got.beams[..2], [0, 1]);
}

#[test]
#[should_panic(expected = "beam top-k supports")]
fn too_many_beams_panics() {
    let _ = TopKSelector::<CpuBackend>::new(&CpuStream, 1, MAX_BEAMS + 1, 100);
}

/// Shapes small enough that ties and short partitions are common.
fn arb_case() -> impl Strategy<Value = (usize, usize, usize, Vec<f32>)> {
    (1usize..3, 1usize..5, 2usize..40).prop_flat_map(|(batch, beams, vocab)| {
        let n = batch * beams * vocab;
        (
            Just(batch),
            Just(beams),
            Just(vocab),
            prop::collection::vec((-4i32..4).prop_map(|x| x as f32 * 0.5), n),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn two_stage_equals_naive((batch, beams, vocab, scores) in arb_case()) {
        let got = select(&scores, batch, beams, vocab);
        let want = naive_topk(&scores, batch, beams, vocab);
        prop_assert_eq!(got, want);
    }
}
