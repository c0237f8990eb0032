//! Greedy decoding on the CPU backend.

mod test_helpers;

use beamline::{BeamSearch, Error, Generator, GreedySearch, Search, SearchParams, SequenceView};
use beamline_cpu::{CpuBackend, CpuStream};

use test_helpers::{init_tracing, scripted_logits, ScriptedModel, EOS};

const PAD: i32 = 1;

fn greedy_search(
    vocab_size: usize,
    max_length: usize,
    prompt: &[i32],
    batch: usize,
) -> Search<CpuBackend> {
    let params = SearchParams::new(batch, vocab_size, max_length, EOS, PAD);
    Search::new(params, &CpuStream, prompt).unwrap()
}

#[test]
fn selects_argmax_deterministically() {
    for _ in 0..3 {
        let mut search = greedy_search(4, 4, &[3], 1);
        search.set_logits(&vec![5.0, 1.0, 9.0, 2.0]).unwrap();
        search.next_tokens_from_logits().unwrap();
        assert_eq!(search.next_tokens().unwrap(), vec![2]);
    }
}

#[test]
fn sequence_grows_by_one_per_append() {
    let mut search = greedy_search(8, 5, &[1, 2], 1);
    let mut expected_len = 2;
    assert_eq!(search.sequence_length(), expected_len);

    while !search.is_done().unwrap() {
        search.set_logits(&scripted_logits(1, 8, |_| 4)).unwrap();
        search.next_tokens_from_logits().unwrap();
        search.check_for_eos().unwrap();
        search.append_next_tokens_to_sequences().unwrap();
        expected_len += 1;
        assert_eq!(search.sequence_length(), expected_len);
        assert!(search.sequence_length() <= 5);
    }

    assert_eq!(search.sequence_length(), 5);
    let sequences = search.state().sequences();
    assert_eq!(sequences.sequence(0).unwrap(), vec![1, 2, 4, 4, 4]);
}

#[test]
#[should_panic(expected = "already at max_length")]
fn append_past_max_length_panics() {
    let mut search = greedy_search(8, 3, &[1, 2], 1);
    for _ in 0..2 {
        search.set_logits(&scripted_logits(1, 8, |_| 4)).unwrap();
        search.next_tokens_from_logits().unwrap();
        search.append_next_tokens_to_sequences().unwrap();
    }
}

#[test]
fn prompt_at_max_length_is_done_immediately() {
    let mut search = greedy_search(8, 2, &[1, 2], 1);
    assert!(search.is_done().unwrap());
}

#[test]
#[should_panic(expected = "only single-position logits")]
fn multi_position_logits_panic() {
    let mut search = greedy_search(4, 4, &[3], 1);
    search.set_logits(&vec![0.0; 8]).unwrap();
}

#[test]
fn invalid_params_are_rejected() {
    let params = SearchParams::new(1, 4, 4, 9, PAD);
    let result = Search::<CpuBackend>::new(params, &CpuStream, &[1]);
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn direct_constructors_validate_params() {
    let params = SearchParams::new(1, 4, 4, 9, PAD);
    let greedy = GreedySearch::<CpuBackend>::new(params, &CpuStream, &[1]);
    assert!(matches!(greedy, Err(Error::Config(_))));

    let params = SearchParams::new(1, 4, 4, EOS, 6).with_num_beams(2);
    let beam = BeamSearch::<CpuBackend>::new(params, &CpuStream, &[1]);
    assert!(matches!(beam, Err(Error::Config(_))));
}

#[test]
fn generate_pads_after_eos_and_stops_at_max_length() {
    init_tracing();
    // Prompt 0 emits 5 then EOS, prompt 1 never finishes.
    let model = ScriptedModel::new(8, 2, |step, slot| match (slot, step) {
        (0, 1) => EOS,
        (0, _) => 5,
        _ => 6,
    });
    let params = SearchParams::new(2, 8, 6, EOS, PAD);
    let generator = Generator::new(params, &CpuStream, &[1, 2, 3, 4], model).unwrap();
    let output = generator.generate();

    assert_eq!(output.num_return_sequences, 1);
    assert_eq!(output.sequence(0, 0), &[1, 2, 5, EOS, PAD, PAD]);
    assert_eq!(output.sequence(1, 0), &[3, 4, 6, 6, 6, 6]);
    assert_eq!(output.scores, vec![0.0, 0.0]);
}

#[test]
fn generate_stops_when_every_prompt_hits_eos() {
    let model = ScriptedModel::new(8, 1, |step, _| if step == 0 { 3 } else { EOS });
    let params = SearchParams::new(2, 8, 10, EOS, PAD);
    let generator = Generator::new(params, &CpuStream, &[1, 2], model).unwrap();
    let output = generator.try_generate().unwrap();

    assert_eq!(output.sequence(0, 0), &[1, 3, EOS, PAD, PAD, PAD, PAD, PAD, PAD, PAD]);
    assert_eq!(output.sequence(1, 0), &[2, 3, EOS, PAD, PAD, PAD, PAD, PAD, PAD, PAD]);
}
