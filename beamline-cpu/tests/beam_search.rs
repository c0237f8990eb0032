//! Beam search end to end on the CPU backend.

mod test_helpers;

use beamline::{BeamSearch, BeamState, DoneReason, Generator, Search, SearchParams};
use beamline_cpu::{CpuBackend, CpuStream};

use test_helpers::{init_tracing, scripted_logits, ScriptedModel, EOS};

const PAD: i32 = 9;
const VOCAB: usize = 10;

/// Token 3 first, EOS afterwards.
fn three_then_eos(step: usize, _slot: usize) -> i32 {
    if step == 0 {
        3
    } else {
        EOS
    }
}

#[test]
fn finishes_with_eos_then_padding() {
    init_tracing();
    let params = SearchParams::new(1, VOCAB, 6, EOS, PAD).with_num_beams(2);
    let model = ScriptedModel::new(VOCAB, 2, three_then_eos);
    let output = Generator::new(params, &CpuStream, &[5, 6], model)
        .unwrap()
        .generate();

    assert_eq!(output.sequence(0, 0), &[5, 6, 3, EOS, PAD, PAD]);
    // cumulative log-prob of two near-certain tokens, over length 4
    assert!(output.score(0, 0) < 0.0 && output.score(0, 0) > -0.01);
}

#[test]
fn returns_hypotheses_best_first() {
    let params = SearchParams::new(1, VOCAB, 6, EOS, PAD)
        .with_num_beams(2)
        .with_num_return_sequences(2);
    let model = ScriptedModel::new(VOCAB, 2, three_then_eos);
    let output = Generator::new(params, &CpuStream, &[5, 6], model)
        .unwrap()
        .try_generate()
        .unwrap();

    assert_eq!(output.sequences.len(), 2 * 6);
    assert_eq!(output.sequence(0, 0), &[5, 6, 3, EOS, PAD, PAD]);
    assert_eq!(output.sequence(0, 1)[..2], [5, 6]);
    assert!(output.score(0, 0) > output.score(0, 1));
}

#[test]
fn first_step_expands_only_the_first_beam() {
    let params = SearchParams::new(1, VOCAB, 6, EOS, PAD).with_num_beams(2);
    let mut search = Search::<CpuBackend>::new(params, &CpuStream, &[5, 6]).unwrap();
    search.set_logits(&scripted_logits(2, VOCAB, |_| 3)).unwrap();
    search.next_tokens_from_logits().unwrap();
    search.check_for_eos().unwrap();

    assert_eq!(search.next_tokens().unwrap(), vec![3, 1]);
    assert_eq!(search.next_indices(), Some(&[0, 0][..]));

    search.append_next_tokens_to_sequences().unwrap();
    assert_eq!(search.sequence_length(), 3);
    assert!(!search.is_done().unwrap());
}

#[test]
fn batch_elements_finish_independently() {
    // Prompt 0 ends with EOS, prompt 1 runs into the length cap.
    let model = ScriptedModel::new(VOCAB, 2, |step, slot| {
        if slot < 2 {
            three_then_eos(step, slot)
        } else {
            4
        }
    });
    let params = SearchParams::new(2, VOCAB, 6, EOS, PAD).with_num_beams(2);
    let mut generator = Generator::new(params, &CpuStream, &[5, 6, 7, 8], model).unwrap();
    while !generator.step().unwrap() {}

    let Search::Beam(beam) = generator.search() else {
        panic!("expected beam search");
    };
    assert!(beam.scorer().state(0).is_done());
    assert_eq!(
        beam.scorer().state(1),
        BeamState::Done(DoneReason::LengthCap)
    );
    assert_eq!(generator.search().sequence_length(), 6);

    let output = generator.try_generate().unwrap();
    assert_eq!(output.sequence(0, 0), &[5, 6, 3, EOS, PAD, PAD]);
    assert_eq!(output.sequence(1, 0), &[7, 8, 4, 4, 4, 4]);
}

#[test]
#[should_panic(expected = "beam search needs num_beams > 1")]
fn beam_search_rejects_single_beam() {
    let params = SearchParams::new(1, VOCAB, 6, EOS, PAD);
    let _ = BeamSearch::<CpuBackend>::new(params, &CpuStream, &[5]);
}

#[test]
#[should_panic(expected = "beam top-k supports")]
fn beam_search_rejects_too_many_beams() {
    let params = SearchParams::new(1, VOCAB, 6, EOS, PAD)
        .with_num_beams(33)
        .with_num_return_sequences(1);
    let _ = Search::<CpuBackend>::new(params, &CpuStream, &[5]);
}
