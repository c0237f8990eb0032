//! EosOps implementation for CpuBackend.

use std::sync::atomic::{AtomicBool, Ordering};

use beamline::backend::EosOps;
use beamline::Result;

use crate::{CpuBackend, CpuStream};

impl EosOps for CpuBackend {
    fn check_for_eos(
        _stream: &CpuStream,
        next_tokens: &mut Vec<i32>,
        eos_meet: &mut Vec<bool>,
        eos_token_id: i32,
        pad_token_id: i32,
        done: &AtomicBool,
    ) -> Result<()> {
        for (token, met) in next_tokens.iter_mut().zip(eos_meet.iter_mut()) {
            if *met {
                *token = pad_token_id;
            } else if *token == eos_token_id {
                *met = true;
            }
        }
        if eos_meet.iter().all(|&met| met) {
            done.store(true, Ordering::Release);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_for_eos_pads_finished_slots() {
        let done = AtomicBool::new(false);
        let mut mask = vec![false, false, false];

        let mut tokens = vec![4, 0, 7];
        CpuBackend::check_for_eos(&CpuStream, &mut tokens, &mut mask, 0, 1, &done).unwrap();
        assert_eq!(tokens, vec![4, 0, 7]);
        assert_eq!(mask, vec![false, true, false]);
        assert!(!done.load(Ordering::Acquire));

        let mut tokens = vec![0, 5, 0];
        CpuBackend::check_for_eos(&CpuStream, &mut tokens, &mut mask, 0, 1, &done).unwrap();
        assert_eq!(tokens, vec![0, 1, 0]);
        assert!(done.load(Ordering::Acquire));
    }
}
