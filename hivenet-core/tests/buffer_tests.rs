//! IoBuffer cursor bookkeeping under random operation sequences, checked
//! against a plain `VecDeque` of the same bytes.

use std::collections::VecDeque;

use hivenet_core::buffer::IoBuffer;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const FLOOR: usize = 64;
const MAX: usize = 4096;

fn assert_matches(buf: &IoBuffer, model: &VecDeque<u8>, step: usize) {
    let (front, back) = model.as_slices();
    let data = buf.peek_data();
    assert_eq!(data.len(), model.len(), "length diverged at step {step}");
    assert_eq!(&data[..front.len()], front, "front diverged at step {step}");
    assert_eq!(&data[front.len()..], back, "back diverged at step {step}");
    assert_eq!(buf.data_len(), model.len());
    assert!(buf.capacity() >= buf.data_len());
    assert!(buf.capacity() <= MAX);
}

fn run(seed: u64, steps: usize) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut buf = IoBuffer::new(FLOOR, MAX);
    let mut model = VecDeque::new();

    for step in 0..steps {
        match rng.gen_range(0..10) {
            0..=2 => {
                let len = rng.gen_range(0..600);
                let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                let fits = model.len() + len <= MAX;
                assert_eq!(buf.push_data(&data), fits, "push of {len} at step {step}");
                if fits {
                    model.extend(&data);
                }
            }
            3..=5 => {
                let n = rng.gen_range(0..=model.len());
                buf.pop_data(n);
                model.drain(..n);
            }
            6..=7 => {
                let space = buf.peek_space();
                assert_eq!(space.is_empty(), model.len() == MAX, "peek_space at step {step}");
                let n = rng.gen_range(0..=space.len().min(512));
                let data: Vec<u8> = (0..n).map(|_| rng.gen()).collect();
                space[..n].copy_from_slice(&data);
                buf.pop_space(n);
                model.extend(&data);
            }
            8 => buf.regularize(),
            _ => buf.resize(rng.gen_range(0..2 * MAX)),
        }
        assert_matches(&buf, &model, step);
    }

    let rest = model.len();
    buf.pop_data(rest);
    assert!(buf.is_empty());
}

#[test]
fn test_random_ops_match_model() {
    for seed in 0..16 {
        run(seed, 3000);
    }
}

#[test]
fn test_fill_to_max_then_drain() {
    let mut rng = StdRng::seed_from_u64(99);
    let mut buf = IoBuffer::new(FLOOR, MAX);
    let mut model = VecDeque::new();

    // Fill through the recv path only, as a socket read loop would.
    loop {
        let space = buf.peek_space();
        if space.is_empty() {
            break;
        }
        let n = rng.gen_range(1..=space.len());
        let data: Vec<u8> = (0..n).map(|_| rng.gen()).collect();
        space[..n].copy_from_slice(&data);
        buf.pop_space(n);
        model.extend(&data);
    }
    assert_eq!(buf.data_len(), MAX);
    assert_eq!(buf.capacity(), MAX);
    assert!(!buf.push_data(b"x"));
    assert_matches(&buf, &model, 0);

    while !model.is_empty() {
        let n = rng.gen_range(1..=model.len().min(300));
        buf.pop_data(n);
        model.drain(..n);
        assert_matches(&buf, &model, 1);
    }
    assert!(buf.capacity() >= buf.floor());
}
