use std::sync::Mutex;

use rayon::prelude::*;

/// Ranges shorter than this are summed on the calling thread; the
/// bookkeeping of a parallel pass costs more than it saves below it.
const SEQUENTIAL_CUTOFF: usize = 512;

/// In-place exclusive prefix sum: afterwards `buf[i]` holds the sum of
/// the original values of `buf[..i]`. The original last element does not
/// contribute to anything.
pub fn prefix_sum(buf: &mut [i64]) {
    if buf.len() < SEQUENTIAL_CUTOFF {
        prefix_sum_sequential(buf);
        return;
    }

    let chunk_len = buf.len().div_ceil(rayon::current_num_threads());

    // First sweep only reads: one plain sum per chunk. Completion order
    // is whatever the pool produces, so each sum is tagged with its
    // chunk ordinal and the pairs are sorted back afterwards.
    let pairs = Mutex::new(Vec::new());
    buf.par_chunks(chunk_len)
        .enumerate()
        .for_each(|(ordinal, chunk)| {
            let total: i64 = chunk.iter().sum();
            pairs.lock().unwrap().push((ordinal, total));
        });
    let mut pairs = pairs.into_inner().unwrap();
    pairs.sort_unstable_by_key(|&(ordinal, _)| ordinal);

    let mut offsets: Vec<i64> = pairs.into_iter().map(|(_, total)| total).collect();
    prefix_sum(&mut offsets);

    // Second sweep rewrites each chunk starting from its offset. Every
    // element is read before its slot is overwritten.
    buf.par_chunks_mut(chunk_len)
        .zip(offsets.par_iter())
        .for_each(|(chunk, &offset)| {
            let mut acc = offset;
            for slot in chunk.iter_mut() {
                let value = *slot;
                *slot = acc;
                acc += value;
            }
        });
}

fn prefix_sum_sequential(buf: &mut [i64]) {
    let mut acc = 0;
    for slot in buf.iter_mut() {
        let value = *slot;
        *slot = acc;
        acc += value;
    }
}

/// For every index, the number of earlier elements satisfying the
/// predicate — which is exactly the position each passing element
/// receives when the sequence is compacted.
pub fn prefix_count<T, P>(xs: &[T], pred: P) -> Vec<i64>
where
    T: Sync,
    P: Fn(&T) -> bool + Sync,
{
    let mut indicator: Vec<i64> = xs.par_iter().map(|x| pred(x) as i64).collect();
    prefix_sum(&mut indicator);
    indicator
}

#[cfg(test)]
mod parallel_test {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg64;

    fn reference(buf: &[i64]) -> Vec<i64> {
        let mut out = Vec::with_capacity(buf.len());
        let mut acc = 0;
        for &value in buf {
            out.push(acc);
            acc += value;
        }
        out
    }

    fn random_buffer(len: usize, seed: u64) -> Vec<i64> {
        let mut rng = Pcg64::seed_from_u64(seed);
        (0..len).map(|_| rng.gen_range(-100..=100)).collect()
    }

    #[test]
    fn matches_reference_below_cutoff() {
        for len in [0, 1, 2, 7, SEQUENTIAL_CUTOFF - 1] {
            let mut buf = random_buffer(len, len as u64);
            let expected = reference(&buf);
            prefix_sum(&mut buf);
            assert_eq!(buf, expected);
        }
    }

    #[test]
    fn matches_reference_above_cutoff() {
        for len in [
            SEQUENTIAL_CUTOFF,
            SEQUENTIAL_CUTOFF + 1,
            10_000,
            100_003,
        ] {
            let mut buf = random_buffer(len, len as u64);
            let expected = reference(&buf);
            prefix_sum(&mut buf);
            assert_eq!(buf, expected);
        }
    }

    #[test]
    fn first_slot_becomes_zero() {
        let mut buf = vec![41, 1, -7];
        prefix_sum(&mut buf);
        assert_eq!(buf, vec![0, 41, 42]);
    }

    #[test]
    fn prefix_count_counts_earlier_matches() {
        let xs = [3, 1, 4, 1, 5, 9, 2, 6];
        let counts = prefix_count(&xs, |&x| x > 2);
        assert_eq!(counts, vec![0, 1, 1, 2, 2, 3, 4, 4]);
    }

    #[test]
    fn prefix_count_large_matches_filter_positions() {
        let xs = random_buffer(50_000, 99);
        let counts = prefix_count(&xs, |&x| x % 2 == 0);
        let mut expected = 0;
        for (i, &x) in xs.iter().enumerate() {
            assert_eq!(counts[i], expected);
            if x % 2 == 0 {
                expected += 1;
            }
        }
    }

    // Timing comparison, meaningful on a quiet multi-core machine only.
    #[test]
    #[ignore]
    fn parallel_beats_sequential_on_large_input() {
        if rayon::current_num_threads() < 2 {
            return;
        }
        let buf = random_buffer(50_000_000, 7);

        let mut sequential = buf.clone();
        let start = std::time::Instant::now();
        prefix_sum_sequential(&mut sequential);
        let sequential_time = start.elapsed();

        let mut parallel = buf;
        let start = std::time::Instant::now();
        prefix_sum(&mut parallel);
        let parallel_time = start.elapsed();

        assert_eq!(parallel, sequential);
        assert!(
            parallel_time < sequential_time,
            "parallel {parallel_time:?} vs sequential {sequential_time:?}"
        );
    }
}
