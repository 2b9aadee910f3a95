//! 63-bit Z-order keys and the bit helpers the octree builder runs on.

use crate::bbox::Aabb;
use crate::vector::Vec3;

/// Octree levels a key can resolve: 21 bits per axis, 3 bits per level.
pub const MAX_DEPTH: i32 = 21;

const AXIS_BITS: u32 = 21;
const AXIS_MAX: u64 = (1 << AXIS_BITS) - 1;

/// Interleave a 21-bit value with two zero bits between consecutive
/// source bits, `xyz -> --x--y--z`, using the usual five masked
/// shift-ors.
#[inline]
pub fn spread(x: u64) -> u64 {
    let mut x = x & AXIS_MAX;
    x = (x | (x << 32)) & 0x1f00000000ffff;
    x = (x | (x << 16)) & 0x1f0000ff0000ff;
    x = (x | (x << 8)) & 0x100f00f00f00f00f;
    x = (x | (x << 4)) & 0x10c30c30c30c30c3;
    x = (x | (x << 2)) & 0x1249249249249249;
    x
}

fn quantize(scaled: f64) -> u64 {
    // NaN fails both comparisons and lands on the low boundary
    if scaled >= AXIS_MAX as f64 {
        AXIS_MAX
    } else if scaled > 0.0 {
        scaled as u64
    } else {
        0
    }
}

/// Z-order key of a position relative to `bound`: each axis is quantized
/// linearly into `[0, 2^21 - 1]`, clamping at the boundary, and the
/// three results are interleaved with x in the highest bit positions.
pub fn encode(position: Vec3, bound: &Aabb) -> u64 {
    let scaled = bound.offset(position) * AXIS_MAX as f64;
    (spread(quantize(scaled.0)) << 2)
        | (spread(quantize(scaled.1)) << 1)
        | spread(quantize(scaled.2))
}

/// Propagate the highest set bit into every lower position.
#[inline]
pub fn smear(mut x: u64) -> u64 {
    x |= x >> 1;
    x |= x >> 2;
    x |= x >> 4;
    x |= x >> 8;
    x |= x >> 16;
    x |= x >> 32;
    x
}

#[inline]
pub fn popcount(x: u64) -> u32 {
    x.count_ones()
}

/// Leading-zero count derived from smear + popcount.
#[inline]
pub fn count_leading_zeros(x: u64) -> u32 {
    64 - popcount(smear(x))
}

/// The 0/1 digit of `x` at bit position `power`.
#[inline]
pub fn digit(power: u32, x: u64) -> u64 {
    assert!(power < 64, "bit position out of range: {power}");
    (x >> power) & 1
}

/// Length of the common bit prefix of `codes[i]` and `codes[j]`, or -1
/// when either index falls outside the array.
pub fn sigma(codes: &[u64], i: i64, j: i64) -> i32 {
    let len = codes.len() as i64;
    if i < 0 || i >= len || j < 0 || j >= len {
        return -1;
    }
    count_leading_zeros(codes[i as usize] ^ codes[j as usize]) as i32
}

/// Number of complete octree levels shared by two keys (one level is
/// three bits, preceded by the dead top bit); -1 out of range.
pub fn slotted_sigma(codes: &[u64], i: i64, j: i64) -> i32 {
    let s = sigma(codes, i, j);
    if s <= 0 {
        -1
    } else {
        (s - 1) / 3
    }
}

#[cfg(test)]
mod morton_test {
    use super::*;
    use crate::vector::vec3;
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg64;

    fn unit_bound() -> Aabb {
        Aabb::new(vec3(0.0, 0.0, 0.0), vec3(1.0, 1.0, 1.0))
    }

    #[test]
    fn spread_places_bits_three_apart() {
        let mut rng = Pcg64::seed_from_u64(21);
        for _ in 0..1000 {
            let x: u64 = rng.gen_range(0..=AXIS_MAX);
            let s = spread(x);
            // only every third bit may be set
            assert_eq!(s & !0x1249249249249249, 0);
            // and each source bit survives at three times its position
            for bit in 0..AXIS_BITS {
                assert_eq!((s >> (3 * bit)) & 1, (x >> bit) & 1);
            }
        }
    }

    #[test]
    fn smear_popcount_agrees_with_leading_zeros() {
        let mut rng = Pcg64::seed_from_u64(64);
        for _ in 0..10_000 {
            let u: u64 = rng.gen();
            assert_eq!(popcount(smear(u)), 64 - u.leading_zeros());
            assert_eq!(count_leading_zeros(u), u.leading_zeros());
        }
        assert_eq!(count_leading_zeros(0), 64);
        assert_eq!(count_leading_zeros(u64::MAX), 0);
    }

    #[test]
    fn keys_are_monotone_under_componentwise_dominance() {
        let bound = unit_bound();
        let mut rng = Pcg64::seed_from_u64(1);
        for _ in 0..10_000 {
            let a = vec3(rng.gen(), rng.gen(), rng.gen());
            let b = vec3(rng.gen(), rng.gen(), rng.gen());
            let lower = a.min_by_component(b);
            let upper = a.max_by_component(b);
            assert!(encode(lower, &bound) <= encode(upper, &bound));
        }
    }

    #[test]
    fn encode_uses_63_bits_with_x_highest() {
        let bound = unit_bound();
        assert_eq!(encode(vec3(0.0, 0.0, 0.0), &bound), 0);
        let x_only = encode(vec3(1.0, 0.0, 0.0), &bound);
        let y_only = encode(vec3(0.0, 1.0, 0.0), &bound);
        let z_only = encode(vec3(0.0, 0.0, 1.0), &bound);
        assert!(x_only > y_only && y_only > z_only);
        // the full corner fills 63 bits, leaving the top bit clear
        let corner = encode(vec3(1.0, 1.0, 1.0), &bound);
        assert_eq!(corner, (1 << 63) - 1);
    }

    #[test]
    fn encode_clamps_out_of_bound_positions() {
        let bound = unit_bound();
        assert_eq!(
            encode(vec3(2.0, -3.0, 0.5), &bound),
            encode(vec3(1.0, 0.0, 0.5), &bound)
        );
    }

    #[test]
    fn encode_on_a_point_bound_is_zero() {
        let bound = Aabb::new(vec3(0.25, 0.25, 0.25), vec3(0.0, 0.0, 0.0));
        assert_eq!(encode(vec3(0.25, 0.25, 0.25), &bound), 0);
    }

    #[test]
    fn sigma_bounds_checks_and_measures_prefixes() {
        let codes = [0u64, 1 << 62, 1 << 62 | 1];
        assert_eq!(sigma(&codes, -1, 0), -1);
        assert_eq!(sigma(&codes, 0, 3), -1);
        assert_eq!(sigma(&codes, 0, 0), 64);
        assert_eq!(sigma(&codes, 0, 1), 1);
        assert_eq!(sigma(&codes, 1, 2), 63);
    }

    #[test]
    fn slotted_sigma_counts_whole_levels() {
        let codes = [0u64, 1 << 62, 1 << 59, 1, 0];
        // divergence inside the first level
        assert_eq!(slotted_sigma(&codes, 0, 1), 0);
        // first level shared, divergence inside the second
        assert_eq!(slotted_sigma(&codes, 0, 2), 1);
        // only the last level differs
        assert_eq!(slotted_sigma(&codes, 0, 3), 20);
        // identical keys share the full depth
        assert_eq!(slotted_sigma(&codes, 0, 4), MAX_DEPTH);
        // out of range
        assert_eq!(slotted_sigma(&codes, -1, 0), -1);
        assert_eq!(slotted_sigma(&codes, 4, 5), -1);
    }

    #[test]
    #[should_panic(expected = "bit position out of range")]
    fn digit_rejects_large_powers() {
        digit(64, 1);
    }
}
