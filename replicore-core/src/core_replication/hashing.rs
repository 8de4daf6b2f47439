/*
    hashing.rs - Fingerprint hashing shared by every node

    XXHash32 / XXHash64 and the 32/64-bit hash combiners. The outputs must
    be bit-identical across nodes, so the constants and the wrap-on-overflow
    arithmetic are fixed. Input is read through `chunks_exact` and
    little-endian decoding, never through raw pointers.

    Used for:
    - Picking the lock stripe of a document id
    - Change vector and conflict set fingerprints

    `xxhash32`, `combine32` and `combine_i32` have no caller here. They stay
    public so peers computing 32-bit fingerprints get the same values.
*/

const PRIME32_1: u32 = 2_654_435_761;
const PRIME32_2: u32 = 2_246_822_519;
const PRIME32_3: u32 = 3_266_489_917;
const PRIME32_4: u32 = 668_265_263;
const PRIME32_5: u32 = 374_761_393;

const PRIME64_1: u64 = 11_400_714_785_074_694_791;
const PRIME64_2: u64 = 14_029_467_366_897_019_727;
const PRIME64_3: u64 = 1_609_587_929_392_839_161;
const PRIME64_4: u64 = 9_650_029_242_287_828_579;
const PRIME64_5: u64 = 2_870_177_450_012_600_261;

/// Multiplier of the 128-to-64 bit combiner.
const K_MUL: u64 = 0x9ddf_ea08_eb38_2d69;

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_u64(bytes: &[u8]) -> u64 {
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

#[inline]
fn round32(acc: u32, lane: u32) -> u32 {
    acc.wrapping_add(lane.wrapping_mul(PRIME32_2))
        .rotate_left(13)
        .wrapping_mul(PRIME32_1)
}

#[inline]
fn round64(acc: u64, lane: u64) -> u64 {
    acc.wrapping_add(lane.wrapping_mul(PRIME64_2))
        .rotate_left(31)
        .wrapping_mul(PRIME64_1)
}

#[inline]
fn merge_round64(acc: u64, val: u64) -> u64 {
    let val = round64(0, val);
    (acc ^ val).wrapping_mul(PRIME64_1).wrapping_add(PRIME64_4)
}

/// 32-bit XXHash of `input`.
///
/// The 32 and 64 bit variants are different algorithms; their outputs for
/// the same input are unrelated.
pub fn xxhash32(input: &[u8], seed: u32) -> u32 {
    let len = input.len();
    let mut tail = input;

    let mut h32 = if len >= 16 {
        let mut v1 = seed.wrapping_add(PRIME32_1).wrapping_add(PRIME32_2);
        let mut v2 = seed.wrapping_add(PRIME32_2);
        let mut v3 = seed;
        let mut v4 = seed.wrapping_sub(PRIME32_1);

        let mut stripes = input.chunks_exact(16);
        for stripe in &mut stripes {
            v1 = round32(v1, read_u32(&stripe[0..4]));
            v2 = round32(v2, read_u32(&stripe[4..8]));
            v3 = round32(v3, read_u32(&stripe[8..12]));
            v4 = round32(v4, read_u32(&stripe[12..16]));
        }
        tail = stripes.remainder();

        v1.rotate_left(1)
            .wrapping_add(v2.rotate_left(7))
            .wrapping_add(v3.rotate_left(12))
            .wrapping_add(v4.rotate_left(18))
    } else {
        seed.wrapping_add(PRIME32_5)
    };

    // Only the low 32 bits of the length participate.
    h32 = h32.wrapping_add(len as u32);

    let mut words = tail.chunks_exact(4);
    for word in &mut words {
        h32 = h32.wrapping_add(read_u32(word).wrapping_mul(PRIME32_3));
        h32 = h32.rotate_left(17).wrapping_mul(PRIME32_4);
    }

    for &byte in words.remainder() {
        h32 = h32.wrapping_add(u32::from(byte).wrapping_mul(PRIME32_5));
        h32 = h32.rotate_left(11).wrapping_mul(PRIME32_1);
    }

    h32 ^= h32 >> 15;
    h32 = h32.wrapping_mul(PRIME32_2);
    h32 ^= h32 >> 13;
    h32 = h32.wrapping_mul(PRIME32_3);
    h32 ^= h32 >> 16;
    h32
}

/// 64-bit XXHash of `input`.
pub fn xxhash64(input: &[u8], seed: u64) -> u64 {
    let len = input.len();
    let mut tail = input;

    let mut h64 = if len >= 32 {
        let mut v1 = seed.wrapping_add(PRIME64_1).wrapping_add(PRIME64_2);
        let mut v2 = seed.wrapping_add(PRIME64_2);
        let mut v3 = seed;
        let mut v4 = seed.wrapping_sub(PRIME64_1);

        let mut stripes = input.chunks_exact(32);
        for stripe in &mut stripes {
            v1 = round64(v1, read_u64(&stripe[0..8]));
            v2 = round64(v2, read_u64(&stripe[8..16]));
            v3 = round64(v3, read_u64(&stripe[16..24]));
            v4 = round64(v4, read_u64(&stripe[24..32]));
        }
        tail = stripes.remainder();

        let mut h = v1
            .rotate_left(1)
            .wrapping_add(v2.rotate_left(7))
            .wrapping_add(v3.rotate_left(12))
            .wrapping_add(v4.rotate_left(18));
        h = merge_round64(h, v1);
        h = merge_round64(h, v2);
        h = merge_round64(h, v3);
        merge_round64(h, v4)
    } else {
        seed.wrapping_add(PRIME64_5)
    };

    h64 = h64.wrapping_add(len as u64);

    let mut words = tail.chunks_exact(8);
    for word in &mut words {
        h64 ^= round64(0, read_u64(word));
        h64 = h64
            .rotate_left(27)
            .wrapping_mul(PRIME64_1)
            .wrapping_add(PRIME64_4);
    }

    let mut rest = words.remainder();
    if rest.len() >= 4 {
        h64 ^= u64::from(read_u32(&rest[0..4])).wrapping_mul(PRIME64_1);
        h64 = h64
            .rotate_left(23)
            .wrapping_mul(PRIME64_2)
            .wrapping_add(PRIME64_3);
        rest = &rest[4..];
    }

    for &byte in rest {
        h64 ^= u64::from(byte).wrapping_mul(PRIME64_5);
        h64 = h64.rotate_left(11).wrapping_mul(PRIME64_1);
    }

    h64 ^= h64 >> 33;
    h64 = h64.wrapping_mul(PRIME64_2);
    h64 ^= h64 >> 29;
    h64 = h64.wrapping_mul(PRIME64_3);
    h64 ^= h64 >> 32;
    h64
}

/// XXHash64 of the UTF-8 bytes of `value`.
pub fn xxhash64_str(value: &str, seed: u64) -> u64 {
    xxhash64(value.as_bytes(), seed)
}

fn mix_pair(key: u64) -> u64 {
    let mut key = (!key).wrapping_add(key << 18);
    key ^= key >> 31;
    key = key.wrapping_mul(21);
    key ^= key >> 11;
    key = key.wrapping_add(key << 6);
    key ^ (key >> 22)
}

/// Combine two 32-bit hashes (operands are zero-extended).
pub fn combine32(x: u32, y: u32) -> u32 {
    let key = (u64::from(x) << 32) | u64::from(y);
    mix_pair(key) as u32
}

/// Combine two signed 32-bit hashes.
///
/// Operands are sign-extended to 64 bits before packing, so a negative `y`
/// floods the high half. This differs from [`combine32`] for negative input
/// and must stay that way to match fingerprints computed elsewhere.
pub fn combine_i32(x: i32, y: i32) -> i32 {
    let ex = x as i64 as u64;
    let ey = y as i64 as u64;
    mix_pair((ex << 32) | ey) as i32
}

/// Combine two 64-bit hashes (the CityHash 128-to-64 reduction).
pub fn combine64(x: u64, y: u64) -> u64 {
    let mut a = (y ^ x).wrapping_mul(K_MUL);
    a ^= a >> 47;
    let mut b = (x ^ a).wrapping_mul(K_MUL);
    b ^= b >> 47;
    b.wrapping_mul(K_MUL)
}
