//! Comparison of membership identities across wire versions.
//!
//! Peers older than 1.1 append a 17-byte UUID and weight suffix to the
//! essential member data. When that suffix is all zeros it carries no
//! information, so an id with the suffix and the same id without it name the
//! same member.

use basalt_wire::LEGACY_MEMBER_DATA_LENGTH;

fn is_zero_padding(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| *b == 0)
}

/// Byte equality that tolerates an all-zero legacy suffix on either side.
pub fn equal_membership_ids(a: &[u8], b: &[u8]) -> bool {
    let (longer, shorter) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    match longer.len() - shorter.len() {
        0 => a == b,
        LEGACY_MEMBER_DATA_LENGTH => {
            longer[..shorter.len()] == *shorter && is_zero_padding(&longer[shorter.len()..])
        }
        _ => false,
    }
}

/// The id with every trailing all-zero legacy block removed.
pub fn strip_legacy_padding(bytes: &[u8]) -> &[u8] {
    let mut end = bytes.len();
    while end >= LEGACY_MEMBER_DATA_LENGTH
        && is_zero_padding(&bytes[end - LEGACY_MEMBER_DATA_LENGTH..end])
    {
        end -= LEGACY_MEMBER_DATA_LENGTH;
    }
    &bytes[..end]
}

/// Hash that agrees with [`equal_membership_ids`].
///
/// Trailing zero blocks are stripped before hashing, so the padded and
/// unpadded forms of one member always collide.
pub fn membership_id_hash(bytes: &[u8]) -> i32 {
    strip_legacy_padding(bytes)
        .iter()
        .fold(1i32, |h, b| h.wrapping_mul(31).wrapping_add(i32::from(*b as i8)))
}
