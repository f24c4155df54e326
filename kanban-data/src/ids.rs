//! Identifier generation for tags and purchase orders.

use rand::Rng;

pub const TAG_ID_LEN: usize = 24;
pub const ORDER_NO_LEN: usize = 10;

const HEX_UPPER: &[u8] = b"0123456789ABCDEF";
const ALNUM_UPPER: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn draw(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

/// A random 24-character uppercase hexadecimal tag id.
pub fn random_tag_id() -> String {
    draw(HEX_UPPER, TAG_ID_LEN)
}

/// A random 10-character uppercase alphanumeric order number.
pub fn random_order_no() -> String {
    draw(ALNUM_UPPER, ORDER_NO_LEN)
}
