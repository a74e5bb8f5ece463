use crate::util::constants::*;

/* Alignment */

pub const fn raw_align_up(val: usize, align: usize) -> usize {
    // See https://github.com/rust-lang/rust/blob/master/library/core/src/alloc/layout.rs
    val.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
}

pub const fn raw_align_down(val: usize, align: usize) -> usize {
    val & !align.wrapping_sub(1)
}

pub const fn raw_is_aligned(val: usize, align: usize) -> bool {
    val & align.wrapping_sub(1) == 0
}

/* Conversion */

pub const fn words_to_bytes(words: usize) -> usize {
    words << LOG_BYTES_IN_WORD
}

pub const fn bytes_to_words_up(bytes: usize) -> usize {
    (bytes + BYTES_IN_WORD - 1) >> LOG_BYTES_IN_WORD
}

/// Like [`bytes_to_words_up`], but reports overflow instead of wrapping.
/// Oversized requests from the mutator surface as a recoverable
/// out-of-memory condition, so size arithmetic must not panic.
pub fn checked_bytes_to_words_up(bytes: usize) -> Option<usize> {
    Some(bytes.checked_add(BYTES_IN_WORD - 1)? >> LOG_BYTES_IN_WORD)
}

/// The number of cards needed to cover `length` items, `card_size` items per
/// card.
pub const fn cards_for_length(length: usize, card_size: usize) -> usize {
    (length + card_size - 1) / card_size
}

/// The number of prefix words holding one card byte per card.
pub const fn card_words_for_cards(cards: usize) -> usize {
    (cards + BYTES_IN_WORD - 1) >> LOG_BYTES_IN_WORD
}
