//! Word- and heap-layout constants.

#[cfg(not(target_pointer_width = "64"))]
compile_error!("minigen only supports 64-bit targets");

/// log2 of the number of bits in a byte
pub const LOG_BITS_IN_BYTE: u8 = 3;
/// The number of bits in a byte
pub const BITS_IN_BYTE: usize = 1 << LOG_BITS_IN_BYTE;

/// log2 of the number of bytes in a kilobyte
pub const LOG_BYTES_IN_KBYTE: u8 = 10;
/// The number of bytes in a kilobyte
pub const BYTES_IN_KBYTE: usize = 1 << LOG_BYTES_IN_KBYTE;

/// log2 of the number of bytes in a megabyte
pub const LOG_BYTES_IN_MBYTE: u8 = 20;
/// The number of bytes in a megabyte
pub const BYTES_IN_MBYTE: usize = 1 << LOG_BYTES_IN_MBYTE;

/// log2 of the number of bytes in a word
pub const LOG_BYTES_IN_WORD: u8 = 3;
/// The number of bytes in a word
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;

/// log2 of the number of bytes in an arena page
pub const LOG_BYTES_IN_PAGE: u8 = 12;
/// The number of bytes in an arena page
pub const BYTES_IN_PAGE: usize = 1 << LOG_BYTES_IN_PAGE;
/// The number of words in an arena page
pub const WORDS_IN_PAGE: usize = BYTES_IN_PAGE >> LOG_BYTES_IN_WORD;

/// log2 of the maximum byte extent of a single segment. The high bits of an
/// [`Address`](crate::util::Address) select the segment, the low bits are a
/// byte offset into it.
pub const LOG_SEGMENT_BYTES: u8 = 32;
/// Mask extracting the byte offset of an address within its segment.
pub const SEGMENT_OFFSET_MASK: usize = (1 << LOG_SEGMENT_BYTES) - 1;
/// The word capacity of a maximally sized segment. No allocation, card
/// prefix included, may reach it: a larger offset would spill into the
/// segment-index bits of an address.
pub const SEGMENT_WORDS: usize = 1 << (LOG_SEGMENT_BYTES - LOG_BYTES_IN_WORD);

/// The number of words in an object header: one type word and two flag words.
pub const HEADER_WORDS: usize = 3;
/// The number of flag words in an object header.
pub const FLAG_WORDS: usize = 2;

/// Reserved type-word value meaning "this object has been forwarded"; the
/// word after the type word holds the forwarding address.
pub const FORWARDED_TAG: usize = usize::MAX;
/// Reserved type-word value marking a free arena cell; the word after it
/// threads the intrusive free list.
pub const CELL_FREE_TAG: usize = usize::MAX - 1;
/// Largest raw type id a registry may hand out.
pub const MAX_TYPE_ID: usize = u32::MAX as usize;

/// The minimal arena cell size in words. A free cell needs two words for the
/// free tag and the free-list link, which every object can spare.
pub const MIN_CELL_WORDS: usize = HEADER_WORDS + 1;

/// Fill value written over reclaimed nursery memory when the `Zap` fill
/// pattern is selected.
pub const ZAP_FILL_WORD: usize = 0xDDDD_DDDD_DDDD_DDDD;

/// An array needs at least this many cards before card marking pays for the
/// prefix bytes it costs.
pub const MIN_CARDS: usize = 2;
