//! Collector tuning knobs.
//!
//! Options are plain struct fields with defaults, overridable before the
//! heap is built either programmatically through
//! [`set_from_str`](Options::set_from_str) or from `MINIGEN_*` environment
//! variables (e.g. `MINIGEN_NURSERY_SIZE=1048576`). Invalid values are
//! rejected with a warning and the default stands.

use crate::util::constants::{BYTES_IN_KBYTE, BYTES_IN_MBYTE};
use std::str::FromStr;

/// What to write over reclaimed nursery memory at the end of a minor
/// collection. `Zap` fills dead ranges with a recognizable pattern so that
/// use-after-collect bugs surface as wild values instead of silent reuse.
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum_macros::EnumString)]
#[strum(ascii_case_insensitive)]
pub enum FillPattern {
    Off,
    Zap,
}

/// The default nursery byte size.
pub const DEFAULT_NURSERY_SIZE: usize = 4 * BYTES_IN_MBYTE;
/// The default major-collection step budget, in bytes traced or swept.
pub const DEFAULT_INCREMENT_STEP: usize = 256 * BYTES_IN_KBYTE;
/// The default old-space size below which no major collection triggers.
pub const DEFAULT_MIN_HEAP_SIZE: usize = 8 * BYTES_IN_MBYTE;

fn always_valid<T>(_: &T) -> bool {
    true
}

macro_rules! options {
    ($($(#[$outer:meta])*$name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($(#[$outer])*$name: $type[$validator] = $default),*);
    ];
    ($($(#[$outer:meta])*$name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        /// The collector options. Build one with `Options::default()`
        /// (which reads `MINIGEN_*` env vars) and hand it to
        /// [`GcBuilder`](crate::GcBuilder).
        #[derive(Clone)]
        pub struct Options {
            $($(#[$outer])*pub $name: $type),*
        }
        impl Options {
            /// Sets an option from a string key/value pair. Returns true if
            /// the key was known, the value parsed, and the validator
            /// accepted it.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            self.$name = val.clone();
                        } else {
                            eprintln!("Warn: unable to set {}={:?}. Invalid value. Default value will be used.", s, val);
                        }
                        is_valid
                    } else {
                        eprintln!("Warn: unable to set {}={:?}. Cant parse value. Default value will be used.", s, val);
                        false
                    },)*
                    _ => panic!("Invalid Options key: {}", s)
                }
            }
        }
        impl Default for Options {
            fn default() -> Self {
                let mut options = Options {
                    $($name: $default),*
                };

                // Env vars with the MINIGEN_ prefix that match an option
                // name (such as MINIGEN_NURSERY_SIZE) override the default.
                const PREFIX: &str = "MINIGEN_";
                for (key, val) in std::env::vars() {
                    if let Some(rest_of_key) = key.strip_prefix(PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { options.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
                options
            }
        }
    ]
}

options! {
    /// The byte size of the nursery.
    nursery_size:            usize       [|v: &usize| *v >= 4096] = DEFAULT_NURSERY_SIZE,
    /// How many bytes one major-collection step may trace or sweep before
    /// yielding back to the mutator.
    increment_step:          usize       [|v: &usize| *v >= 4096] = DEFAULT_INCREMENT_STEP,
    /// Growth factor applied to the live old-space size when computing the
    /// next major-collection threshold.
    growth:                  f64         [|v: &f64| *v > 1.0] = 1.82,
    /// Upper bound on how much the major threshold may grow in one cycle.
    max_delta:               usize       [|v: &usize| *v > 0] = 32 * BYTES_IN_MBYTE,
    /// Hard ceiling on old-space bytes. Zero means unbounded.
    max_heap_size:           usize       [always_valid] = 0,
    /// Old-space size below which no major collection triggers.
    min_heap_size:           usize       [|v: &usize| *v > 0] = DEFAULT_MIN_HEAP_SIZE,
    /// How many objects may be pinned at once.
    max_pinned:              usize       [always_valid] = 64,
    /// Requests up to this many bytes go to the size-classed arena; larger
    /// ones get their own raw allocation.
    small_request_threshold: usize       [|v: &usize| *v >= 32 && *v <= 32768] = 256,
    /// Array items covered by one card byte. Must be a power of two.
    card_size:               usize       [|v: &usize| v.is_power_of_two()] = 128,
    /// Debug fill for reclaimed nursery memory.
    fill_pattern:            FillPattern [always_valid] = FillPattern::Off,
}

impl FromStr for Options {
    type Err = String;

    /// Parses a comma-separated `key=value` list, e.g.
    /// `"nursery_size=65536,fill_pattern=zap"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut options = Options::default();
        for pair in s.split(',').filter(|p| !p.is_empty()) {
            let (key, val) = pair
                .split_once('=')
                .ok_or_else(|| format!("Expected key=value, got {:?}", pair))?;
            if !options.set_from_str(key.trim(), val.trim()) {
                return Err(format!("Invalid option pair {:?}", pair));
            }
        }
        Ok(options)
    }
}
