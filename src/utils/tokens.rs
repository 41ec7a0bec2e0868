// Rough token estimate for backends that report no usage

/// Approximates tokens as one per four characters, rounded up.
pub fn estimate(text: &str) -> u32 {
    from_chars(text.chars().count())
}

pub fn from_chars(chars: usize) -> u32 {
    chars.div_ceil(4) as u32
}
