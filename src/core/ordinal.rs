//! Ordinal Formatting
//!
//! English ordinals for finish positions: 1st, 2nd, 3rd, 4th, 11th, 21st.
//! Every place a position is shown goes through [`format_ordinal`] so the
//! finishing player and the standings list always agree.

/// Suffix for a 1-based position.
///
/// Values ending in 11, 12 or 13 (mod 100) take "th"; otherwise the
/// last digit picks "st", "nd", "rd" or "th".
pub fn ordinal_suffix(position: u32) -> &'static str {
    if (11..=13).contains(&(position % 100)) {
        return "th";
    }

    match position % 10 {
        1 => "st",
        2 => "nd",
        3 => "rd",
        _ => "th",
    }
}

/// Position with its suffix, e.g. `"22nd"`.
pub fn format_ordinal(position: u32) -> String {
    format!("{}{}", position, ordinal_suffix(position))
}

/// Message shown to a player when their own finish is confirmed.
pub fn finish_message(position: u32) -> String {
    format!("You finished {}!", format_ordinal(position))
}
