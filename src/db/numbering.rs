//! Ticket number formatting.
//!
//! osTicket stores a number mask in `ost_config.ticket_number_format`. Date
//! tokens expand to the creation date, each run of `#` becomes the sequence
//! value zero-padded to the run's width, and `%SEQ` becomes the bare value.

use chrono::NaiveDate;

/// Mask used when `ost_config` has none.
pub const DEFAULT_NUMBER_FORMAT: &str = "######";

/// Expand `mask` for the given sequence value and date.
pub fn format_number(mask: &str, sequence: u64, date: NaiveDate) -> String {
    let expanded = mask
        .replace("%y", &date.format("%y").to_string())
        .replace("%Y", &date.format("%Y").to_string())
        .replace("%m", &date.format("%m").to_string())
        .replace("%d", &date.format("%d").to_string());

    let mut number = String::with_capacity(expanded.len());
    let mut chars = expanded.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '#' {
            number.push(c);
            continue;
        }
        let mut width = 1;
        while chars.next_if_eq(&'#').is_some() {
            width += 1;
        }
        number.push_str(&format!("{:0width$}", sequence, width = width));
    }

    number.replace("%SEQ", &sequence.to_string())
}
