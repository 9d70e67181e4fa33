//! Structural checks for EDIFACT interchanges.
//!
//! The checks are deliberately shallow: an interchange must open with a
//! `UNA` or `UNB` segment and carry a `UNH` message header and a `UNT`
//! message trailer. The count declared in `UNT` is compared with the number
//! of lines from `UNH` through `UNT`, where any of [`LINE_BREAKS`] (or
//! `\r\n`) ends a line; a deviation of more than
//! [`SEGMENT_COUNT_TOLERANCE`] is reported in the note but never rejects the
//! document.

use std::fmt;

use thiserror::Error;

/// Maximum tolerated difference between declared and counted segments.
pub const SEGMENT_COUNT_TOLERANCE: u64 = 2;

/// Characters that end a line when counting segments.
pub const LINE_BREAKS: [char; 10] = [
    '\n', '\r', '\x0b', '\x0c', '\x1c', '\x1d', '\x1e', '\u{85}', '\u{2028}', '\u{2029}',
];

const HEADER_MARKERS: [&str; 2] = ["UNA", "UNB"];
const MESSAGE_HEADER: &str = "UNH+";
const MESSAGE_TRAILER: &str = "UNT+";

/// Reasons a document is structurally unusable.
///
/// The display strings double as the notes recorded in sidecar metadata.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// The payload does not start with a service string advice or
    /// interchange header.
    #[error("missing_UNA_or_UNB")]
    MissingInterchangeHeader,
    /// No `UNH` message header segment.
    #[error("missing_UNH")]
    MissingMessageHeader,
    /// No `UNT` message trailer segment.
    #[error("missing_UNT")]
    MissingMessageTrailer,
}

/// Note attached to a document that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationNote {
    /// Nothing worth reporting.
    Ok,
    /// The trailer's declared count is off by more than the tolerance.
    SegmentCountMismatch {
        /// Count declared in the `UNT` segment.
        reported: i64,
        /// Lines counted from `UNH` through `UNT`.
        actual: i64,
    },
}

impl fmt::Display for ValidationNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::SegmentCountMismatch { reported, actual } => {
                write!(f, "segment_count_mismatch_reported={reported}_actual={actual}")
            }
        }
    }
}

/// Validate the structure of an EDIFACT payload.
///
/// # Errors
///
/// Returns a [`ValidationError`] naming the first missing structural marker.
///
/// # Examples
///
/// ```
/// use edictl::validate::{ValidationNote, validate};
///
/// let doc = b"UNB+UNOA:1+S+R'\nUNH+1+ORDERS'\nBGM+220'\nUNT+3+1'\nUNZ+1+1'\n";
/// assert_eq!(validate(doc), Ok(ValidationNote::Ok));
/// ```
pub fn validate(payload: &[u8]) -> Result<ValidationNote, ValidationError> {
    let text = String::from_utf8_lossy(payload);
    if !HEADER_MARKERS.iter().any(|marker| text.starts_with(marker)) {
        return Err(ValidationError::MissingInterchangeHeader);
    }
    if !text.contains(MESSAGE_HEADER) {
        return Err(ValidationError::MissingMessageHeader);
    }
    if !text.contains(MESSAGE_TRAILER) {
        return Err(ValidationError::MissingMessageTrailer);
    }
    Ok(segment_count_note(&text))
}

/// Compare the `UNT` declared count with the lines between `UNH` and `UNT`.
///
/// Anything that cannot be located or parsed leaves the note at `ok`.
fn segment_count_note(text: &str) -> ValidationNote {
    let lines: Vec<&str> = split_lines(text).collect();
    let Some(unh) = lines.iter().position(|l| l.starts_with(MESSAGE_HEADER)) else {
        return ValidationNote::Ok;
    };
    let Some(offset) = lines
        .iter()
        .skip(unh)
        .position(|l| l.starts_with(MESSAGE_TRAILER))
    else {
        return ValidationNote::Ok;
    };
    let Ok(actual) = i64::try_from(offset + 1) else {
        return ValidationNote::Ok;
    };
    let Some(reported) = lines
        .get(unh + offset)
        .and_then(|trailer| trailer.split('+').nth(1))
        .and_then(|count| count.trim().parse::<i64>().ok())
    else {
        return ValidationNote::Ok;
    };
    if reported.abs_diff(actual) > SEGMENT_COUNT_TOLERANCE {
        ValidationNote::SegmentCountMismatch { reported, actual }
    } else {
        ValidationNote::Ok
    }
}

fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split("\r\n").flat_map(|chunk| chunk.split(LINE_BREAKS))
}
