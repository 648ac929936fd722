//! Utility functions for common operations.
//!
//! - **Input cleanup**: removing control characters XML 1.0 forbids before parsing
//! - **Display safety**: stripping terminal escapes from feed text and diagnostics
//! - **Text layout**: Unicode-aware width calculation and truncation for the CLI

mod text;

pub use text::{
    display_width, sanitize_xml_text, strip_control_chars, strip_invalid_xml_chars,
    truncate_to_width,
};
