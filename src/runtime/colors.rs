//! ANSI color codes for terminal output, honoring the NO_COLOR convention.

use std::env;

pub struct Colors {
    pub red: &'static str,
    pub reset: &'static str,
}

impl Colors {
    pub fn new() -> Self {
        if env::var("NO_COLOR").is_ok() {
            Self::no_color()
        } else {
            Self::with_color()
        }
    }

    pub fn with_color() -> Self {
        Self {
            red: "\u{1b}[31m",
            reset: "\u{1b}[0m",
        }
    }

    pub fn no_color() -> Self {
        Self { red: "", reset: "" }
    }
}

impl Default for Colors {
    fn default() -> Self {
        Self::new()
    }
}
