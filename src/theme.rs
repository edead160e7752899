//! Terminal styling helpers
//!
//! Stateless wrappers around `colored` so every command prints with the same
//! palette. Colors are dropped automatically when stdout is not a terminal or
//! `NO_COLOR` is set.

use colored::{ColoredString, Colorize};

pub struct Theme;

impl Theme {
    pub fn header(text: &str) -> ColoredString {
        text.bold()
    }

    pub fn primary(text: &str) -> ColoredString {
        text.normal()
    }

    pub fn secondary(text: &str) -> ColoredString {
        text.dimmed()
    }

    pub fn muted(text: &str) -> ColoredString {
        text.dimmed()
    }

    pub fn value(text: &str) -> ColoredString {
        text.cyan()
    }

    pub fn size(text: &str) -> ColoredString {
        text.cyan().bold()
    }

    pub fn command(text: &str) -> ColoredString {
        text.yellow()
    }

    pub fn success(text: &str) -> ColoredString {
        text.green()
    }

    pub fn warning(text: &str) -> ColoredString {
        text.yellow().bold()
    }

    pub fn error(text: &str) -> ColoredString {
        text.red().bold()
    }

    /// Signature name of a detected threat
    pub fn threat(text: &str) -> ColoredString {
        text.red()
    }

    pub fn divider(width: usize) -> ColoredString {
        "─".repeat(width).dimmed()
    }

    pub fn divider_bold(width: usize) -> ColoredString {
        "━".repeat(width).normal()
    }
}
