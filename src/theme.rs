//! Semantic colors for terminal output.
//!
//! Colors are disabled with `--no-color` or the `NO_COLOR` environment
//! variable; every style then returns the plain text.

use owo_colors::OwoColorize;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

static COLORS_ENABLED: AtomicBool = AtomicBool::new(true);

/// Disable all colors globally. Call early in `main()`.
pub fn disable_colors() {
    COLORS_ENABLED.store(false, Ordering::Relaxed);
    owo_colors::set_override(false);
}

pub fn colors_enabled() -> bool {
    COLORS_ENABLED.load(Ordering::Relaxed)
}

fn paint(text: String, enabled: bool, style: impl Fn(&String) -> String) -> String {
    if enabled { style(&text) } else { text }
}

/// Semantic styles, all respecting [`disable_colors`].
pub trait Themed: Display {
    /// Player UUIDs and worker names (cyan).
    fn player(&self) -> String {
        paint(self.to_string(), colors_enabled(), |t| t.cyan().to_string())
    }

    /// Revenue amounts (green).
    fn amount(&self) -> String {
        paint(self.to_string(), colors_enabled(), |t| t.green().to_string())
    }

    /// Dates and secondary text (dimmed).
    fn muted(&self) -> String {
        paint(self.to_string(), colors_enabled(), |t| t.dimmed().to_string())
    }

    /// Field names (yellow).
    fn label(&self) -> String {
        paint(self.to_string(), colors_enabled(), |t| t.yellow().to_string())
    }

    fn warning(&self) -> String {
        paint(self.to_string(), colors_enabled(), |t| t.yellow().to_string())
    }

    /// Red + bold.
    fn error_style(&self) -> String {
        paint(self.to_string(), colors_enabled(), |t| t.red().bold().to_string())
    }

    /// Green + bold.
    fn success(&self) -> String {
        paint(self.to_string(), colors_enabled(), |t| t.green().bold().to_string())
    }

    /// Bold + underline.
    fn section_header(&self) -> String {
        paint(self.to_string(), colors_enabled(), |t| t.bold().underline().to_string())
    }
}

impl<T: Display + ?Sized> Themed for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paint_enabled() {
        let colored = paint("test".to_string(), true, |t| t.cyan().to_string());
        assert!(colored.contains("\x1b["), "Expected ANSI escape codes");
        assert!(colored.contains("test"));
    }

    #[test]
    fn test_paint_disabled() {
        assert_eq!(paint("test".to_string(), false, |t| t.cyan().to_string()), "test");
        assert_eq!(paint(42.to_string(), false, |t| t.green().bold().to_string()), "42");
    }
}
