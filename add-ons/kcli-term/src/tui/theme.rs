//! TUI colour themes; cycled at runtime with `t`.

use ratatui::style::Color;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    pub name: &'static str,
    pub accent: Color,
    pub text: Color,
    pub dim: Color,
    pub warning: Color,
    pub critical: Color,
    pub selection: Color,
}

pub const THEMES: &[Theme] = &[
    Theme {
        name: "dark",
        accent: Color::Cyan,
        text: Color::White,
        dim: Color::DarkGray,
        warning: Color::Yellow,
        critical: Color::Red,
        selection: Color::Blue,
    },
    Theme {
        name: "light",
        accent: Color::Blue,
        text: Color::Black,
        dim: Color::Gray,
        warning: Color::LightYellow,
        critical: Color::LightRed,
        selection: Color::LightBlue,
    },
    Theme {
        name: "high-contrast",
        accent: Color::Magenta,
        text: Color::White,
        dim: Color::Gray,
        warning: Color::LightYellow,
        critical: Color::LightRed,
        selection: Color::Magenta,
    },
];

pub fn by_name(name: &str) -> usize {
    THEMES
        .iter()
        .position(|t| t.name == name)
        .unwrap_or(0)
}
