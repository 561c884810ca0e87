use ratatui::style::{Color, Modifier, Style};

use crate::config::ThemeName;
use crate::message::Sender;

/// Colour palette for the chat view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    pub background: Color,
    pub panel: Color,
    pub title: Color,
    pub muted: Color,
    pub user_bg: Color,
    pub user_fg: Color,
    pub assistant_bg: Color,
    pub assistant_fg: Color,
    pub error_bg: Color,
    pub error_fg: Color,
    pub border: Color,
    pub border_focus: Color,
    pub input_fg: Color,
}

impl Theme {
    pub fn named(name: ThemeName) -> Self {
        match name {
            ThemeName::Inline => Self::inline(),
            ThemeName::Styled => Self::styled(),
        }
    }

    /// Plain terminal colours, readable on light and dark terminals
    pub fn inline() -> Self {
        Self {
            background: Color::Reset,
            panel: Color::Reset,
            title: Color::Cyan,
            muted: Color::DarkGray,
            user_bg: Color::Reset,
            user_fg: Color::Cyan,
            assistant_bg: Color::Reset,
            assistant_fg: Color::Reset,
            error_bg: Color::Reset,
            error_fg: Color::Red,
            border: Color::DarkGray,
            border_focus: Color::Yellow,
            input_fg: Color::Cyan,
        }
    }

    /// Warm orange palette
    pub fn styled() -> Self {
        Self {
            background: Color::Rgb(0x7c, 0x2d, 0x12),
            panel: Color::Rgb(0x9a, 0x34, 0x12),
            title: Color::Rgb(0xff, 0xed, 0xd5),
            muted: Color::Rgb(0xfe, 0xd7, 0xaa),
            user_bg: Color::Rgb(0xea, 0x58, 0x0c),
            user_fg: Color::White,
            assistant_bg: Color::Rgb(0xc2, 0x41, 0x0c),
            assistant_fg: Color::Rgb(0xff, 0xed, 0xd5),
            error_bg: Color::Rgb(0xb9, 0x1c, 0x1c),
            error_fg: Color::Rgb(0xff, 0xed, 0xd5),
            border: Color::Rgb(0xea, 0x58, 0x0c),
            border_focus: Color::Rgb(0xf9, 0x73, 0x16),
            input_fg: Color::Rgb(0xff, 0xed, 0xd5),
        }
    }

    pub fn bubble_style(&self, sender: Sender) -> Style {
        match sender {
            Sender::User => Style::default().bg(self.user_bg).fg(self.user_fg),
            Sender::Error => Style::default().bg(self.error_bg).fg(self.error_fg),
            Sender::Assistant | Sender::Pending => {
                Style::default().bg(self.assistant_bg).fg(self.assistant_fg)
            }
        }
    }

    pub fn label_style(&self, sender: Sender) -> Style {
        let fg = match sender {
            Sender::User => self.user_fg,
            Sender::Error => self.error_fg,
            Sender::Assistant | Sender::Pending => Color::Yellow,
        };
        Style::default().fg(fg).add_modifier(Modifier::BOLD)
    }

    pub fn panel_style(&self) -> Style {
        Style::default().bg(self.panel)
    }
}
