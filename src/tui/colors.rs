//! Color constants for the terminal user interface.

use ratatui::style::Color;

use crate::fields::{Category, TaskState};

// Native Color::Blue is used for the New column

/// Used for In Progress
pub const GOLD: Color = Color::Rgb(255, 215, 0);
/// Used for Completed
pub const DARK_GREEN: Color = Color::Rgb(0, 80, 0);
/// Used for Blocked
pub const DARK_RED: Color = Color::Rgb(114, 0, 0);
/// Used for popups and the status bar
pub const DARK_PURPLE: Color = Color::Rgb(86, 60, 92);

pub fn state_color(state: TaskState) -> Color {
    match state {
        TaskState::New | TaskState::Approved => Color::Blue,
        TaskState::InProgress => GOLD,
        TaskState::Completed => DARK_GREEN,
        TaskState::Blocked => DARK_RED,
    }
}

/// Foreground of the category tag on a card.
pub fn category_color(category: Category) -> Color {
    match category {
        Category::UrgentImportant => Color::LightRed,
        Category::NotUrgentImportant => Color::LightYellow,
        Category::UrgentNotImportant => Color::LightCyan,
        Category::NotUrgentNotImportant => Color::Gray,
    }
}
