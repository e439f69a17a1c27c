pub mod colors {
    pub const GREY: u8 = 102;   // #7D7D7D - Punctuation, secondary
    pub const AQUA: u8 = 109;   // #7A9EB5 - Numbers, info
    pub const ORANGE: u8 = 208; // #F2913D - Warnings
    pub const RED: u8 = 167;    // #E34F45 - Errors, failures
    pub const BLUE: u8 = 68;    // #426BD1 - Names, labels
    pub const GREEN: u8 = 71;   // #63C27A - Success
    pub const YELLOW: u8 = 185; // #CCCC3D - Redirects
    pub const WHITE: u8 = 250;  // Primary text
}

/// ANSI escape code constants
pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";

/// Generate foreground color escape code
#[inline]
pub fn fg(color: u8) -> String {
    format!("\x1b[38;5;{}m", color)
}

/// Generate bold foreground color escape code
#[inline]
pub fn bold_fg(color: u8) -> String {
    format!("\x1b[1;38;5;{}m", color)
}

/// Colorize text with a foreground color
#[inline]
pub fn colorize(text: &str, color: u8) -> String {
    format!("{}{}{}", fg(color), text, RESET)
}

/// Colorize text with bold foreground color
#[inline]
pub fn bold_color(text: &str, color: u8) -> String {
    format!("{}{}{}", bold_fg(color), text, RESET)
}

/// Bold text without a color change
#[inline]
pub fn bold(text: &str) -> String {
    format!("{}{}{}", BOLD, text, RESET)
}

/// Success message (green)
#[inline]
pub fn success(text: &str) -> String {
    bold_color(text, colors::GREEN)
}

/// Error message (red)
#[inline]
pub fn error(text: &str) -> String {
    bold_color(text, colors::RED)
}

/// Warning message (orange)
#[inline]
pub fn warning(text: &str) -> String {
    bold_color(text, colors::ORANGE)
}

/// Info message (aqua)
#[inline]
pub fn info(text: &str) -> String {
    colorize(text, colors::AQUA)
}

/// Label/name (blue)
#[inline]
pub fn label(text: &str) -> String {
    colorize(text, colors::BLUE)
}

/// Secondary/muted text (grey)
#[inline]
pub fn muted(text: &str) -> String {
    colorize(text, colors::GREY)
}

/// HTTP status code color
pub fn http_status(code: u16) -> u8 {
    match code / 100 {
        1 => colors::AQUA,   // Informational
        2 => colors::GREEN,  // Success
        3 => colors::YELLOW, // Redirect
        4 => colors::ORANGE, // Client error
        5 => colors::RED,    // Server error
        _ => colors::GREY,
    }
}
