use std::{fmt, sync::OnceLock};

use owo_colors::{AnsiColors, OwoColorize};
use supports_color::Stream;
use tracing_subscriber::EnvFilter;

static COLOR_OUTPUT: OnceLock<bool> = OnceLock::new();

/// Installs the compact subscriber; `RUST_LOG` overrides the `info` default.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(color_output())
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    Ok(())
}

/// Leading tag on every server log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Category {
    Access,
    Auth,
    Run,
    Store,
}

impl Category {
    fn tag(self) -> &'static str {
        match self {
            Category::Access => "ACCESS",
            Category::Auth => "AUTH",
            Category::Run => "RUN",
            Category::Store => "STORE",
        }
    }

    fn label_color(self) -> AnsiColors {
        match self {
            Category::Access => AnsiColors::BrightCyan,
            Category::Auth => AnsiColors::BrightYellow,
            Category::Run => AnsiColors::BrightGreen,
            Category::Store => AnsiColors::BrightMagenta,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if color_output() {
            write!(f, "{}", self.tag().color(self.label_color()).bold())
        } else {
            f.write_str(self.tag())
        }
    }
}

pub(crate) struct MethodLabel<'a>(pub &'a str);

impl fmt::Display for MethodLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let color = match self.0 {
            "GET" => AnsiColors::BrightBlue,
            "POST" => AnsiColors::BrightGreen,
            "PUT" => AnsiColors::BrightYellow,
            "DELETE" => AnsiColors::BrightRed,
            _ => AnsiColors::BrightWhite,
        };
        write_colored(f, self.0, color)
    }
}

pub(crate) struct StatusLabel(pub u16);

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let color = match self.0 {
            200..=299 => AnsiColors::BrightGreen,
            300..=399 => AnsiColors::BrightCyan,
            400..=499 => AnsiColors::BrightYellow,
            500..=u16::MAX => AnsiColors::BrightRed,
            _ => AnsiColors::BrightBlue,
        };
        write_colored(f, &self.0.to_string(), color)
    }
}

fn write_colored(f: &mut fmt::Formatter<'_>, text: &str, color: AnsiColors) -> fmt::Result {
    if color_output() {
        write!(f, "{}", text.color(color))
    } else {
        f.write_str(text)
    }
}

fn color_output() -> bool {
    *COLOR_OUTPUT.get_or_init(|| match ColorChoice::from_env() {
        ColorChoice::Never => false,
        ColorChoice::Always => {
            enable_virtual_terminal();
            true
        }
        ColorChoice::Auto => {
            enable_virtual_terminal() || supports_color::on_cached(Stream::Stdout).is_some()
        }
    })
}

enum ColorChoice {
    Never,
    Always,
    Auto,
}

impl ColorChoice {
    fn from_env() -> Self {
        if std::env::var_os("NO_COLOR").is_some() {
            ColorChoice::Never
        } else if std::env::var_os("FORCE_COLOR").is_some() {
            ColorChoice::Always
        } else {
            ColorChoice::Auto
        }
    }
}

/// Turns on ANSI processing for the Windows console; true when it took effect.
#[cfg(windows)]
fn enable_virtual_terminal() -> bool {
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::Console::{
        CONSOLE_MODE, ENABLE_VIRTUAL_TERMINAL_PROCESSING, GetConsoleMode, GetStdHandle,
        STD_OUTPUT_HANDLE, SetConsoleMode,
    };

    unsafe {
        let Ok(handle) = GetStdHandle(STD_OUTPUT_HANDLE) else {
            return false;
        };
        if handle == HANDLE::default() {
            return false;
        }
        let mut mode = CONSOLE_MODE::default();
        if GetConsoleMode(handle, &mut mode).is_err() {
            return false;
        }
        SetConsoleMode(handle, mode | ENABLE_VIRTUAL_TERMINAL_PROCESSING).is_ok()
    }
}

#[cfg(not(windows))]
fn enable_virtual_terminal() -> bool {
    false
}
