//! Nice `canort` output formatting.

use std::fmt;

use log;

const CANORT_BANNER_LENGTH: usize = 103;

/// Logs a warning to the `canort-output` logger.
macro_rules! canort_warn {
    ($fmt:expr $(, $($arg:tt)*)?) => { log::warn!(target: "canort-output", $fmt, $($($arg)*)?) }
}

/// Logs a main output line to the `canort-output` logger.
macro_rules! canort_output {
    ($fmt:expr $(, $($arg:tt)*)?) => { log::info!(target: "canort-output", $fmt, $($($arg)*)?) }
}

pub(crate) use {canort_output, canort_warn};

/// Logs a nicely formatted section title to the `canort-output` logger.
pub(crate) fn log_title(title: &str) {
    let length = title.chars().count().max(CANORT_BANNER_LENGTH - 6);
    let bar = "─".repeat(length);
    canort_output!("┌──{bar}──┐");
    canort_output!("│§ {title:^length$} §│");
    canort_output!("└──{bar}──┘");
}

/// Logs a nicely formatted subtitle to the `canort-output` logger.
pub(crate) fn log_subtitle(subtitle: &str) {
    let length = subtitle.chars().count();
    let bar = "═".repeat(length);
    canort_output!("{}", subtitle);
    canort_output!("{}", bar);
}

/// A trait for logging `canort` outputs nicely.
pub(crate) trait CanortOutput: fmt::Debug + fmt::Display {
    /// Logs display output nicely.
    fn log_output_display(&self) {
        let lines = self.to_string();
        lines.lines().for_each(|line| {
            canort_output!("{line}");
        })
    }
}

// Blanket implementation
impl<T> CanortOutput for T where T: fmt::Debug + fmt::Display {}
