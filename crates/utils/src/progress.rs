//! Progress reporting on top of indicatif

use indicatif::{ProgressBar, ProgressStyle};

/// Bar layout shared by prediction and training
pub const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}";

/// Create a styled progress bar
pub fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

/// Named progress reporter that can be silenced
pub struct ProgressReporter {
    bar: ProgressBar,
    name: String,
}

impl ProgressReporter {
    /// Create a visible reporter
    pub fn new(name: impl Into<String>, total: usize) -> Self {
        let name = name.into();
        let bar = progress_bar(total as u64);
        bar.set_prefix(name.clone());
        Self { bar, name }
    }

    /// Create a reporter that draws nothing
    pub fn silent(name: impl Into<String>, total: usize) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_length(total as u64);
        Self { bar, name: name.into() }
    }

    /// Increment progress
    pub fn inc(&self, delta: usize) {
        self.bar.inc(delta as u64);
    }

    /// Set current progress
    pub fn set(&self, current: usize) {
        self.bar.set_position(current as u64);
    }

    /// Replace the trailing message
    pub fn set_message(&self, message: impl Into<String>) {
        self.bar.set_message(message.into());
    }

    /// Current position
    pub fn position(&self) -> usize {
        self.bar.position() as usize
    }

    /// Reporter name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finish the bar, leaving it on screen
    pub fn finish(&self, message: impl Into<String>) {
        self.bar.finish_with_message(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_reporter() {
        let progress = ProgressReporter::silent("predict", 100);
        progress.inc(10);
        assert_eq!(progress.position(), 10);
        progress.set(50);
        assert_eq!(progress.position(), 50);
        progress.set_message("batch 5");
        progress.finish("done");
        assert_eq!(progress.name(), "predict");
    }

    #[test]
    fn test_progress_bar_length() {
        let bar = progress_bar(7);
        assert_eq!(bar.length(), Some(7));
    }
}
