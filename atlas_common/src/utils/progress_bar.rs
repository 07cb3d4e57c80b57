use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

const TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}";

/// A percentage based progress bar for terminal output.
///
/// When created as hidden, every call is a no-op on screen, which keeps `--quiet`
/// runs free of redraw noise.
#[derive(Debug, Clone)]
pub struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    pub fn new(hidden: bool) -> Self {
        let bar = ProgressBar::new(100);
        if hidden {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        } else {
            let style = ProgressStyle::default_bar()
                .template(TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>- ");
            bar.set_style(style);
            bar.enable_steady_tick(std::time::Duration::from_millis(120));
        }
        Self { bar }
    }

    pub fn set(&self, percent: u8, label: &str) {
        self.bar.set_position(u64::from(percent.min(100)));
        self.bar.set_message(label.to_string());
    }

    pub fn position(&self) -> u8 {
        self.bar.position().min(100) as u8
    }

    /// Run `f` with the bar temporarily cleared, so that anything printed in between
    /// does not get mixed up with it.
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.bar.suspend(f)
    }

    pub fn finish(&self, msg: &str) {
        self.bar.finish_with_message(msg.to_string());
    }

    pub fn abandon(&self, msg: &str) {
        self.bar.abandon_with_message(msg.to_string());
    }
}
