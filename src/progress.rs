use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

fn iteration_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:.bold} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>4}/{len:4} {msg}",
    )
    .expect("static progress template")
    .progress_chars("█▇▆▅▄▃▂▁ ")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:.bold} {spinner:.magenta} {msg:.bold} [{elapsed_precise}]")
        .expect("static spinner template")
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
}

/// Bar counting EM iterations; the message carries the latest log-likelihood.
pub fn iterations(n_iter: usize, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::with_draw_target(Some(n_iter as u64), ProgressDrawTarget::stderr_with_hz(15));
    pb.set_style(iteration_style());
    pb.set_prefix(prefix.to_string());
    pb
}

/// `Some(bar)` only when progress output is enabled and there is work to show.
pub fn maybe_iterations(enabled: bool, n_iter: usize, prefix: &str) -> Option<ProgressBar> {
    (enabled && n_iter > 0).then(|| iterations(n_iter, prefix))
}

pub fn spinner(prefix: &str, msg: &str) -> ProgressBar {
    let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr_with_hz(15));
    pb.set_style(spinner_style());
    pb.set_prefix(prefix.to_string());
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}
