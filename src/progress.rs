
//! Progress bars for the long-running loops: sample ingestion and association matrix
//! rows. Bars are drawn on stderr and stay hidden when stderr is not a terminal.

use indicatif::{ProgressBar, ProgressStyle};

fn styled(len: u64, template: &str) -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar());

    let progress_bar = ProgressBar::new(len);
    progress_bar.set_style(style);
    progress_bar
}

/// Create a progress bar counting `unit`s.
pub fn progress_bar(len: u64, unit: &str) -> ProgressBar {
    styled(
        len,
        &format!("[{{elapsed_precise}}] {{bar:40.cyan/blue}} {{percent}}% [{{human_pos}}/{{human_len}} {unit}] [Remaining: {{eta}}]"),
    )
}

/// Create a progress bar counting `unit`s, with a trailing message.
pub fn progress_bar_msg(len: u64, unit: &str) -> ProgressBar {
    styled(
        len,
        &format!("[{{elapsed_precise}}] {{bar:20.cyan/blue}} {{percent}}% [{{human_pos}}/{{human_len}} {unit}] [{{msg}}]"),
    )
}
