//! A concrete [`ProgressSink`] for interactive use: one `indicatif` bar per
//! in-flight task under a shared `MultiProgress`, colored status lines via
//! `colored` once a task finalizes. `NullProgressSink` (from `common`) is
//! used instead whenever `--bar none` or a non-interactive run is selected.

use std::sync::Arc;

use colored::Colorize;
use common::{ProgressSink, TaskProgress};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

#[derive(Debug)]
pub struct IndicatifProgressSink {
	multi: MultiProgress,
}

impl IndicatifProgressSink {
	pub fn new() -> Self {
		Self { multi: MultiProgress::new() }
	}
}

impl Default for IndicatifProgressSink {
	fn default() -> Self {
		Self::new()
	}
}

fn bar_style() -> ProgressStyle {
	ProgressStyle::with_template("{prefix:.bold} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({eta})")
		.unwrap_or_else(|_| ProgressStyle::default_bar())
		.progress_chars("=>-")
}

struct IndicatifTaskProgress {
	bar: ProgressBar,
	relative_path: String,
}

impl TaskProgress for IndicatifTaskProgress {
	fn on_bytes(&self, delta: u64) {
		self.bar.inc(delta);
	}

	fn on_success(&self) {
		self.bar.finish_and_clear();
		println!("{} {}", "done".green(), self.relative_path);
	}

	fn on_exists(&self) {
		self.bar.finish_and_clear();
		println!("{} {}", "exists".yellow(), self.relative_path);
	}

	fn on_sleep(&self, seconds: u64) {
		self.bar.set_message(format!("throttled {seconds}s"));
	}

	fn on_fail(&self, message: &str) {
		self.bar.finish_and_clear();
		eprintln!("{} {}: {}", "retry".red(), self.relative_path, message);
	}

	fn on_dead_letter(&self, message: &str) {
		self.bar.finish_and_clear();
		eprintln!("{} {}: {}", "dead-letter".red().bold(), self.relative_path, message);
	}
}

impl ProgressSink for IndicatifProgressSink {
	fn start(&self, relative_path: &str, total_size: u64) -> Box<dyn TaskProgress> {
		let bar = self.multi.add(ProgressBar::new(total_size));
		bar.set_style(bar_style());
		bar.set_prefix(relative_path.to_string());
		Box::new(IndicatifTaskProgress { bar, relative_path: relative_path.to_string() })
	}
}

pub fn sink_for(bar_mode: &str) -> Arc<dyn ProgressSink> {
	match bar_mode {
		"none" | "" => Arc::new(common::NullProgressSink),
		_ => Arc::new(IndicatifProgressSink::new()),
	}
}
