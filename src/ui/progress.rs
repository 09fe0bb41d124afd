use crate::event::{Event, EventStream};
use crate::ui::theme;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::time::Duration;

/// Renders a run's event stream as a percentage bar with per-table
/// completion lines.
pub struct ProgressRenderer {
    bar: ProgressBar,
}

impl ProgressRenderer {
    pub fn new(label: &str) -> Self {
        let bar = if console::Term::stdout().is_term() {
            let bar = ProgressBar::new(100).with_message(label.to_string());
            bar.set_style(
                ProgressStyle::with_template("{msg} [{bar:40}] {percent}%")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        } else {
            ProgressBar::hidden()
        };
        Self { bar }
    }

    /// Drain the stream to completion and return the terminal event.
    pub async fn render(self, mut events: EventStream) -> Option<Event> {
        while let Some(event) = events.recv().await {
            match &event {
                Event::Manifest(manifest) => {
                    self.bar
                        .println(format!("📦 manifest: {} tables", manifest.len()));
                }
                Event::Progress(ratio) => {
                    self.bar.set_position((ratio * 100.0).round() as u64);
                }
                Event::TableFinished(table) => {
                    self.bar
                        .println(format!("✅ {}", table.style(theme().success.clone())));
                }
                Event::Error(reason) => {
                    self.bar.abandon();
                    eprintln!("❌ {}", reason.style(theme().error.clone()));
                    return Some(event);
                }
                Event::Success => {
                    self.bar.finish_and_clear();
                    println!("✅ {}", "done".style(theme().success.clone()));
                    return Some(event);
                }
            }
        }
        None
    }
}
