//! Console rendering of flash events.

use std::io::{self, Write};

use flashb_core::events::{FlashEvent, FlashObserver, FlashPhase, TracingObserver};

/// Width shared by the section label and the bar.
const LINE_WIDTH: usize = 61;

/// Prints user-facing progress to stdout and logs everything else.
pub struct ConsoleObserver;

impl FlashObserver for ConsoleObserver {
    fn on_event(&self, event: &FlashEvent) {
        match event {
            FlashEvent::VersionRead { device, version } => {
                println!("{}: existing firmware version {:x}", device, version);
            }
            FlashEvent::HalfSelected { device, half } => {
                println!("{}: sending {}", device, half);
            }
            FlashEvent::PhaseChanged {
                phase: FlashPhase::Confirm,
                ..
            } => {
                println!("Confirming CRC");
            }
            FlashEvent::Progress {
                label,
                current,
                total,
            } => {
                let mut out = io::stdout().lock();
                let _ = out.write_all(render_bar(label, *current, *total).as_bytes());
                if current >= total {
                    let _ = writeln!(out);
                }
                let _ = out.flush();
            }
            other => TracingObserver.on_event(other),
        }
    }
}

/// One redrawable progress line: `label done/total (pct%) ====>   |`.
pub fn render_bar(label: &str, current: u64, total: u64) -> String {
    let width = LINE_WIDTH.saturating_sub(label.len());
    let ratio = if total > 0 {
        (current as f64 / total as f64).min(1.0)
    } else {
        1.0
    };
    let filled = (ratio * width as f64) as usize;

    let mut bar = String::with_capacity(width + 1);
    for i in 0..width {
        bar.push(if i < filled {
            '='
        } else if i == filled && filled > 0 {
            '>'
        } else {
            ' '
        });
    }
    bar.push('|');

    format!(
        "\r{} {:04x}/{:04x} ({:3.0}%) {}",
        label,
        current,
        total,
        ratio * 100.0,
        bar
    )
}
