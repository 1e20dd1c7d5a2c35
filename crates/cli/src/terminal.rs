//! Terminal stand-ins for the overlay window.

use overlay_core::error::ToolError;
use overlay_core::event::{TurnEvents, TurnId};
use overlay_tools::{UiSurface, WidgetPlacement};
use std::io::Write;

/// Prints a turn as it happens: progress on stderr, answer text on stdout.
pub struct TerminalEvents;

impl TurnEvents for TerminalEvents {
    fn notify_tool_call_progress(&self, _turn_id: TurnId, status: &str) {
        eprintln!("  ... {status}");
    }

    fn emit_chunk(&self, _turn_id: TurnId, text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    fn emit_end(&self, _turn_id: TurnId) {
        println!();
    }

    fn emit_error(&self, _turn_id: TurnId, message: &str) {
        println!();
        eprintln!("  [Error] {message}");
    }
}

/// Renders placed widgets as a line of text.
pub struct TerminalSurface;

pub fn placement_line(placement: &WidgetPlacement) -> String {
    format!(
        "  [widget] {} @ row {} col {} ({}x{})",
        placement.component, placement.row, placement.col, placement.row_span, placement.col_span
    )
}

impl UiSurface for TerminalSurface {
    fn add_widget(&self, placement: &WidgetPlacement) -> Result<(), ToolError> {
        eprintln!("{}", placement_line(placement));
        Ok(())
    }
}
