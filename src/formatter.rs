//! Formatter contract: pure functions producing opaque display fragments,
//! injected into the session bridge. The HTML-fragment strings are treated
//! as values the bridge hands off to the browser, not something the bridge
//! ever inspects — the only thing it knows about them is that each one
//! names its own splice target.
//!
//! `original_source/` traces back to an htmx-based frontend, so the
//! shipped [`DefaultFormatter`] produces htmx out-of-band-swap fragments
//! (`hx-swap-oob`); this crate does not depend on htmx itself, it just
//! shapes strings the way that kind of frontend expects.

use crate::rcon::MessageType;

pub trait Formatter: Send + Sync {
    fn response(&self, body: &str, command: &str, target_id: &str, swap_style: &str) -> String;
    fn error(&self, message: &str, target_id: &str, swap_style: &str) -> String;
    fn info(&self, message: &str, target_id: &str, swap_style: &str) -> String;
    fn auth(&self, success: bool, detail: &str, target_id: &str, swap_style: &str) -> String;
    fn server_message(&self, body: &str, kind: MessageType, target_id: &str, swap_style: &str) -> String;
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Splits a response body on `\n`, filtering empty lines, per spec.md §8's
/// boundary case for embedded-newline commands.
fn split_lines(body: &str) -> Vec<&str> {
    body.lines().filter(|line| !line.is_empty()).collect()
}

pub struct DefaultFormatter;

impl Formatter for DefaultFormatter {
    fn response(&self, body: &str, command: &str, target_id: &str, swap_style: &str) -> String {
        let lines = split_lines(body);
        let rendered = if lines.is_empty() {
            String::new()
        } else {
            lines
                .iter()
                .map(|line| format!("<div class=\"rcon-line\">{}</div>", escape_html(line)))
                .collect::<Vec<_>>()
                .join("")
        };
        format!(
            "<div id=\"{target_id}\" hx-swap-oob=\"{swap_style}\"><div class=\"rcon-command\">&gt; {}</div>{rendered}</div>",
            escape_html(command)
        )
    }

    fn error(&self, message: &str, target_id: &str, swap_style: &str) -> String {
        format!(
            "<div id=\"{target_id}\" hx-swap-oob=\"{swap_style}\"><div class=\"rcon-error\">{}</div></div>",
            escape_html(message)
        )
    }

    fn info(&self, message: &str, target_id: &str, swap_style: &str) -> String {
        format!(
            "<div id=\"{target_id}\" hx-swap-oob=\"{swap_style}\"><div class=\"rcon-info\">{}</div></div>",
            escape_html(message)
        )
    }

    fn auth(&self, success: bool, detail: &str, target_id: &str, swap_style: &str) -> String {
        let class = if success { "rcon-auth-ok" } else { "rcon-auth-failed" };
        format!(
            "<div id=\"{target_id}\" hx-swap-oob=\"{swap_style}\"><div class=\"{class}\">{}</div></div>",
            escape_html(detail)
        )
    }

    fn server_message(&self, body: &str, kind: MessageType, target_id: &str, swap_style: &str) -> String {
        let class = match kind {
            MessageType::Generic => "rcon-push",
            MessageType::Warning => "rcon-push-warning",
            MessageType::Error => "rcon-push-error",
        };
        format!(
            "<div id=\"{target_id}\" hx-swap-oob=\"{swap_style}\"><div class=\"{class}\">{}</div></div>",
            escape_html(body)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_splits_on_newline_and_filters_empty_lines() {
        let formatter = DefaultFormatter;
        let fragment = formatter.response("hostname: X\n\nplayers: 1/10\n", "status", "console", "beforeend");
        assert!(fragment.contains("hostname: X"));
        assert!(fragment.contains("players: 1/10"));
        assert_eq!(fragment.matches("rcon-line").count(), 2);
    }

    #[test]
    fn escapes_interpolated_text() {
        let formatter = DefaultFormatter;
        let fragment = formatter.error("<script>alert(1)</script>", "console", "beforeend");
        assert!(!fragment.contains("<script>"));
        assert!(fragment.contains("&lt;script&gt;"));
    }
}
