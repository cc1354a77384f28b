//! Output cleaning.
//!
//! The console writes for a human terminal: private-use-area control codes
//! drive cursor movement and screen redraws, every command is echoed back,
//! and banners announce attach/detach transitions. This module reduces a
//! raw capture to the command's actual output.

/// Control codes the console emits in the Unicode private use area.
///
/// Parameterized codes carry trailing parameter chars that must be skipped
/// with them; the title region is delimited by a begin/end pair and skipped
/// as a unit.
mod codes {
    /// Moves the cursor; followed by two parameter chars (column, row).
    pub const TELEPORT_CURSOR: char = '\u{E000}';
    pub const CLEAR_SCREEN: char = '\u{E001}';
    /// Scrolls by N rows; followed by one parameter char.
    pub const SCROLL_UP: char = '\u{E002}';
    /// Scrolls by N rows; followed by one parameter char.
    pub const SCROLL_DOWN: char = '\u{E003}';
    pub const HOME_CURSOR: char = '\u{E004}';
    pub const END_CURSOR: char = '\u{E005}';
    pub const DELETE_LEFT: char = '\u{E006}';
    pub const DELETE_RIGHT: char = '\u{E007}';
    pub const BEEP: char = '\u{E008}';
    /// Begins the window-title region; everything up to TITLE_END is
    /// metadata, not output.
    pub const TITLE_BEGIN: char = '\u{E009}';
    pub const TITLE_END: char = '\u{E00A}';
    /// Resizes the screen; followed by two parameter chars (width, height).
    pub const RESIZE_SCREEN: char = '\u{E00B}';
}

/// Prompt the interpreter prints when idle.
pub const PROMPT: &str = ">";

/// Banner fragments around attach/detach transitions; pure noise.
const NOISE_BANNERS: &[&str] = &["Connecting to CPU", "Selecting CPU", "Detaching from CPU"];

/// Strip private control codes (including their parameter chars and the
/// title region), normalize line endings, and drop remaining non-printable
/// control chars except newline.
pub fn strip_control_codes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            codes::TELEPORT_CURSOR | codes::RESIZE_SCREEN => {
                chars.next();
                chars.next();
            }
            codes::SCROLL_UP | codes::SCROLL_DOWN => {
                chars.next();
            }
            codes::TITLE_BEGIN => {
                // Skip the title region as a unit.
                for inner in chars.by_ref() {
                    if inner == codes::TITLE_END {
                        break;
                    }
                }
            }
            codes::CLEAR_SCREEN
            | codes::HOME_CURSOR
            | codes::END_CURSOR
            | codes::DELETE_LEFT
            | codes::DELETE_RIGHT
            | codes::BEEP
            | codes::TITLE_END => {}
            // Anything else in the private use area is an unknown code;
            // drop it rather than leak it into output.
            '\u{E000}'..='\u{F8FF}' => {}
            _ => out.push(ch),
        }
    }

    let normalized = out.replace("\r\n", "\n").replace('\r', "\n");
    normalized
        .chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .collect()
}

/// Remove every line-prefix occurrence of any sent command text. Loops per
/// line because the console can concatenate several echoed commands onto
/// one line.
pub fn strip_echoes(text: &str, sent: &[String]) -> String {
    let mut lines = Vec::new();
    for line in text.lines() {
        let mut rest = line.trim_start();
        loop {
            let mut stripped = false;
            for cmd in sent {
                let cmd = cmd.trim();
                if !cmd.is_empty() && rest.starts_with(cmd) {
                    rest = rest[cmd.len()..].trim_start();
                    stripped = true;
                }
            }
            if !stripped {
                break;
            }
        }
        lines.push(rest.to_string());
    }
    lines.join("\n")
}

/// Drop bare prompts, attach/detach banners, and blank lines.
pub fn drop_noise_lines(text: &str) -> String {
    text.lines()
        .filter(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed == PROMPT {
                return false;
            }
            !NOISE_BANNERS.iter().any(|banner| trimmed.contains(banner))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Full cleaning pipeline for one execution's raw capture. `sent` holds
/// every command line sent during the execution (script lines plus the
/// sentinel print); `sentinel` is the sentinel token itself, whose result
/// line is framing rather than output.
pub fn clean_output(raw: &str, sent: &[String], sentinel: &str) -> String {
    let text = strip_control_codes(raw);
    let text = strip_echoes(&text, sent);
    let text = drop_noise_lines(&text);
    text.lines()
        .filter(|line| line.trim() != sentinel)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sent(cmds: &[&str]) -> Vec<String> {
        cmds.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn strips_parameterized_codes_with_params() {
        let raw = format!("A{}\u{0010}\u{0020}B", codes::TELEPORT_CURSOR);
        assert_eq!(strip_control_codes(&raw), "AB");
        let raw = format!("A{}\u{0005}B", codes::SCROLL_UP);
        assert_eq!(strip_control_codes(&raw), "AB");
    }

    #[test]
    fn skips_title_region_as_unit() {
        let raw = format!(
            "out{}Vessel Title {}{}more",
            codes::TITLE_BEGIN,
            codes::BEEP,
            codes::TITLE_END
        );
        assert_eq!(strip_control_codes(&raw), "outmore");
    }

    #[test]
    fn normalizes_line_endings_and_drops_controls() {
        assert_eq!(strip_control_codes("a\r\nb\rc\x07d"), "a\nb\ncd");
    }

    #[test]
    fn strips_concatenated_echoes_on_one_line() {
        let text = "PRINT 1+1.PRINT \"T\".\n2\n";
        let cleaned = strip_echoes(text, &sent(&["PRINT 1+1.", "PRINT \"T\"."]));
        assert_eq!(cleaned, "\n2");
    }

    #[test]
    fn cleaned_output_has_no_prompt_or_command_prefix_lines() {
        let raw = "PRINT 1+1.\n2\n> \nConnecting to CPU 1...\n";
        let commands = sent(&["PRINT 1+1."]);
        let cleaned = clean_output(raw, &commands, "TOKEN");
        for line in cleaned.lines() {
            assert_ne!(line.trim(), PROMPT);
            for cmd in &commands {
                assert!(!line.trim_start().starts_with(cmd.trim()));
            }
        }
        assert_eq!(cleaned, "2");
    }

    #[test]
    fn sentinel_result_line_is_removed() {
        let raw = "PRINT \"TOK123\".\n42\nTOK123\n";
        let cleaned = clean_output(raw, &sent(&["PRINT \"TOK123\"."]), "TOK123");
        assert_eq!(cleaned, "42");
    }

    #[test]
    fn noise_banners_dropped() {
        let cleaned = drop_noise_lines("Detaching from CPU 2\nreal output\nSelecting CPU 1\n");
        assert_eq!(cleaned, "real output");
    }
}
