//! Cleans strings taken from layout files and images before they reach a
//! terminal or a log line.

const MAX_LOG_CHARS: usize = 1024;

#[derive(Clone, Copy)]
enum EscapeMode {
    Esc,
    Csi,
    Osc,
    OscEsc,
    StTerminated,
    StEsc,
}

pub fn sanitize_log_line(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_LOG_CHARS));
    let mut escape: Option<EscapeMode> = None;
    let mut count = 0usize;

    for c in input.chars() {
        if let Some(mode) = escape {
            escape = match mode {
                EscapeMode::Esc => match c {
                    '[' => Some(EscapeMode::Csi),
                    ']' => Some(EscapeMode::Osc),
                    // DCS, SOS, PM and APC all run until ST.
                    'P' | 'X' | '^' | '_' => Some(EscapeMode::StTerminated),
                    _ => None,
                },
                EscapeMode::Csi => (!('@'..='~').contains(&c)).then_some(EscapeMode::Csi),
                EscapeMode::Osc => match c {
                    '\x07' => None,
                    '\x1b' => Some(EscapeMode::OscEsc),
                    _ => Some(EscapeMode::Osc),
                },
                EscapeMode::OscEsc => match c {
                    '\\' => None,
                    '\x1b' => Some(EscapeMode::OscEsc),
                    _ => Some(EscapeMode::Osc),
                },
                EscapeMode::StTerminated => match c {
                    '\x1b' => Some(EscapeMode::StEsc),
                    _ => Some(EscapeMode::StTerminated),
                },
                EscapeMode::StEsc => match c {
                    '\\' => None,
                    '\x1b' => Some(EscapeMode::StEsc),
                    _ => Some(EscapeMode::StTerminated),
                },
            };
            continue;
        }
        match c {
            '\x1b' => {
                escape = Some(EscapeMode::Esc);
                continue;
            }
            '\t' | '\n' | '\r' => out.push(' '),
            c if c.is_control() || is_format_control(c) => continue,
            c => out.push(c),
        }
        count += 1;
        if count >= MAX_LOG_CHARS {
            out.push_str(" ...[truncated]");
            break;
        }
    }

    out
}

fn is_format_control(c: char) -> bool {
    c == '\u{061C}'
        || c == '\u{200E}'
        || c == '\u{200F}'
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}
