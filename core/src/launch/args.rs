//! Free-form argument handling
//!
//! Users (and the server) can pass extra switches as a single string. Only
//! switches the game is known to understand get through; anything else is
//! dropped together with the values that follow it.

/// Recognised switches and how many values each takes
const ALLOWED_SWITCHES: &[(&str, usize)] = &[
    ("/nomovie", 0),
    ("/nosound", 0),
    ("/nomusic", 0),
    ("/showlog", 0),
    ("/debug", 0),
    ("/nobugreport", 0),
    ("/exitongameover", 0),
    ("/windowed", 2),
    ("/fullscreen", 0),
    ("/maxfps", 1),
    ("/seed", 1),
    ("/syncreplay", 0),
    ("/gameoptions", 1),
];

fn switch_arity(switch: &str) -> Option<usize> {
    ALLOWED_SWITCHES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(switch))
        .map(|(_, arity)| *arity)
}

fn is_switch(token: &str) -> bool {
    token.starts_with('/') && token.len() > 1
}

/// Split on whitespace; double quotes group a value containing spaces.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }
    tokens
}

/// Keep only allow-listed switches (and up to their arity of values).
pub fn filter_switches<I>(tokens: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut kept = Vec::new();
    let mut tokens = tokens.into_iter().peekable();

    while let Some(token) = tokens.next() {
        if !is_switch(&token) {
            tracing::debug!(token = %token, "Dropping stray argument value");
            continue;
        }

        match switch_arity(&token) {
            Some(arity) => {
                kept.push(token);
                for _ in 0..arity {
                    match tokens.next_if(|next| !is_switch(next)) {
                        Some(value) => kept.push(value),
                        None => break,
                    }
                }
            }
            None => {
                tracing::debug!(switch = %token, "Dropping unrecognised switch");
                while tokens.next_if(|next| !is_switch(next)).is_some() {}
            }
        }
    }

    kept
}

/// Tokenize and filter a caller-supplied argument string.
pub fn sanitize(input: &str) -> Vec<String> {
    filter_switches(tokenize(input))
}

/// Quote a value for a single-string command line.
///
/// Values without whitespace are returned unchanged.
pub fn quote(value: &str) -> String {
    if !value.is_empty() && !value.chars().any(char::is_whitespace) {
        return value.to_string();
    }
    if cfg!(windows) {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}
