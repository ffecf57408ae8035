// src/sys/escape.rs

/// Characters that are significant inside a `/`-delimited line substitution
/// (`s/=.*/=VALUE/`): the delimiter, regex metacharacters and the `&`
/// back-reference in replacement text.
const GUARDED: [char; 8] = ['/', '.', '*', '^', '$', '&', '[', ']'];

/// Escapes a raw value so it can be spliced into a sed-style substitution.
///
/// Equivalent to applying, in order: `\` → `\\`, drop every newline, then
/// prefix each of `/ . * ^ $ & [ ]` with a backslash. A single pass gives the
/// same result because the backslashes inserted for guarded characters are
/// never revisited.
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() * 2);
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => {}
            c if GUARDED.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}
