//! Glob → regex: `*` любая последовательность, `?` один символ, `[...]` класс символов,
//! `\x` — литерал x. Остальное экранируется. Шаблон якорится целиком (^...$).

use regex::{Regex, RegexBuilder};

pub fn glob_to_regex_source(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(lit) => out.push_str(&regex::escape(&lit.to_string())),
                None => out.push_str(r"\\"),
            },
            '[' => {
                // класс до ближайшей ']'; без закрывающей скобки '[' — литерал
                let rest: String = chars.clone().collect();
                match rest.find(']') {
                    Some(end) if end > 0 => {
                        out.push('[');
                        for cc in rest[..end].chars() {
                            match cc {
                                '-' => out.push('-'),
                                other => out.push_str(&regex::escape(&other.to_string())),
                            }
                        }
                        out.push(']');
                        for _ in 0..rest[..=end].chars().count() {
                            chars.next();
                        }
                    }
                    _ => out.push_str(r"\["),
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

/// Скомпилировать glob. `nocase` — сравнение без учёта регистра.
pub fn compile_glob(pattern: &str, nocase: bool) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&glob_to_regex_source(pattern))
        .case_insensitive(nocase)
        .build()
}
