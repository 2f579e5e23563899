//! Server-declared casemapping (RPL_ISUPPORT `CASEMAPPING`), used to
//! compare channel names and nicknames the way the server does.

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum Casemapping {
    #[default]
    Ascii,
    Rfc1459,
    Rfc1459Strict,
}

impl Casemapping {
    pub fn parse(s: &str) -> Casemapping {
        match s.to_ascii_lowercase().as_str() {
            "rfc1459" => Casemapping::Rfc1459,
            "rfc1459-strict" => Casemapping::Rfc1459Strict,
            _ => Casemapping::Ascii,
        }
    }

    /// Lowercases `s` per this mapping.
    pub fn to_lower(&self, s: &str) -> String {
        match self {
            Casemapping::Ascii => s.to_ascii_lowercase(),
            Casemapping::Rfc1459 => s
                .chars()
                .map(|c| match c {
                    'A'..='Z' => c.to_ascii_lowercase(),
                    '[' => '{',
                    ']' => '}',
                    '\\' => '|',
                    '~' => '^',
                    _ => c,
                })
                .collect(),
            Casemapping::Rfc1459Strict => s
                .chars()
                .map(|c| match c {
                    'A'..='Z' => c.to_ascii_lowercase(),
                    '[' => '{',
                    ']' => '}',
                    '\\' => '|',
                    _ => c,
                })
                .collect(),
        }
    }

    pub fn eq(&self, a: &str, b: &str) -> bool {
        self.to_lower(a) == self.to_lower(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_default() {
        assert_eq!(Casemapping::Ascii.to_lower("FOO[BAR]"), "foo[bar]");
    }

    #[test]
    fn rfc1459_lowers_braces() {
        assert_eq!(Casemapping::Rfc1459.to_lower("FOO[BAR]~"), "foo{bar}^");
    }

    #[test]
    fn eq_ignores_case() {
        assert!(Casemapping::Ascii.eq("Nick", "nick"));
        assert!(!Casemapping::Ascii.eq("Nick", "nick2"));
    }
}
