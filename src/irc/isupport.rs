//! RPL_ISUPPORT (005) parameter tracking.

use std::collections::HashMap;

use crate::irc::casemap::Casemapping;

#[derive(Clone, Debug)]
pub struct Isupport {
    entries: HashMap<String, Option<String>>,
}

impl Default for Isupport {
    fn default() -> Self {
        Isupport {
            entries: HashMap::new(),
        }
    }
}

impl Isupport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one 005 line's tokens (everything but the trailing
    /// "are supported by this server" human text) into the accumulated
    /// set. Later values for the same key win, matching how real servers
    /// resend 005 after certain state changes.
    pub fn apply(&mut self, params: &[String]) {
        for p in params {
            if p.is_empty() || p.contains(' ') {
                continue;
            }
            match p.split_once('=') {
                Some((k, v)) => {
                    self.entries.insert(k.to_ascii_uppercase(), Some(v.to_string()));
                }
                None => {
                    self.entries.insert(p.to_ascii_uppercase(), None);
                }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.entries.get(key).map(|v| v.as_deref())
    }

    pub fn casemapping(&self) -> Casemapping {
        self.get("CASEMAPPING")
            .flatten()
            .map(Casemapping::parse)
            .unwrap_or_default()
    }

    pub fn chantypes(&self) -> String {
        self.get("CHANTYPES")
            .flatten()
            .map(str::to_string)
            .unwrap_or_else(|| "#&".to_string())
    }

    pub fn charset(&self) -> String {
        self.get("CHARSET")
            .flatten()
            .map(str::to_string)
            .unwrap_or_else(|| "utf-8".to_string())
    }

    /// `PREFIX=(ov)@+` → `[('o', '@'), ('v', '+')]`.
    pub fn prefix_map(&self) -> Vec<(char, char)> {
        let raw = self.get("PREFIX").flatten().unwrap_or("(ov)@+");
        let Some(open) = raw.find('(') else {
            return default_prefix_map();
        };
        let Some(close) = raw[open..].find(')') else {
            return default_prefix_map();
        };
        let close = open + close;
        let modes = &raw[open + 1..close];
        let marks = &raw[close + 1..];
        modes.chars().zip(marks.chars()).collect()
    }

    pub fn chanmodes(&self) -> String {
        self.get("CHANMODES")
            .flatten()
            .map(str::to_string)
            .unwrap_or_else(|| "b,k,l,imnpst".to_string())
    }

    pub fn is_channel(&self, name: &str) -> bool {
        name.chars()
            .next()
            .map(|c| self.chantypes().contains(c))
            .unwrap_or(false)
    }
}

fn default_prefix_map() -> Vec<(char, char)> {
    vec![('o', '@'), ('v', '+')]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_tokens() {
        let mut isupport = Isupport::new();
        isupport.apply(&[
            "CHANTYPES=#&".to_string(),
            "PREFIX=(ov)@+".to_string(),
            "CASEMAPPING=rfc1459".to_string(),
        ]);
        assert_eq!(isupport.chantypes(), "#&");
        assert_eq!(isupport.casemapping(), Casemapping::Rfc1459);
        assert_eq!(isupport.prefix_map(), vec![('o', '@'), ('v', '+')]);
        assert!(isupport.is_channel("#staff"));
        assert!(!isupport.is_channel("staff"));
    }

    #[test]
    fn unknown_server_defaults() {
        let isupport = Isupport::new();
        assert_eq!(isupport.casemapping(), Casemapping::Ascii);
        assert_eq!(isupport.chantypes(), "#&");
    }
}
