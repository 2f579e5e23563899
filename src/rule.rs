//! Rule engine: ordered accept/drop filters over
//! `(server, channel, origin, plugin, event)`.

use std::collections::HashSet;

use crate::error::RuleError;
use crate::irc::casemap::Casemapping;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Action {
    Accept,
    Drop,
}

impl Action {
    pub fn parse(s: &str) -> Option<Action> {
        match s {
            "accept" => Some(Action::Accept),
            "drop" => Some(Action::Drop),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Accept => "accept",
            Action::Drop => "drop",
        }
    }
}

/// One of the five match sets a [`Rule`] carries. An empty set matches
/// everything.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MatchSet(HashSet<String>);

impl MatchSet {
    pub fn new() -> Self {
        MatchSet(HashSet::new())
    }

    pub fn from_iter(values: impl IntoIterator<Item = String>) -> Self {
        MatchSet(values.into_iter().map(|v| v.to_lowercase()).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `candidate` must already be case-folded by the caller (the rule
    /// engine case-folds per server casemapping before calling this).
    pub fn matches(&self, candidate: &str) -> bool {
        self.0.is_empty() || self.0.contains(candidate)
    }

    pub fn insert(&mut self, value: &str) {
        self.0.insert(value.to_lowercase());
    }

    pub fn remove(&mut self, value: &str) {
        self.0.remove(&value.to_lowercase());
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

#[derive(Clone, Debug)]
pub struct Rule {
    pub servers: MatchSet,
    pub channels: MatchSet,
    pub origins: MatchSet,
    pub plugins: MatchSet,
    pub events: MatchSet,
    pub action: Action,
}

impl Rule {
    pub fn new(action: Action) -> Self {
        Rule {
            servers: MatchSet::new(),
            channels: MatchSet::new(),
            origins: MatchSet::new(),
            plugins: MatchSet::new(),
            events: MatchSet::new(),
            action,
        }
    }
}

/// The `(server, channel, origin, plugin, event)` tuple a rule is tested
/// against. Channel/origin are pre-casefolded by the caller using the
/// server's casemapping; servers/plugins/events are compared lowercase
/// (ASCII identifiers only, so plain `to_lowercase` is enough).
#[derive(Clone, Debug)]
pub struct Candidate<'a> {
    pub server: &'a str,
    pub channel: &'a str,
    pub origin_nick: &'a str,
    pub plugin: &'a str,
    pub event: &'a str,
    pub casemapping: Casemapping,
}

impl Rule {
    fn matches(&self, c: &Candidate<'_>) -> bool {
        let channel = self.casefold(c.casemapping, c.channel);
        let origin = self.casefold(c.casemapping, c.origin_nick);

        self.servers.matches(&c.server.to_lowercase())
            && self.channels.matches(&channel)
            && self.origins.matches(&origin)
            && self.plugins.matches(&c.plugin.to_lowercase())
            && self.events.matches(&c.event.to_lowercase())
    }

    fn casefold(&self, mapping: Casemapping, s: &str) -> String {
        mapping.to_lower(s)
    }
}

/// Ordered list of rules. Index is identity: insertions shift subsequent
/// indices up, removals shift them down.
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        RuleSet { rules: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn add_at_end(&mut self, rule: Rule) -> usize {
        self.rules.push(rule);
        self.rules.len() - 1
    }

    pub fn insert_at(&mut self, index: usize, rule: Rule) -> Result<(), RuleError> {
        if index > self.rules.len() {
            return Err(RuleError::InvalidIndex);
        }
        self.rules.insert(index, rule);
        Ok(())
    }

    pub fn remove_at(&mut self, index: usize) -> Result<Rule, RuleError> {
        if index >= self.rules.len() {
            return Err(RuleError::InvalidIndex);
        }
        Ok(self.rules.remove(index))
    }

    pub fn get(&self, index: usize) -> Result<&Rule, RuleError> {
        self.rules.get(index).ok_or(RuleError::InvalidIndex)
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut Rule, RuleError> {
        self.rules.get_mut(index).ok_or(RuleError::InvalidIndex)
    }

    /// Replaces the rule at `index` (used by `rule-edit`'s copy-then-swap).
    pub fn replace_at(&mut self, index: usize, rule: Rule) -> Result<(), RuleError> {
        let slot = self.rules.get_mut(index).ok_or(RuleError::InvalidIndex)?;
        *slot = rule;
        Ok(())
    }

    pub fn move_rule(&mut self, from: usize, to: usize) -> Result<(), RuleError> {
        if from >= self.rules.len() || to >= self.rules.len() {
            return Err(RuleError::InvalidIndex);
        }
        let rule = self.rules.remove(from);
        self.rules.insert(to, rule);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.rules.clear();
    }

    /// Folds the rule list over `candidate`, starting from `true`: each
    /// matching rule overwrites the running decision with its action.
    /// Empty rule list allows everything.
    pub fn solve(&self, candidate: &Candidate<'_>) -> bool {
        let mut allowed = true;
        for rule in &self.rules {
            if rule.matches(candidate) {
                allowed = rule.action == Action::Accept;
            }
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate<'a>(server: &'a str, channel: &'a str, origin: &'a str, plugin: &'a str, event: &'a str) -> Candidate<'a> {
        Candidate {
            server,
            channel,
            origin_nick: origin,
            plugin,
            event,
            casemapping: Casemapping::Ascii,
        }
    }

    #[test]
    fn empty_rules_allow_everything() {
        let rules = RuleSet::new();
        assert!(rules.solve(&candidate("s", "#c", "nick", "p", "onMessage")));
    }

    #[test]
    fn determinism() {
        let mut rules = RuleSet::new();
        let mut r = Rule::new(Action::Drop);
        r.servers.insert("s1");
        rules.add_at_end(r);

        let c = candidate("s1", "#c", "nick", "p", "onMessage");
        assert_eq!(rules.solve(&c), rules.solve(&c));
        assert!(!rules.solve(&c));
    }

    #[test]
    fn casemapping_insensitive() {
        let mut rules = RuleSet::new();
        let mut r = Rule::new(Action::Drop);
        r.channels.insert("#staff");
        rules.add_at_end(r);

        let lower = candidate("s", "#staff", "nick", "p", "onMessage");
        let upper = candidate("s", "#STAFF", "NICK", "p", "onMessage");
        assert_eq!(rules.solve(&lower), rules.solve(&upper));
    }

    #[test]
    fn scenario_s2_add_move_remove() {
        let mut rules = RuleSet::new();
        let mut a = Rule::new(Action::Drop);
        a.servers.insert("s1");
        rules.add_at_end(a);

        let mut b = Rule::new(Action::Accept);
        b.channels.insert("#c");
        rules.add_at_end(b);

        assert_eq!(rules.len(), 2);

        rules.move_rule(0, 1).unwrap();
        assert!(rules.get(0).unwrap().channels.matches("#c"));
        assert!(rules.get(1).unwrap().servers.matches("s1"));

        rules.remove_at(0).unwrap();
        assert_eq!(rules.len(), 1);
        assert!(rules.get(0).unwrap().servers.matches("s1"));
    }

    #[test]
    fn scenario_s3_filtering() {
        let mut rules = RuleSet::new();
        let mut drop_staff_cmd = Rule::new(Action::Drop);
        drop_staff_cmd.channels.insert("#staff");
        drop_staff_cmd.events.insert("onCommand");
        rules.add_at_end(drop_staff_cmd);

        let mut allow_unsafe = Rule::new(Action::Accept);
        allow_unsafe.servers.insert("unsafe");
        allow_unsafe.channels.insert("#staff");
        allow_unsafe.events.insert("onCommand");
        rules.add_at_end(allow_unsafe);

        assert!(!rules.solve(&candidate("safe", "#staff", "n", "p", "onCommand")));
        assert!(rules.solve(&candidate("unsafe", "#staff", "n", "p", "onCommand")));
        assert!(rules.solve(&candidate("safe", "#general", "n", "p", "onMessage")));
    }

    #[test]
    fn index_shift_on_insert_and_remove() {
        let mut rules = RuleSet::new();
        rules.add_at_end(Rule::new(Action::Accept)); // 0
        rules.add_at_end(Rule::new(Action::Drop)); // 1

        let mut marker = Rule::new(Action::Accept);
        marker.plugins.insert("marker");
        rules.insert_at(1, marker).unwrap();

        assert!(rules.get(1).unwrap().plugins.matches("marker"));
        assert_eq!(rules.len(), 3);

        rules.remove_at(0).unwrap();
        assert!(rules.get(0).unwrap().plugins.matches("marker"));
    }
}
