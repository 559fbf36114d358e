//! Minimal reading of IOS-style configuration line sets.
//!
//! This is not a config parser. It only tracks which sub-mode a line is typed
//! in (interface, line, other) and normalises interface names, which is all
//! the safety rules need.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::net::IpAddr;

use crate::registry::DeviceProfile;

/// Canonical interface type names, in abbreviation-resolution order.
const INTERFACE_KINDS: &[&str] = &[
    "gigabitethernet",
    "fastethernet",
    "tengigabitethernet",
    "twentyfivegige",
    "fortygigabitethernet",
    "hundredgige",
    "ethernet",
    "loopback",
    "vlan",
    "port-channel",
    "tunnel",
    "serial",
    "management",
    "mgmt",
    "bdi",
    "dialer",
    "virtual-template",
    "multilink",
    "bundle-ether",
];

/// Upper bound on members expanded from one `interface range` segment.
const MAX_RANGE_MEMBERS: u32 = 4096;

static INTERFACE_RE: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"^([a-z][a-z-]*?)\s*(\d+(?:[/:.]\d+)*)$") {
        Ok(re) => re,
        Err(err) => panic!("invalid INTERFACE_RE regex: {err}"),
    });

static RANGE_SEGMENT_RE: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"^([a-z][a-z-]*?)\s*((?:\d+[/:])*)(\d+)\s*(?:-\s*(\d+))?$") {
        Ok(re) => re,
        Err(err) => panic!("invalid RANGE_SEGMENT_RE regex: {err}"),
    }
});

/// Sub-modes other than `interface` and `line` that a line set can enter.
static SUBMODE_RE: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(
        r"^(router|ip(v6)? access-list|vlan|class-map|policy-map|route-map|key chain|ip dhcp pool|controller|vrf definition|ip vrf|crypto isakmp policy|crypto map|aaa group server|track|object-group|archive)\b",
    ) {
        Ok(re) => re,
        Err(err) => panic!("invalid SUBMODE_RE regex: {err}"),
    }
});

/// A normalised interface identifier: `Gi0/0` and `GigabitEthernet 0/0` are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterfaceName {
    kind: String,
    id: String,
}

impl InterfaceName {
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        let caps = INTERFACE_RE.captures(&lowered)?;
        Some(Self {
            kind: canonical_kind(&caps[1]),
            id: caps[2].to_string(),
        })
    }
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.id)
    }
}

fn canonical_kind(abbrev: &str) -> String {
    if let Some(exact) = INTERFACE_KINDS.iter().find(|k| **k == abbrev) {
        return exact.to_string();
    }
    INTERFACE_KINDS
        .iter()
        .find(|k| k.starts_with(abbrev))
        .map(|k| k.to_string())
        .unwrap_or_else(|| abbrev.to_string())
}

/// Expands `gi0/1 - 4, gi0/8` into its member interfaces.
fn parse_range(range: &str) -> Vec<InterfaceName> {
    let mut members = Vec::new();
    for segment in range.split(',') {
        let Some(caps) = RANGE_SEGMENT_RE.captures(segment.trim()) else {
            continue;
        };
        let kind = canonical_kind(&caps[1]);
        let prefix = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let Ok(first) = caps[3].parse::<u32>() else {
            continue;
        };
        let last = caps
            .get(4)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(first);
        let last = last.min(first.saturating_add(MAX_RANGE_MEMBERS));
        for n in first..=last {
            members.push(InterfaceName {
                kind: kind.clone(),
                id: format!("{prefix}{n}"),
            });
        }
    }
    members
}

/// Configuration mode a line is entered in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigContext {
    Global,
    /// `interface X` or `interface range ...`; holds every member.
    Interface(Vec<InterfaceName>),
    /// `line vty 0 4`, `line con 0`; holds the text after `line`.
    Line(String),
    /// Any other sub-mode, holding the line that entered it.
    Other(String),
}

impl ConfigContext {
    pub fn covers_interface(&self, name: &InterfaceName) -> bool {
        matches!(self, ConfigContext::Interface(members) if members.contains(name))
    }

    pub fn is_interface(&self) -> bool {
        matches!(self, ConfigContext::Interface(_))
    }

    /// `line vty ...`, also when typed as `lin v 0 4`.
    pub fn is_vty(&self) -> bool {
        matches!(
            self,
            ConfigContext::Line(which)
                if which.split_whitespace().next().is_some_and(|w| keyword(w, "vty", 1))
        )
    }
}

/// One line of a change set with the mode it applies in.
#[derive(Debug, Clone)]
pub struct ConfigLine<'a> {
    pub index: usize,
    pub raw: &'a str,
    /// Lowercased, whitespace-collapsed text.
    pub text: String,
    pub context: ConfigContext,
}

impl ConfigLine<'_> {
    /// Blank lines and `!` comments carry no configuration.
    pub fn is_content(&self) -> bool {
        !self.text.is_empty() && !self.text.starts_with('!')
    }

    pub fn tokens(&self) -> Vec<&str> {
        self.text.split_whitespace().collect()
    }
}

/// True when `word` is an accepted abbreviation of `keyword`.
pub fn keyword(word: &str, full: &str, min_len: usize) -> bool {
    word.len() >= min_len.min(full.len()) && full.starts_with(word)
}

/// Splits `interface ...` into its argument, accepting IOS abbreviations.
fn interface_argument(text: &str) -> Option<&str> {
    let (first, rest) = text.split_once(' ')?;
    keyword(first, "interface", 3).then_some(rest.trim())
}

/// Splits `line ...` into its argument, accepting IOS abbreviations.
fn line_argument(text: &str) -> Option<&str> {
    let (first, rest) = text.split_once(' ')?;
    keyword(first, "line", 3).then_some(rest.trim())
}

/// `end`, `exit` and their abbreviations return to global configuration.
fn leaves_submode(text: &str) -> bool {
    text == "end" || (!text.contains(' ') && keyword(text, "exit", 3))
}

/// Walks a change set and annotates every line with its mode.
pub fn walk(lines: &[String]) -> Vec<ConfigLine<'_>> {
    let mut context = ConfigContext::Global;
    let mut out = Vec::with_capacity(lines.len());

    for (index, raw) in lines.iter().enumerate() {
        let text = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();

        if !text.is_empty() && !text.starts_with('!') {
            if leaves_submode(&text) {
                context = ConfigContext::Global;
            } else if let Some(arg) = interface_argument(&text) {
                context = match arg.split_once(' ') {
                    Some((word, range)) if keyword(word, "range", 3) => {
                        ConfigContext::Interface(parse_range(range))
                    }
                    _ => ConfigContext::Interface(InterfaceName::parse(arg).into_iter().collect()),
                };
            } else if let Some(which) = line_argument(&text) {
                context = ConfigContext::Line(which.to_string());
            } else if SUBMODE_RE.is_match(&text) {
                context = ConfigContext::Other(text.clone());
            }
        }

        out.push(ConfigLine {
            index,
            raw: raw.as_str(),
            text,
            context: context.clone(),
        });
    }
    out
}

/// A change set read against one device profile.
#[derive(Debug)]
pub struct ChangeSet<'a> {
    pub profile: &'a DeviceProfile,
    pub lines: Vec<ConfigLine<'a>>,
    /// Registered management interface. `None` means unknown, and then every
    /// interface is screened as if it carried the management session.
    pub management_interface: Option<InterfaceName>,
    /// Management address when it is an IP literal.
    pub management_ip: Option<IpAddr>,
}

impl<'a> ChangeSet<'a> {
    pub fn new(profile: &'a DeviceProfile, lines: &'a [String]) -> Self {
        let lines = walk(lines);
        let management_ip = profile.address().parse::<IpAddr>().ok();
        let management_interface = profile
            .management_interface()
            .and_then(InterfaceName::parse);
        Self {
            profile,
            lines,
            management_interface,
            management_ip,
        }
    }

    pub fn content(&self) -> impl Iterator<Item = &ConfigLine<'a>> {
        self.lines.iter().filter(|l| l.is_content())
    }

    /// True when `name` may carry the management session.
    pub fn may_carry_management(&self, name: &InterfaceName) -> bool {
        self.management_interface
            .as_ref()
            .is_none_or(|mgmt| mgmt == name)
    }

    /// The interface of `context` that may carry the management session.
    ///
    /// With no registered management interface any interface context
    /// qualifies, including one whose name could not be parsed.
    pub fn management_target(&self, context: &ConfigContext) -> Option<String> {
        let ConfigContext::Interface(members) = context else {
            return None;
        };
        match members.iter().find(|m| self.may_carry_management(m)) {
            Some(member) => Some(member.to_string()),
            None if self.management_interface.is_none() => {
                Some("an unrecognised interface".to_string())
            }
            None => None,
        }
    }

    /// True when `text` mentions the management IP as a whole token.
    pub fn mentions_management_ip(&self, text: &str) -> bool {
        let Some(ip) = self.management_ip else {
            return false;
        };
        let ip = ip.to_string().to_ascii_lowercase();
        text.split(|c: char| c.is_whitespace() || c == '/' || c == ',')
            .any(|token| token == ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn abbreviations_normalise_to_the_same_interface() {
        let full = InterfaceName::parse("GigabitEthernet0/0");
        assert_eq!(InterfaceName::parse("gi0/0"), full);
        assert_eq!(InterfaceName::parse("Gig 0/0"), full);
        assert_ne!(InterfaceName::parse("gi0/1"), full);
        assert_eq!(
            InterfaceName::parse("Te1/0/1").map(|n| n.to_string()),
            Some("tengigabitethernet1/0/1".to_string())
        );
        assert_eq!(
            InterfaceName::parse("Po10").map(|n| n.to_string()),
            Some("port-channel10".to_string())
        );
    }

    #[test]
    fn walk_tracks_interface_and_line_contexts() {
        let set = lines(&[
            "interface Gi0/0",
            " description uplink",
            "exit",
            "line vty 0 4",
            " transport input ssh",
            "end",
            "hostname R1",
        ]);
        let walked = walk(&set);
        let gi00 = InterfaceName::parse("gi0/0").expect("name");

        assert!(walked[1].context.covers_interface(&gi00));
        assert_eq!(walked[2].context, ConfigContext::Global);
        assert!(walked[4].context.is_vty());
        assert_eq!(walked[6].context, ConfigContext::Global);
    }

    #[test]
    fn abbreviated_interface_command_enters_context() {
        let set = lines(&["int gi0/0", "shut"]);
        let walked = walk(&set);
        let gi00 = InterfaceName::parse("GigabitEthernet0/0").expect("name");
        assert!(walked[1].context.covers_interface(&gi00));
    }

    #[test]
    fn interface_range_expands_members() {
        let set = lines(&["interface range gi0/0 - 2, gi0/5"]);
        let walked = walk(&set);
        let ConfigContext::Interface(members) = &walked[0].context else {
            panic!("expected interface context");
        };
        let names: Vec<String> = members.iter().map(|m| m.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "gigabitethernet0/0",
                "gigabitethernet0/1",
                "gigabitethernet0/2",
                "gigabitethernet0/5",
            ]
        );
    }

    #[test]
    fn abbreviated_line_and_exit_commands_change_context() {
        let set = lines(&["lin vty 0 4", "transport in none", "exi", "lin con 0", "no login"]);
        let walked = walk(&set);
        assert!(walked[1].context.is_vty());
        assert_eq!(walked[2].context, ConfigContext::Global);
        assert_eq!(walked[4].context, ConfigContext::Line("con 0".to_string()));
        assert!(!walked[4].context.is_vty());
    }

    #[test]
    fn every_interface_may_carry_management_when_none_is_registered() {
        let registry = crate::registry::DeviceRegistry::from_json_str(
            r#"{
                "bare": { "address": "10.0.0.1", "username": "u", "password": "p" },
                "known": { "address": "10.0.0.2", "username": "u", "password": "p",
                           "management_interface": "Gi0/0" }
            }"#,
        )
        .expect("registry");
        let set = lines(&["interface Gi0/3", "interface Loopback0"]);

        let bare = ChangeSet::new(registry.lookup("bare").expect("bare"), &set);
        assert!(bare.management_target(&bare.lines[0].context).is_some());
        assert!(bare.management_target(&bare.lines[1].context).is_some());
        assert!(bare.management_target(&ConfigContext::Global).is_none());

        let known = ChangeSet::new(registry.lookup("known").expect("known"), &set);
        assert!(known.management_target(&known.lines[0].context).is_none());
    }

    #[test]
    fn comments_do_not_leave_the_current_mode() {
        let set = lines(&["interface Loopback0", "!", "shutdown"]);
        let walked = walk(&set);
        assert!(!walked[1].is_content());
        assert!(walked[2].context.is_interface());
    }
}
