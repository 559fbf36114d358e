//! Built-in safety rules.
//!
//! Each rule looks for one class of self-lockout: losing the interface that
//! carries the management session, losing the way in (vty transport, the
//! management user, SSH keys), or submitting nothing at all.

use super::SafetyRule;
use super::context::{ChangeSet, ConfigLine, InterfaceName, keyword};

pub const MANAGEMENT_INTERFACE_RULE: &str = "management-interface-protection";
pub const ACCESS_PATH_RULE: &str = "access-path-protection";
pub const EMPTY_CHANGE_SET_RULE: &str = "empty-change-set";

/// Rejects disabling, re-addressing or filtering the management interface.
///
/// When the profile names no management interface, every interface is
/// treated as possibly carrying the management session.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManagementInterfaceRule;

impl ManagementInterfaceRule {
    /// Sub-commands that take the management interface away when typed under it.
    fn disrupts_interface(tokens: &[&str]) -> Option<&'static str> {
        let first = *tokens.first()?;
        let second = tokens.get(1).copied().unwrap_or("");
        let third = tokens.get(2).copied().unwrap_or("");
        let is_ip = |word: &str| word == "ip" || word == "ipv6";

        if keyword(first, "shutdown", 3) {
            return Some("shuts down");
        }
        if is_ip(first) {
            if keyword(second, "address", 4) {
                return Some("re-addresses");
            }
            if keyword(second, "access-group", 8) || keyword(second, "traffic-filter", 3) {
                return Some("applies an access list to");
            }
            if keyword(second, "vrf", 3) && keyword(third, "forwarding", 1) {
                return Some("moves into another VRF");
            }
        }
        if keyword(first, "vrf", 3) && keyword(second, "forwarding", 1) {
            return Some("moves into another VRF");
        }
        if first == "no" {
            if is_ip(second) && keyword(third, "address", 4) {
                return Some("removes the address of");
            }
            if keyword(second, "switchport", 2) && tokens.len() == 2 {
                return Some("converts to a routed port");
            }
        }
        if keyword(first, "default", 3) {
            return Some("resets");
        }
        None
    }

    fn describe(change: &ChangeSet<'_>, target: &str) -> String {
        match change.management_interface {
            Some(_) => format!("management interface {target}"),
            None => format!(
                "interface {target}, which may carry the management session \
                 (no management interface is registered)"
            ),
        }
    }

    fn check_line(change: &ChangeSet<'_>, line: &ConfigLine<'_>) -> Option<String> {
        let tokens = line.tokens();

        if let Some(target) = change.management_target(&line.context)
            && let Some(action) = Self::disrupts_interface(&tokens)
        {
            return Some(format!(
                "line {} '{}' {action} {} of '{}'",
                line.index + 1,
                line.raw.trim(),
                Self::describe(change, &target),
                change.profile.name()
            ));
        }

        // `no interface X` / `default interface X` at any level.
        if let [verb, word, rest @ ..] = tokens.as_slice()
            && !rest.is_empty()
            && (*verb == "no" || keyword(verb, "default", 3))
            && keyword(word, "interface", 3)
        {
            let target = rest.join(" ");
            let protected = match InterfaceName::parse(&target) {
                Some(name) => change.may_carry_management(&name),
                None => change.management_interface.is_none(),
            };
            if protected {
                return Some(format!(
                    "line {} '{}' removes {} of '{}'",
                    line.index + 1,
                    line.raw.trim(),
                    Self::describe(change, &target),
                    change.profile.name()
                ));
            }
        }

        // The management address itself being assigned or removed anywhere.
        let touches_address = match tokens.as_slice() {
            ["ip" | "ipv6", addr, ..] => keyword(addr, "address", 4),
            ["no", "ip" | "ipv6", addr, ..] => keyword(addr, "address", 4),
            _ => false,
        };
        if touches_address && change.mentions_management_ip(&line.text) {
            return Some(format!(
                "line {} '{}' reassigns management address {} of '{}'",
                line.index + 1,
                line.raw.trim(),
                change.profile.address(),
                change.profile.name()
            ));
        }
        None
    }
}

impl SafetyRule for ManagementInterfaceRule {
    fn id(&self) -> &'static str {
        MANAGEMENT_INTERFACE_RULE
    }

    fn evaluate(&self, change: &ChangeSet<'_>) -> Option<String> {
        change
            .content()
            .find_map(|line| Self::check_line(change, line))
    }
}

/// Rejects removing the way back in unless a later line puts it back.
///
/// Keywords are matched with the same abbreviation rules the device applies.
#[derive(Debug, Default, Clone, Copy)]
pub struct AccessPathRule;

/// Something a removal needs to see later in the change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reprovision {
    VtyLines,
    VtySsh,
    VtyLogin,
    ManagementUser,
    HostKeys,
    EnableSecret,
}

fn is_line_vty(line: &str, vty: &str) -> bool {
    keyword(line, "line", 3) && keyword(vty, "vty", 1)
}

fn is_transport_input(transport: &str, input: &str) -> bool {
    keyword(transport, "transport", 2) && keyword(input, "input", 1)
}

fn is_enable_secret(enable: &str, secret: &str) -> bool {
    keyword(enable, "enable", 2) && (keyword(secret, "secret", 1) || keyword(secret, "password", 1))
}

impl AccessPathRule {
    fn removal(change: &ChangeSet<'_>, line: &ConfigLine<'_>) -> Option<(Reprovision, String)> {
        let tokens = line.tokens();
        let user = change.profile.username().to_ascii_lowercase();
        let vty = line.context.is_vty();

        match tokens.as_slice() {
            ["no", l, v, ..] if is_line_vty(l, v) => {
                Some((Reprovision::VtyLines, "removes the vty lines".to_string()))
            }
            ["no", u, name, ..] if keyword(u, "username", 4) && *name == user => Some((
                Reprovision::ManagementUser,
                format!("removes management user '{}'", change.profile.username()),
            )),
            [c, k, z, ..]
                if keyword(c, "crypto", 2) && *k == "key" && keyword(z, "zeroize", 1) =>
            {
                Some((
                    Reprovision::HostKeys,
                    "erases the SSH host keys".to_string(),
                ))
            }
            ["no", e, s, ..]
                if is_enable_secret(e, s) && change.profile.enable_secret().is_some() =>
            {
                Some((
                    Reprovision::EnableSecret,
                    "removes the enable secret used for privileged access".to_string(),
                ))
            }
            ["no", l, ..] if vty && keyword(l, "login", 4) => Some((
                Reprovision::VtyLogin,
                "removes login from the vty lines".to_string(),
            )),
            ["no", t, i, ..] if vty && is_transport_input(t, i) => Some((
                Reprovision::VtySsh,
                "removes the vty transport".to_string(),
            )),
            [t, i, protocols @ ..]
                if vty && is_transport_input(t, i) && !Self::allows_ssh(protocols) =>
            {
                Some((
                    Reprovision::VtySsh,
                    "stops accepting SSH on the vty lines".to_string(),
                ))
            }
            _ => None,
        }
    }

    fn allows_ssh(protocols: &[&str]) -> bool {
        protocols
            .iter()
            .any(|p| keyword(p, "ssh", 1) || keyword(p, "all", 1))
    }

    fn provides(change: &ChangeSet<'_>, line: &ConfigLine<'_>, need: Reprovision) -> bool {
        let tokens = line.tokens();
        let user = change.profile.username().to_ascii_lowercase();
        match (need, tokens.as_slice()) {
            (Reprovision::VtyLines, [l, v, ..]) => is_line_vty(l, v),
            (Reprovision::VtySsh, [t, i, protocols @ ..]) => {
                line.context.is_vty() && is_transport_input(t, i) && Self::allows_ssh(protocols)
            }
            (Reprovision::VtyLogin, [l, ..]) => line.context.is_vty() && keyword(l, "login", 4),
            (Reprovision::ManagementUser, [u, name, rest @ ..]) => {
                keyword(u, "username", 4)
                    && *name == user
                    && rest
                        .iter()
                        .any(|t| keyword(t, "password", 4) || keyword(t, "secret", 3))
            }
            (Reprovision::HostKeys, [c, k, g, ..]) => {
                keyword(c, "crypto", 2) && *k == "key" && keyword(g, "generate", 1)
            }
            (Reprovision::EnableSecret, [e, s, _, ..]) => is_enable_secret(e, s),
            _ => false,
        }
    }
}

impl SafetyRule for AccessPathRule {
    fn id(&self) -> &'static str {
        ACCESS_PATH_RULE
    }

    fn evaluate(&self, change: &ChangeSet<'_>) -> Option<String> {
        let lines: Vec<&ConfigLine<'_>> = change.content().collect();
        for (pos, line) in lines.iter().enumerate() {
            let Some((need, what)) = Self::removal(change, line) else {
                continue;
            };
            let restored = lines[pos + 1..]
                .iter()
                .any(|later| Self::provides(change, later, need));
            if !restored {
                return Some(format!(
                    "line {} '{}' {what} on '{}' without restoring it later in the same change",
                    line.index + 1,
                    line.raw.trim(),
                    change.profile.name()
                ));
            }
        }
        None
    }
}

/// Rejects change sets with no configuration content.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyChangeSetRule;

impl SafetyRule for EmptyChangeSetRule {
    fn id(&self) -> &'static str {
        EMPTY_CHANGE_SET_RULE
    }

    fn evaluate(&self, change: &ChangeSet<'_>) -> Option<String> {
        if change.content().next().is_none() {
            return Some("change set is empty; there is nothing to apply".to_string());
        }
        None
    }
}
