//! Tagged firewall rules for routing overlay traffic.
//!
//! Every rule created here carries the [`OWNERSHIP_TAG`] comment. Rules
//! without it are listed but never modified or deleted.

use crate::error::{Error, Result};
use log::{debug, info};
use std::fmt;
use std::net::Ipv4Addr;
use std::process::Command;

/// Comment attached to every rule this tool creates.
pub const OWNERSHIP_TAG: &str = "wg-overlay";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Table {
    Filter,
    Nat,
    Other(String),
}

impl Table {
    pub fn from_name(name: &str) -> Self {
        match name {
            "filter" => Table::Filter,
            "nat" => Table::Nat,
            other => Table::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Table::Filter => "filter",
            Table::Nat => "nat",
            Table::Other(name) => name,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule owned by this tool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FirewallRule {
    pub table: Table,
    pub chain: String,
    pub match_spec: Vec<String>,
    pub action: String,
    pub tag: String,
}

impl FirewallRule {
    pub fn new(table: Table, chain: &str, match_spec: &[&str], action: &str) -> Self {
        Self {
            table,
            chain: chain.to_string(),
            match_spec: match_spec.iter().map(|s| s.to_string()).collect(),
            action: action.to_string(),
            tag: OWNERSHIP_TAG.to_string(),
        }
    }

    /// Match arguments, ownership comment and target, as passed to iptables after the chain.
    pub fn rule_args(&self) -> Vec<String> {
        let mut args = self.match_spec.clone();
        args.extend(["-m", "comment", "--comment"].iter().map(|s| s.to_string()));
        args.push(self.tag.clone());
        args.push("-j".into());
        args.extend(self.action.split_whitespace().map(str::to_string));
        args
    }

    /// The rule as it appears in `iptables-save` output.
    pub fn save_line(&self) -> String {
        format!("-A {} {}", self.chain, self.rule_args().join(" "))
    }

    /// Shell command for the interface-up hook. Checks first so re-running is harmless.
    pub fn up_command(&self) -> String {
        let args = self.rule_args().join(" ");
        format!(
            "iptables -t {t} -C {c} {a} 2>/dev/null || iptables -t {t} -A {c} {a}",
            t = self.table,
            c = self.chain,
            a = args
        )
    }

    /// Shell command for the interface-down hook. A missing rule is not an error.
    pub fn down_command(&self) -> String {
        format!(
            "iptables -t {} -D {} {} 2>/dev/null || true",
            self.table,
            self.chain,
            self.rule_args().join(" ")
        )
    }
}

impl fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.table, self.save_line())
    }
}

/// Any rule observed in the live table or a persisted rule file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveRule {
    pub table: Table,
    pub chain: String,
    pub match_spec: Vec<String>,
    pub action: String,
    pub comment: Option<String>,
}

impl LiveRule {
    /// Parse an `-A CHAIN ...` line. Returns None for anything else.
    pub fn parse(table: &Table, line: &str) -> Option<Self> {
        let tokens = split_args(line);
        if tokens.len() < 2 || tokens[0] != "-A" {
            return None;
        }
        let chain = tokens[1].clone();
        let mut match_spec = Vec::new();
        let mut action = String::new();
        let mut comment = None;
        let mut i = 2;
        while i < tokens.len() {
            if tokens[i] == "-m"
                && tokens.get(i + 1).map(String::as_str) == Some("comment")
                && tokens.get(i + 2).map(String::as_str) == Some("--comment")
            {
                comment = tokens.get(i + 3).cloned();
                i += 4;
                continue;
            }
            if tokens[i] == "-j" {
                action = tokens[i + 1..].join(" ");
                break;
            }
            match_spec.push(tokens[i].clone());
            i += 1;
        }
        Some(Self {
            table: table.clone(),
            chain,
            match_spec,
            action,
            comment,
        })
    }

    pub fn is_owned(&self) -> bool {
        self.comment.as_deref() == Some(OWNERSHIP_TAG)
    }

    /// The owned rule this entry represents, if it bears the ownership tag.
    pub fn owned(&self) -> Option<FirewallRule> {
        self.is_owned().then(|| FirewallRule {
            table: self.table.clone(),
            chain: self.chain.clone(),
            match_spec: self.match_spec.clone(),
            action: self.action.clone(),
            tag: OWNERSHIP_TAG.to_string(),
        })
    }

    /// Same table, chain, match and target; the comment is not compared.
    pub fn equivalent(&self, rule: &FirewallRule) -> bool {
        self.table == rule.table
            && self.chain == rule.chain
            && self.match_spec == rule.match_spec
            && self.action == rule.action
    }
}

/// Split an iptables argument line, honouring double quotes.
fn split_args(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut quoted = false;
    let mut started = false;
    for ch in line.trim().chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                started = true;
            }
            c if c.is_whitespace() && !quoted => {
                if started {
                    out.push(std::mem::take(&mut cur));
                    started = false;
                }
            }
            c => {
                cur.push(c);
                started = true;
            }
        }
    }
    if started {
        out.push(cur);
    }
    out
}

/// The rules that route overlay traffic out through one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRuleSet {
    pub subnet: Ipv4Addr,
    pub overlay_interface: String,
    pub outbound_interface: String,
    pub listen_port: u16,
}

impl FirewallRuleSet {
    pub fn new(subnet: Ipv4Addr, overlay_interface: &str, outbound_interface: &str, listen_port: u16) -> Self {
        Self {
            subnet,
            overlay_interface: overlay_interface.to_string(),
            outbound_interface: outbound_interface.to_string(),
            listen_port,
        }
    }

    /// Rules applied when the overlay interface comes up, in application order.
    pub fn activation_rules(&self) -> Vec<FirewallRule> {
        let cidr = format!("{}/24", self.subnet);
        let port = self.listen_port.to_string();
        let wg = self.overlay_interface.as_str();
        let out = self.outbound_interface.as_str();
        vec![
            FirewallRule::new(Table::Nat, "POSTROUTING", &["-s", &cidr, "-o", out], "MASQUERADE"),
            FirewallRule::new(
                Table::Filter,
                "INPUT",
                &["-p", "udp", "-m", "udp", "--dport", &port, "-m", "conntrack", "--ctstate", "NEW"],
                "ACCEPT",
            ),
            FirewallRule::new(Table::Filter, "INPUT", &["-i", wg], "ACCEPT"),
            FirewallRule::new(Table::Filter, "FORWARD", &["-i", wg, "-o", out], "ACCEPT"),
            FirewallRule::new(Table::Filter, "FORWARD", &["-i", out, "-o", wg], "ACCEPT"),
        ]
    }

    /// Rules removed when the interface goes down: the activation rules in reverse order.
    pub fn revocation_rules(&self) -> Vec<FirewallRule> {
        let mut rules = self.activation_rules();
        rules.reverse();
        rules
    }

    pub fn up_hooks(&self) -> Vec<String> {
        self.activation_rules().iter().map(FirewallRule::up_command).collect()
    }

    pub fn down_hooks(&self) -> Vec<String> {
        self.revocation_rules().iter().map(FirewallRule::down_command).collect()
    }
}

/// Access to the live packet filter.
pub trait FirewallBackend {
    /// Every rule across all tables.
    fn list(&self) -> Result<Vec<LiveRule>>;
    fn append(&self, rule: &FirewallRule) -> Result<()>;
    fn delete(&self, rule: &FirewallRule) -> Result<()>;
}

/**
 * @brief Insert each rule unless an equivalent rule is already live.
 * @return Number of rules inserted.
 */
pub fn apply_live(backend: &dyn FirewallBackend, rules: &[FirewallRule]) -> Result<usize> {
    let live = backend.list()?;
    let mut inserted = 0;
    for rule in rules {
        if live.iter().any(|l| l.equivalent(rule)) {
            debug!("rule already present, skipping: {}", rule);
            continue;
        }
        backend.append(rule)?;
        info!("applied {}", rule);
        inserted += 1;
    }
    Ok(inserted)
}

/**
 * @brief Delete the tagged live copy of each rule. Absent rules are skipped.
 * @return Number of rules deleted.
 */
pub fn remove_live(backend: &dyn FirewallBackend, rules: &[FirewallRule]) -> Result<usize> {
    let live = backend.list()?;
    let mut removed = 0;
    for rule in rules {
        if !live.iter().any(|l| l.is_owned() && l.equivalent(rule)) {
            debug!("rule not live, nothing to remove: {}", rule);
            continue;
        }
        backend.delete(rule)?;
        info!("removed {}", rule);
        removed += 1;
    }
    Ok(removed)
}

/// Delete every live rule that bears the ownership tag.
pub fn remove_owned_live(backend: &dyn FirewallBackend) -> Result<usize> {
    let owned: Vec<FirewallRule> = backend.list()?.iter().filter_map(LiveRule::owned).collect();
    for rule in &owned {
        backend.delete(rule)?;
        info!("removed {}", rule);
    }
    Ok(owned.len())
}

/// Live rules lacking the ownership tag.
pub fn foreign_live_rules(backend: &dyn FirewallBackend) -> Result<Vec<LiveRule>> {
    Ok(backend.list()?.into_iter().filter(|r| !r.is_owned()).collect())
}

/// Live firewall driven through the `iptables` command line tools.
#[derive(Debug, Default, Clone)]
pub struct IptablesBackend;

impl IptablesBackend {
    fn run(&self, program: &str, args: &[String]) -> Result<String> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::tool(program, format!("failed to run: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::tool(
                program,
                format!("{} {}: {}", program, args.join(" "), stderr.trim()),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn rule_command(&self, op: &str, rule: &FirewallRule) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            rule.table.to_string(),
            op.to_string(),
            rule.chain.clone(),
        ];
        args.extend(rule.rule_args());
        args
    }
}

impl FirewallBackend for IptablesBackend {
    fn list(&self) -> Result<Vec<LiveRule>> {
        let dump = self.run("iptables-save", &[])?;
        Ok(crate::rules_file::parse(&dump))
    }

    fn append(&self, rule: &FirewallRule) -> Result<()> {
        self.run("iptables", &self.rule_command("-A", rule)).map(|_| ())
    }

    fn delete(&self, rule: &FirewallRule) -> Result<()> {
        self.run("iptables", &self.rule_command("-D", rule)).map(|_| ())
    }
}
