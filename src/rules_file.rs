//! Persisted rule file in `iptables-save` format.
//!
//! Only lines that carry the ownership tag are ever added or removed; every
//! other byte of the file is passed through unchanged.

use crate::error::Result;
use crate::firewall::{apply_live, FirewallBackend, FirewallRule, LiveRule, Table, OWNERSHIP_TAG};
use log::{debug, info};

/// Comment line placed right after the header of a `*table` section this
/// tool created, so the section can be dropped again once it is empty.
fn section_marker() -> String {
    format!("# {} section", OWNERSHIP_TAG)
}

/// Parse every rule line, tracking the `*table` section it appears in.
pub fn parse(text: &str) -> Vec<LiveRule> {
    let mut table = Table::Filter;
    let mut rules = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if let Some(name) = line.strip_prefix('*') {
            table = Table::from_name(name.trim());
        } else if let Some(rule) = LiveRule::parse(&table, line) {
            rules.push(rule);
        }
    }
    rules
}

/// Tagged rules stored in the file.
pub fn owned_rules(text: &str) -> Vec<FirewallRule> {
    parse(text).iter().filter_map(LiveRule::owned).collect()
}

/// Index of the `COMMIT` closing the `*table` section, if the section exists.
fn section_commit(lines: &[String], table: &Table) -> Option<usize> {
    let header = format!("*{}", table);
    let start = lines.iter().position(|l| l.trim() == header)?;
    lines[start + 1..]
        .iter()
        .position(|l| l.trim() == "COMMIT")
        .map(|offset| start + 1 + offset)
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

fn join_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/**
 * @brief Insert rules into their table sections of a persisted rule file.
 * @param existing Current file contents (may be empty).
 * @param new_rules Rules to persist.
 * @return Updated contents and the number of lines added. Rules already present are skipped.
 */
pub fn merge_persisted(existing: &str, new_rules: &[FirewallRule]) -> (String, usize) {
    let mut lines = split_lines(existing);
    let mut added = 0;
    for rule in new_rules {
        let line = rule.save_line();
        let present = parse(&join_lines(&lines))
            .iter()
            .any(|l| l.is_owned() && l.equivalent(rule));
        if present {
            debug!("persisted rule already present: {}", rule);
            continue;
        }
        match section_commit(&lines, &rule.table) {
            Some(commit) => lines.insert(commit, line),
            None => {
                lines.push(format!("*{}", rule.table));
                lines.push(section_marker());
                lines.push(line);
                lines.push("COMMIT".into());
            }
        }
        added += 1;
    }
    (join_lines(&lines), added)
}

/**
 * @brief Drop every tagged rule line from a persisted rule file, and every
 *        section added by `merge_persisted` that is left empty.
 * @return Updated contents and the number of rule lines removed. The contents
 *         are empty when nothing but added sections was in the file.
 */
pub fn strip_owned(existing: &str) -> (String, usize) {
    let mut table = Table::Filter;
    let mut removed = 0;
    let mut kept = Vec::new();
    for line in existing.lines() {
        let trimmed = line.trim();
        if let Some(name) = trimmed.strip_prefix('*') {
            table = Table::from_name(name.trim());
        }
        if LiveRule::parse(&table, trimmed).is_some_and(|r| r.is_owned()) {
            removed += 1;
            continue;
        }
        kept.push(line.to_string());
    }

    let marker = section_marker();
    let mut out: Vec<String> = Vec::with_capacity(kept.len());
    let mut i = 0;
    while i < kept.len() {
        let empty_added_section = kept[i].trim().starts_with('*')
            && kept.get(i + 1).is_some_and(|l| l.trim() == marker)
            && kept.get(i + 2).is_some_and(|l| l.trim() == "COMMIT");
        if empty_added_section {
            debug!("dropping empty section {}", kept[i].trim());
            i += 3;
            continue;
        }
        out.push(kept[i].clone());
        i += 1;
    }

    if removed == 0 && out.len() == kept.len() {
        return (existing.to_string(), 0);
    }
    (join_lines(&out), removed)
}

/**
 * @brief Bring the live table up to the persisted file, additively.
 *
 * Only tagged rules are applied and each goes through `apply_live`, so live
 * rules missing from the file are never dropped.
 */
pub fn reload_live_from_persisted(backend: &dyn FirewallBackend, text: &str) -> Result<usize> {
    let rules = owned_rules(text);
    let applied = apply_live(backend, &rules)?;
    info!("reloaded {} of {} persisted rules into the live table", applied, rules.len());
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::FirewallRuleSet;
    use crate::mock::MemoryFirewall;
    use std::net::Ipv4Addr;

    const HOST_RULES: &str = "# Generated by iptables-save v1.8.7\n\
*filter\n\
:INPUT DROP [0:0]\n\
:FORWARD DROP [0:0]\n\
:OUTPUT ACCEPT [0:0]\n\
-A INPUT -p tcp -m tcp --dport 22 -j ACCEPT\n\
COMMIT\n\
# Completed\n";

    fn rules() -> Vec<FirewallRule> {
        FirewallRuleSet::new(Ipv4Addr::new(10, 66, 66, 0), "wg0", "eth0", 51820).activation_rules()
    }

    #[test]
    fn merge_places_rules_by_table() {
        let (merged, added) = merge_persisted(HOST_RULES, &rules());
        assert_eq!(added, 5);
        let lines: Vec<&str> = merged.lines().collect();
        let filter_commit = lines.iter().position(|l| *l == "COMMIT").unwrap();
        assert_eq!(lines[filter_commit - 1], rules()[4].save_line());
        assert!(lines.contains(&"*nat"));
        assert!(merged.starts_with("# Generated by iptables-save v1.8.7\n*filter\n"));
        assert_eq!(parse(&merged).iter().filter(|r| r.table == Table::Nat).count(), 1);
    }

    #[test]
    fn merge_twice_adds_nothing() {
        let (once, _) = merge_persisted(HOST_RULES, &rules());
        let (twice, added) = merge_persisted(&once, &rules());
        assert_eq!(added, 0);
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_into_empty_file() {
        let (merged, added) = merge_persisted("", &rules());
        assert_eq!(added, 5);
        assert_eq!(owned_rules(&merged), rules());
    }

    #[test]
    fn strip_restores_unrelated_lines() {
        let (merged, _) = merge_persisted(HOST_RULES, &rules());
        let (stripped, removed) = strip_owned(&merged);
        assert_eq!(removed, 5);
        assert_eq!(stripped, HOST_RULES);
        assert_eq!(strip_owned(HOST_RULES), (HOST_RULES.to_string(), 0));
    }

    #[test]
    fn strip_of_created_file_leaves_nothing() {
        let (merged, _) = merge_persisted("", &rules());
        assert!(merged.contains(&section_marker()));
        assert_eq!(strip_owned(&merged), (String::new(), 5));
    }

    #[test]
    fn strip_keeps_added_section_holding_foreign_rules() {
        let (merged, _) = merge_persisted("", &rules());
        let edited = merged.replacen(
            &section_marker(),
            &format!("{}\n-A POSTROUTING -o eth1 -j MASQUERADE", section_marker()),
            1,
        );
        let (stripped, removed) = strip_owned(&edited);
        assert_eq!(removed, 5);
        assert!(stripped.contains("-A POSTROUTING -o eth1 -j MASQUERADE\n"));
        assert!(stripped.starts_with("*nat\n"));
    }

    #[test]
    fn strip_drops_leftover_empty_added_section() {
        let leftover = format!("{}*nat\n{}\nCOMMIT\n", HOST_RULES, section_marker());
        assert_eq!(strip_owned(&leftover), (HOST_RULES.to_string(), 0));
    }

    #[test]
    fn reload_is_additive() {
        let fw = MemoryFirewall::new();
        fw.insert_foreign(Table::Filter, "-A INPUT -s 192.0.2.7/32 -j DROP");
        let (merged, _) = merge_persisted(HOST_RULES, &rules());
        assert_eq!(reload_live_from_persisted(&fw, &merged).unwrap(), 5);
        assert_eq!(reload_live_from_persisted(&fw, &merged).unwrap(), 0);
        // live-only rule survives, the untagged ssh rule from the file is not loaded
        assert_eq!(fw.rules().len(), 6);
    }
}
