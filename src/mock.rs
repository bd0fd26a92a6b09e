//! In-memory collaborators for exercising the engine without a real host.

use crate::error::{Error, Result};
use crate::firewall::{FirewallBackend, FirewallRule, LiveRule, Table};
use crate::host::ServiceController;
use crate::keys::{KeyGenerator, KeyPair};
use base64::{engine::general_purpose, Engine as _};
use std::cell::{Cell, RefCell};
use std::path::Path;

/// A live rule table held in memory.
#[derive(Debug, Default)]
pub struct MemoryFirewall {
    rules: RefCell<Vec<LiveRule>>,
}

impl MemoryFirewall {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule the way another tool would, from an `iptables-save` line.
    pub fn insert_foreign(&self, table: Table, line: &str) {
        if let Some(rule) = LiveRule::parse(&table, line) {
            self.rules.borrow_mut().push(rule);
        }
    }

    pub fn rules(&self) -> Vec<LiveRule> {
        self.rules.borrow().clone()
    }
}

impl FirewallBackend for MemoryFirewall {
    fn list(&self) -> Result<Vec<LiveRule>> {
        Ok(self.rules())
    }

    fn append(&self, rule: &FirewallRule) -> Result<()> {
        if let Some(live) = LiveRule::parse(&rule.table, &rule.save_line()) {
            self.rules.borrow_mut().push(live);
        }
        Ok(())
    }

    fn delete(&self, rule: &FirewallRule) -> Result<()> {
        let mut rules = self.rules.borrow_mut();
        if let Some(pos) = rules.iter().position(|l| l.is_owned() && l.equivalent(rule)) {
            rules.remove(pos);
        }
        Ok(())
    }
}

/// Records service calls instead of performing them.
#[derive(Debug, Default)]
pub struct RecordingController {
    calls: RefCell<Vec<String>>,
    fail_on: Option<&'static str>,
}

impl RecordingController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `op` call ("enable", "reload", ...) is recorded and then fails
    /// the way a non-zero systemctl exit would.
    pub fn failing(op: &'static str) -> Self {
        Self {
            calls: RefCell::default(),
            fail_on: Some(op),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, op: &str, arg: String) -> Result<()> {
        self.calls.borrow_mut().push(format!("{} {}", op, arg));
        if self.fail_on == Some(op) {
            return Err(Error::tool("systemctl", format!("{} {}: injected failure", op, arg)));
        }
        Ok(())
    }
}

impl ServiceController for RecordingController {
    fn enable(&self, interface: &str) -> Result<()> {
        self.record("enable", interface.to_string())
    }

    fn reload(&self, interface: &str) -> Result<()> {
        self.record("reload", interface.to_string())
    }

    fn disable(&self, interface: &str) -> Result<()> {
        self.record("disable", interface.to_string())
    }

    fn apply_sysctl(&self, path: &Path) -> Result<()> {
        self.record("sysctl", path.display().to_string())
    }
}

/// Deterministic keys: each call yields the next counter value as key bytes.
#[derive(Debug, Default)]
pub struct SequenceKeyGenerator {
    next: Cell<u8>,
}

impl SequenceKeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyGenerator for SequenceKeyGenerator {
    fn generate(&self) -> Result<KeyPair> {
        let n = self.next.get();
        self.next.set(n.wrapping_add(1));
        Ok(KeyPair {
            private_key: general_purpose::STANDARD.encode([n; 32]),
            public_key: general_purpose::STANDARD.encode([n ^ 0xff; 32]),
        })
    }
}
