//! Rule table for the safety classifier.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version of the built-in table. Bump whenever a rule is added, removed or changed.
pub const BUILTIN_RULESET_VERSION: u32 = 4;

/// Errors raised while building a rule table.
#[derive(Debug, Error)]
pub enum RuleError {
    /// A pattern rule did not compile.
    #[error("rule {id}: invalid pattern: {source}")]
    InvalidPattern {
        /// Offending rule.
        id: String,
        /// Compiler error.
        #[source]
        source: regex::Error,
    },
    /// A rule with a blank needle or pattern.
    #[error("rule {0}: empty matcher")]
    Empty(String),
    /// A rule file that is not a JSON array of rule specs.
    #[error("invalid rule file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// How a rule inspects normalized text.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Exact substring of the normalized text.
    Contains(String),
    /// Regular expression over the normalized text.
    Pattern(Regex),
}

/// One entry in a [`RuleSet`].
#[derive(Debug, Clone)]
pub struct Rule {
    id: String,
    description: String,
    matcher: Matcher,
}

impl Rule {
    /// Containment rule. The needle is lower-cased to match normalized input.
    pub fn contains(id: impl Into<String>, description: impl Into<String>, needle: &str) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            matcher: Matcher::Contains(needle.to_lowercase()),
        }
    }

    /// Regular-expression rule, compiled once.
    pub fn pattern(
        id: impl Into<String>,
        description: impl Into<String>,
        pattern: &str,
    ) -> Result<Self, RuleError> {
        let id = id.into();
        let regex = Regex::new(pattern).map_err(|source| RuleError::InvalidPattern {
            id: id.clone(),
            source,
        })?;
        Ok(Self {
            id,
            description: description.into(),
            matcher: Matcher::Pattern(regex),
        })
    }

    /// Stable identifier, reported when the rule fires.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// What the rule guards against.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// How the rule inspects text.
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Whether this rule fires on already-normalized text.
    pub fn matches(&self, normalized: &str) -> bool {
        match &self.matcher {
            Matcher::Contains(needle) => normalized.contains(needle.as_str()),
            Matcher::Pattern(regex) => regex.is_match(normalized),
        }
    }

    fn is_containment(&self) -> bool {
        matches!(self.matcher, Matcher::Contains(_))
    }
}

/// Serializable description of a rule, as read from an extra-rules file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleSpec {
    /// Stable rule id.
    pub id: String,
    /// Containment or pattern.
    pub kind: RuleKind,
    /// Needle or regular expression.
    pub value: String,
    /// Defaults to the id when empty.
    #[serde(default)]
    pub description: String,
}

/// Matcher family of a [`RuleSpec`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// [`Matcher::Contains`].
    Contains,
    /// [`Matcher::Pattern`].
    Pattern,
}

impl TryFrom<RuleSpec> for Rule {
    type Error = RuleError;

    fn try_from(spec: RuleSpec) -> Result<Self, Self::Error> {
        if spec.value.trim().is_empty() {
            return Err(RuleError::Empty(spec.id));
        }
        let description = if spec.description.is_empty() {
            spec.id.clone()
        } else {
            spec.description
        };
        match spec.kind {
            RuleKind::Contains => Ok(Rule::contains(spec.id, description, &spec.value)),
            RuleKind::Pattern => Rule::pattern(spec.id, description, &spec.value),
        }
    }
}

/// Immutable, versioned rule table.
///
/// Containment rules are always evaluated before pattern rules; within a family
/// table order is kept.
#[derive(Debug, Clone)]
pub struct RuleSet {
    version: u32,
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Table with the given rules, reordered so containment rules come first.
    pub fn new(version: u32, rules: Vec<Rule>) -> Self {
        let mut set = Self {
            version,
            rules: Vec::with_capacity(rules.len()),
        };
        set.extend(rules);
        set
    }

    /// Build a table from serializable specs.
    pub fn from_specs(version: u32, specs: Vec<RuleSpec>) -> Result<Self, RuleError> {
        let rules = specs
            .into_iter()
            .map(Rule::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(version, rules))
    }

    /// Parse a JSON array of [`RuleSpec`].
    pub fn specs_from_json(json: &str) -> Result<Vec<RuleSpec>, RuleError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The built-in destructive-command table.
    pub fn builtin() -> Result<Self, RuleError> {
        let mut rules = Vec::with_capacity(BUILTIN_CONTAINS.len() + BUILTIN_PATTERNS.len());
        for (id, description, needle) in BUILTIN_CONTAINS {
            rules.push(Rule::contains(*id, *description, needle));
        }
        for (id, description, pattern) in BUILTIN_PATTERNS {
            rules.push(Rule::pattern(*id, *description, pattern)?);
        }
        Ok(Self::new(BUILTIN_RULESET_VERSION, rules))
    }

    /// Append rules, keeping containment-before-pattern evaluation order.
    pub fn extend(&mut self, rules: impl IntoIterator<Item = Rule>) {
        for rule in rules {
            if rule.is_containment() {
                let at = self.rules.iter().take_while(|r| r.is_containment()).count();
                self.rules.insert(at, rule);
            } else {
                self.rules.push(rule);
            }
        }
    }

    /// Table version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True for a table with no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule that fires on `normalized`, if any.
    pub fn first_match(&self, normalized: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.matches(normalized))
    }

    /// Rule by id.
    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }
}

// Needles are matched against normalized (lower-case, single-spaced) text.
const BUILTIN_CONTAINS: &[(&str, &str, &str)] = &[
    ("rm-no-preserve-root", "deletion with root protection disabled", "--no-preserve-root"),
    ("rm-rf-root-glob", "recursive forced deletion of every top-level entry", "rm -rf /*"),
    ("rm-fr-root-glob", "recursive forced deletion of every top-level entry", "rm -fr /*"),
    ("dd-zero-device", "zero-fill written onto a device", "dd if=/dev/zero of=/dev/"),
    ("dd-urandom-device", "random data written onto a device", "dd if=/dev/urandom of=/dev/"),
    ("dd-random-device", "random data written onto a device", "dd if=/dev/random of=/dev/"),
    ("iptables-flush-short", "firewall rules flushed", "iptables -f"),
    ("iptables-flush-long", "firewall rules flushed", "iptables --flush"),
    ("iptables-delete-chains", "firewall chains deleted", "iptables -x"),
    ("iptables-input-accept", "firewall input policy opened", "iptables -p input accept"),
    ("ip6tables-flush-short", "ipv6 firewall rules flushed", "ip6tables -f"),
    ("ip6tables-flush-long", "ipv6 firewall rules flushed", "ip6tables --flush"),
    ("ufw-disable", "host firewall disabled", "ufw disable"),
    ("nft-flush-ruleset", "nftables ruleset flushed", "nft flush ruleset"),
    ("firewalld-disable", "firewall service disabled", "systemctl disable firewalld"),
    ("firewalld-stop", "firewall service stopped", "systemctl stop firewalld"),
    ("ufw-service-disable", "firewall service disabled", "systemctl disable ufw"),
    ("ufw-service-stop", "firewall service stopped", "systemctl stop ufw"),
];

// Patterns run on normalized text. Shared shapes:
//   argument   [^\s;&|]+
//   end        (?:$|[\s;&|)])
//   sys path   /etc|/home|/root|/usr|/var|/proc|/sys (+ subpath), /dev itself,
//              raw block and memory devices, anything with `..`
const BUILTIN_PATTERNS: &[(&str, &str, &str)] = &[
    (
        "rm-recursive-root",
        "recursive deletion of the root, home or working tree",
        r#"\brm\s+(?:-{1,2}[a-z-]+\s+)*(?:-[a-z]*r[a-z]*|--recursive)(?:\s+[^\s;&|]+)*?\s+["']?(?:/\*?|\.{1,2}/?\*?|\*|~/?\*?|\$home/?\*?|\$\{home\}/?\*?|/home/?\*?)["']?(?:$|[\s;&|)])"#,
    ),
    (
        "rm-recursive-system",
        "recursive deletion of a system directory",
        r#"\brm\s+(?:-{1,2}[a-z-]+\s+)*(?:-[a-z]*r[a-z]*|--recursive)(?:\s+[^\s;&|]+)*?\s+["']?/(?:etc|dev|root|usr|var|proc|sys|boot|bin|sbin|lib|lib64|opt|srv)/?\*?["']?(?:$|[\s;&|)])"#,
    ),
    (
        "dd-block-device",
        "raw write onto a block device",
        r"\bdd\s+(?:[^\s;&|]+\s+)*of=/dev/(?:sd|hd|vd|xvd|nvme|mmcblk|disk|md|mapper/)",
    ),
    (
        "mkfs-device",
        "filesystem creation or wipe on a device",
        r"\b(?:mkfs(?:\.[a-z0-9]+)?|mke2fs|mkswap|wipefs)\s+(?:[^\s;&|]+\s+)*/dev/",
    ),
    (
        "partition-device",
        "partition table edit on a device",
        r"\b(?:fdisk|sfdisk|cfdisk|parted)\s+(?:[^\s;&|]+\s+)*/dev/",
    ),
    (
        "power-state",
        "shutdown, halt or reboot",
        r"\b(?:shutdown|poweroff|halt|reboot|kexec)\b",
    ),
    (
        "init-runlevel",
        "runlevel change to halt or reboot",
        r"\b(?:tel)?init\s+[06]\b",
    ),
    (
        "kill-all",
        "signal sent to every process",
        r"\bkill\s+(?:-9|-kill|-sigkill|-s\s+(?:9|kill|sigkill))\s+-1\b",
    ),
    (
        "kill-root-processes",
        "all root-owned processes killed",
        r"\b(?:pkill|killall)\s+(?:[^\s;&|]+\s+)*-u\s+(?:0|root)\b",
    ),
    (
        "chmod-root-open",
        "recursive permission change on the filesystem root",
        concat!(
            r"\bchmod\s+(?:",
            r"(?:[^\s;&|]+\s+)*?(?:-[a-z]*r[a-z]*|--recursive)\s+(?:[^\s;&|]+\s+)*?(?:0?777|0?666|0?000|a\+rwx|ugo\+rwx|o\+rwx|a\+w|o\+w)",
            r"|(?:[^\s;&|]+\s+)*?(?:0?777|0?666|0?000|a\+rwx|ugo\+rwx|o\+rwx|a\+w|o\+w)\s+(?:[^\s;&|]+\s+)*?(?:-[a-z]*r[a-z]*|--recursive)",
            r")\s+(?:-[a-z-]+\s+)*/\*?(?:$|[\s;&|)])",
        ),
    ),
    (
        "chown-root-nobody",
        "ownership of the filesystem root handed to nobody",
        r"\bchown\s+(?:-[a-z-]+\s+)*nobody(?::(?:nogroup|nobody))?\s+(?:-[a-z-]+\s+)*/\*?(?:$|[\s;&|)])",
    ),
    (
        "iptables-flush",
        "firewall rules flushed or chains deleted",
        r"\bip6?tables(?:-legacy|-nft)?\s+(?:[^\s;&|]+\s+)*(?:-f|--flush|-x|--delete-chain)(?:$|[\s;&|)])",
    ),
    (
        "iptables-default-accept",
        "firewall default policy opened",
        r"\bip6?tables(?:-legacy|-nft)?\s+(?:[^\s;&|]+\s+)*(?:-p|--policy)\s+(?:input|forward|output)\s+accept\b",
    ),
    (
        "ufw-off",
        "host firewall disabled or reset",
        r"\bufw\s+(?:--force\s+)?(?:disable|reset)\b",
    ),
    (
        "firewall-service-off",
        "firewall service stopped, disabled or masked",
        r"\b(?:systemctl|service)\s+(?:[^\s;&|]+\s+)*(?:stop|disable|mask)\s+(?:[^\s;&|]+\s+)*(?:ufw|firewalld|iptables|ip6tables|nftables)(?:\.service)?\b",
    ),
    (
        "firewall-service-stop",
        "firewall service stopped",
        r"\bservice\s+(?:ufw|firewalld|iptables|ip6tables|nftables)\s+stop\b",
    ),
    (
        "netcat-exec-shell",
        "netcat handing a shell to the network",
        r"\b(?:nc|ncat|netcat)\s+[^;&|]*-[a-z]*[ec]\s+[^\s;&|]*sh\b",
    ),
    (
        "netcat-listen-pipe-shell",
        "netcat listener piped into a shell",
        r"\b(?:nc|ncat|netcat)\s+[^;&|]*-[a-z]*l[^;&|]*\|\s*(?:/usr)?(?:/bin/)?(?:ba|z|da|k)?sh\b",
    ),
    (
        "socat-exec-shell",
        "socat handing a shell to the network",
        r"\bsocat\b[^;&|]*(?:exec|system):[^\s;&|]*sh\b",
    ),
    (
        "fetch-pipe-shell",
        "downloaded content piped into a shell or interpreter",
        r"\b(?:curl|wget)\b[^;&]*\|\s*(?:sudo\s+(?:-[a-z]+\s+)*)?(?:env\s+)?(?:/usr/local/bin/|/usr/bin/|/bin/)?(?:(?:ba|z|da|k|fi)?sh|python[0-9.]*|perl|ruby|node|php)\b",
    ),
    (
        "fetch-subshell",
        "downloaded content executed through substitution",
        r#"\b(?:(?:ba|z|da|k)?sh|source|eval)\s+(?:-c\s+)?["']?(?:<\(|\$\(|`)\s*(?:curl|wget)\b"#,
    ),
    (
        "fork-bomb",
        "classic fork bomb",
        r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&?\s*\}\s*;\s*:",
    ),
    (
        "fork-bomb-function",
        "function that pipes into itself in the background",
        r"[a-z_][a-z0-9_]*\s*\(\s*\)\s*\{[^}]*\|[^}]*&[^}]*\}",
    ),
    (
        "infinite-while",
        "unconditional while loop",
        r"\bwhile\s+(?:true|:|\[\s*1\s*\]|1)\s*;?\s*do\b.*\bdone\b",
    ),
    (
        "infinite-for",
        "unconditional for loop",
        r"\bfor\s*\(\(\s*;\s*;\s*\)\)",
    ),
    (
        "sudo-su",
        "privilege escalation to a root session",
        r"\bsudo\s+(?:-[a-z]+\s+)*su\b",
    ),
    (
        "sudo-interactive",
        "interactive root shell",
        r"\bsudo\s+(?:-[a-z]+\s+)*-[a-z]*[is][a-z]*(?:$|[\s;&|)])",
    ),
    (
        "sudo-shell",
        "shell started as root",
        r"\bsudo\s+(?:-[a-z]+\s+)*(?:/usr/bin/|/bin/)?(?:ba|z|da|k|fi)?sh(?:$|[\s;&|)])",
    ),
    (
        "move-or-write-system",
        "move or in-place write touching a system path",
        r"\b(?:mv|tee|truncate|shred)\s+(?:[^\s;&|]+\s+)*(?:/(?:etc|home|root|usr|var|proc|sys)(?:/[^\s;&|]*)?|/dev(?:/(?:sd|hd|vd|xvd|nvme|mmcblk|disk|mem|kmem|port|mapper)[^\s;&|]*|/)?|[^\s;&|]*\.\.(?:/[^\s;&|]*)?)(?:$|[\s;&|)])",
    ),
    (
        "copy-into-system",
        "copy or link whose destination is a system path",
        r"\b(?:cp|ln|install|rsync)\s+(?:[^\s;&|]+\s+)+(?:/(?:etc|home|root|usr|var|proc|sys)(?:/[^\s;&|]*)?|/dev(?:/(?:sd|hd|vd|xvd|nvme|mmcblk|disk|mem|kmem|port|mapper)[^\s;&|]*|/)?|[^\s;&|]*\.\.(?:/[^\s;&|]*)?)\s*(?:$|[;&|)])",
    ),
    (
        "redirect-system",
        "output redirected onto a system path or device",
        r">\s*(?:/(?:etc|home|root|usr|var|proc|sys|boot)/|/dev/(?:sd|hd|vd|xvd|nvme|mmcblk|disk|mem|kmem|port|mapper)|\.\./)",
    ),
];
