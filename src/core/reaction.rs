//! Reaction engine
//!
//! Matches each inbound frame (as canonical hex) against the rule set and
//! runs the resulting cascade of responses. Exact trigger matches win over
//! prefix matches; candidates run in descending priority with list order as
//! tiebreak.
//!
//! A response may itself match a trigger on the peer side and recurse; no
//! cycle detection is applied.

use crate::core::message::ReactionRule;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Destination for reaction responses
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResponseSink: Send + Sync {
    /// Send the rule's response on the connection identified by `epoch`.
    ///
    /// Returns false when the send failed or the epoch is stale.
    async fn send_reaction(&self, epoch: u64, rule: &ReactionRule) -> bool;
}

/// Outcome of one cascade
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    /// Names of responses that were attempted, in order
    pub executed: Vec<String>,
    /// Attempts whose send returned false
    pub failed: usize,
    /// A stop-after-match rule ended the cascade
    pub stopped_early: bool,
    /// The connection went away during a delay
    pub cancelled: bool,
}

/// Select and order the rules that react to `inbound_hex`.
///
/// Paused rules are never candidates. If any rule matches exactly, only
/// exact matches are returned; otherwise every prefix match is.
pub fn match_rules<'a>(rules: &'a [ReactionRule], inbound_hex: &str) -> Vec<&'a ReactionRule> {
    let active = || rules.iter().filter(|rule| !rule.response.is_paused);

    let mut candidates: Vec<&ReactionRule> = active().filter(|rule| rule.matches_exact(inbound_hex)).collect();
    if candidates.is_empty() {
        candidates = active().filter(|rule| rule.matches_prefix(inbound_hex)).collect();
    }

    // Stable, so equal priorities keep list order
    candidates.sort_by(|a, b| b.response.priority.cmp(&a.response.priority));
    candidates
}

/// Execute candidates in order, honoring delays and stop-after-match
pub async fn run_cascade(
    candidates: Vec<ReactionRule>,
    epoch: u64,
    sink: &dyn ResponseSink,
    cancel: &CancellationToken,
) -> CascadeReport {
    let mut report = CascadeReport::default();

    for rule in candidates {
        if rule.response.is_paused {
            continue;
        }

        if rule.response.delay_ms > 0 {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Reaction cascade cancelled during delay");
                    report.cancelled = true;
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(rule.response.delay_ms)) => {}
            }
        }

        if !sink.send_reaction(epoch, &rule).await {
            warn!("Reaction response '{}' was not sent", rule.response.name);
            report.failed += 1;
        }
        report.executed.push(rule.response.name.clone());

        if rule.response.stop_after_match {
            report.stopped_early = true;
            break;
        }
    }

    report
}

/// Ordered, mutable rule set with copy-on-read snapshots
#[derive(Debug, Default)]
pub struct ReactionEngine {
    rules: RwLock<Arc<Vec<ReactionRule>>>,
}

impl ReactionEngine {
    /// Create an engine with initial rules
    pub fn new(rules: Vec<ReactionRule>) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
        }
    }

    /// Immutable view of the current rule list
    pub fn snapshot(&self) -> Arc<Vec<ReactionRule>> {
        self.rules.read().clone()
    }

    /// Copy of the current rules
    pub fn rules(&self) -> Vec<ReactionRule> {
        self.snapshot().as_ref().clone()
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Whether there are no rules
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    fn modify<T>(&self, f: impl FnOnce(&mut Vec<ReactionRule>) -> T) -> T {
        let mut guard = self.rules.write();
        let mut rules = guard.as_ref().clone();
        let result = f(&mut rules);
        *guard = Arc::new(rules);
        result
    }

    /// Append a rule
    pub fn add_rule(&self, rule: ReactionRule) {
        self.modify(|rules| rules.push(rule));
    }

    /// Replace the rule at `index`
    pub fn update_rule(&self, index: usize, rule: ReactionRule) -> bool {
        self.modify(|rules| match rules.get_mut(index) {
            Some(slot) => {
                *slot = rule;
                true
            }
            None => false,
        })
    }

    /// Remove the rule at `index`
    pub fn remove_rule(&self, index: usize) -> Option<ReactionRule> {
        self.modify(|rules| (index < rules.len()).then(|| rules.remove(index)))
    }

    /// Pause or resume the rule at `index`
    pub fn set_rule_paused(&self, index: usize, paused: bool) -> bool {
        self.modify(|rules| match rules.get_mut(index) {
            Some(rule) => {
                rule.response.is_paused = paused;
                true
            }
            None => false,
        })
    }

    /// Replace the whole rule list
    pub fn replace_all(&self, rules: Vec<ReactionRule>) {
        *self.rules.write() = Arc::new(rules);
    }

    /// Ordered candidates for an inbound frame, from the current snapshot
    pub fn candidates(&self, inbound_hex: &str) -> Vec<ReactionRule> {
        let snapshot = self.snapshot();
        match_rules(&snapshot, inbound_hex).into_iter().cloned().collect()
    }

    /// Start an independent cascade for one inbound frame.
    ///
    /// Returns `None` when no rule matches.
    pub fn evaluate(
        &self,
        inbound_hex: &str,
        epoch: u64,
        sink: Arc<dyn ResponseSink>,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<CascadeReport>> {
        let candidates = self.candidates(inbound_hex);
        if candidates.is_empty() {
            return None;
        }

        debug!("{} reaction(s) matched {}", candidates.len(), inbound_hex);
        Some(tokio::spawn(async move {
            run_cascade(candidates, epoch, sink.as_ref(), &cancel).await
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::MessageDefinition;
    use mockall::predicate::eq;
    use tokio::time::Instant;

    fn rule(trigger: &str, name: &str) -> ReactionRule {
        ReactionRule::new(trigger, MessageDefinition::new(name, "06").unwrap()).unwrap()
    }

    fn names(rules: &[&ReactionRule]) -> Vec<String> {
        rules.iter().map(|r| r.response.name.clone()).collect()
    }

    #[test]
    fn test_exact_wins_over_prefix() {
        let rules = vec![rule("41", "prefix"), rule("4142", "exact")];
        assert_eq!(names(&match_rules(&rules, "4142")), vec!["exact"]);
    }

    #[test]
    fn test_all_prefixes_fire_by_priority() {
        let mut short = rule("41", "short");
        short.response.priority = 1;
        let mut long = rule("4142", "long");
        long.response.priority = 5;

        let rules = vec![short, long];
        assert_eq!(names(&match_rules(&rules, "414243")), vec!["long", "short"]);
    }

    #[test]
    fn test_priority_ties_keep_list_order() {
        let mut high = rule("4142", "R2");
        high.response.priority = 5;
        let rules = vec![rule("4142", "R1"), high, rule("4142", "R3")];
        assert_eq!(names(&match_rules(&rules, "4142")), vec!["R2", "R1", "R3"]);
    }

    #[test]
    fn test_paused_rules_are_not_candidates() {
        let mut paused = rule("4142", "exact");
        paused.response.is_paused = true;
        let rules = vec![paused, rule("41", "prefix")];
        assert_eq!(names(&match_rules(&rules, "4142")), vec!["prefix"]);
    }

    #[test]
    fn test_case_insensitive_match() {
        let rules = vec![rule("0A0B", "r")];
        assert_eq!(match_rules(&rules, "0a0b").len(), 1);
        assert!(match_rules(&rules, "0A").is_empty());
    }

    #[tokio::test]
    async fn test_stop_after_match_ends_cascade() {
        let mut r1 = rule("4142", "R1");
        r1.response.priority = 5;
        r1.response.stop_after_match = true;
        let r2 = rule("4142", "R2");

        let mut sink = MockResponseSink::new();
        sink.expect_send_reaction()
            .withf(|epoch, rule| *epoch == 7 && rule.response.name == "R1")
            .times(1)
            .returning(|_, _| true);

        let report = run_cascade(vec![r1, r2], 7, &sink, &CancellationToken::new()).await;
        assert_eq!(report.executed, vec!["R1"]);
        assert!(report.stopped_early);
    }

    #[tokio::test]
    async fn test_engine_runs_stop_rule_first_from_list_order() {
        let mut low = rule("41", "Low");
        low.response.priority = 1;
        let mut high = rule("41", "High");
        high.response.priority = 5;
        high.response.stop_after_match = true;
        let engine = ReactionEngine::new(vec![low, high]);

        let mut sink = MockResponseSink::new();
        sink.expect_send_reaction()
            .withf(|epoch, rule| *epoch == 3 && rule.response.name == "High")
            .times(1)
            .returning(|_, _| true);

        let handle = engine
            .evaluate("41", 3, Arc::new(sink), CancellationToken::new())
            .expect("rules matched");
        let report = handle.await.unwrap();

        assert_eq!(report.executed, vec!["High"]);
        assert!(report.stopped_early);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_failed_send_continues() {
        let mut sink = MockResponseSink::new();
        let mut seq = mockall::Sequence::new();
        sink.expect_send_reaction()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| false);
        sink.expect_send_reaction()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| true);

        let report = run_cascade(vec![rule("41", "a"), rule("41", "b")], 1, &sink, &CancellationToken::new()).await;
        assert_eq!(report.executed, vec!["a", "b"]);
        assert_eq!(report.failed, 1);
        assert!(!report.stopped_early);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_before_send() {
        let mut delayed = rule("41", "slow");
        delayed.response.delay_ms = 250;

        let mut sink = MockResponseSink::new();
        sink.expect_send_reaction().with(eq(3), eq(delayed.clone())).times(1).returning(|_, _| true);

        let start = Instant::now();
        let report = run_cascade(vec![delayed], 3, &sink, &CancellationToken::new()).await;
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert_eq!(report.executed, vec!["slow"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay_skips_send() {
        let mut delayed = rule("41", "slow");
        delayed.response.delay_ms = 1_000;

        let mut sink = MockResponseSink::new();
        sink.expect_send_reaction().never();

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let report = run_cascade(vec![delayed], 1, &sink, &token).await;
        assert!(report.cancelled);
        assert!(report.executed.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_isolated_from_edits() {
        let engine = ReactionEngine::new(vec![rule("41", "a")]);
        let before = engine.snapshot();

        engine.add_rule(rule("42", "b"));
        engine.remove_rule(0);

        assert_eq!(before.len(), 1);
        assert_eq!(before[0].response.name, "a");
        assert_eq!(engine.rules()[0].response.name, "b");
    }

    #[tokio::test]
    async fn test_evaluate_spawns_cascade() {
        let engine = ReactionEngine::new(vec![rule("0102", "ack")]);

        let mut sink = MockResponseSink::new();
        sink.expect_send_reaction().times(1).returning(|_, _| true);
        let sink: Arc<dyn ResponseSink> = Arc::new(sink);

        assert!(engine.evaluate("FFFF", 1, sink.clone(), CancellationToken::new()).is_none());

        let handle = engine.evaluate("010203", 1, sink, CancellationToken::new()).unwrap();
        let report = handle.await.unwrap();
        assert_eq!(report.executed, vec!["ack"]);
    }

    #[test]
    fn test_rule_editing() {
        let engine = ReactionEngine::default();
        assert!(engine.is_empty());

        engine.add_rule(rule("41", "a"));
        assert!(engine.update_rule(0, rule("42", "b")));
        assert!(!engine.update_rule(5, rule("43", "c")));
        assert!(engine.set_rule_paused(0, true));
        assert!(engine.candidates("42").is_empty());
        assert!(engine.remove_rule(3).is_none());

        engine.replace_all(vec![rule("41", "x"), rule("41", "y")]);
        assert_eq!(engine.len(), 2);
        assert_eq!(engine.candidates("41").len(), 2);
    }
}
