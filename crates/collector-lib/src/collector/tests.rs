//! Tests for the key state machine and exec-collector polling
//!
//! Polls run against an in-memory data source that counts attempts per
//! key, so the per-key error isolation can be observed directly.

#[cfg(test)]
mod key_state_tests {
    use crate::collector::{KeySet, ALL_KEYS};
    use crate::error::CollectorError;
    use std::collections::BTreeSet;

    const KEYS: &[&str] = &["A", "B", "C"];

    /// Replay transitions against a plain set model
    fn replay(ops: &[(&str, &str)]) -> (Vec<String>, BTreeSet<String>, usize) {
        let keys = KeySet::new("Test", KEYS);
        let mut model: BTreeSet<String> = BTreeSet::new();
        let mut rejected = 0;

        for (op, key) in ops {
            let before = keys.running();
            let result = match *op {
                "start" => keys.start(key),
                _ => keys.cleanup(key),
            };

            match (result, *key) {
                (Ok(()), ALL_KEYS) if *op == "start" => {
                    model.extend(KEYS.iter().map(|k| k.to_string()))
                }
                (Ok(()), ALL_KEYS) => model.clear(),
                (Ok(()), key) if *op == "start" => {
                    model.insert(key.to_string());
                }
                (Ok(()), key) => {
                    model.remove(key);
                }
                (Err(CollectorError::NotCollectable { .. }), _) => {
                    rejected += 1;
                    assert_eq!(keys.running(), before, "rejected call changed state");
                }
                (Err(other), _) => panic!("unexpected error: {}", other),
            }
        }

        (keys.running(), model, rejected)
    }

    #[test]
    fn test_transitions_match_model() {
        let sequences: &[&[(&str, &str)]] = &[
            &[("start", "A")],
            &[("start", "A"), ("start", "A"), ("cleanup", "A")],
            &[("start", "all"), ("cleanup", "B")],
            &[("start", "C"), ("start", "A"), ("cleanup", "all"), ("start", "B")],
            &[("cleanup", "A"), ("start", "B"), ("start", "Z"), ("cleanup", "Z")],
            &[("start", "all"), ("start", "nope"), ("cleanup", "C"), ("cleanup", "C")],
        ];

        for ops in sequences {
            let (running, model, _) = replay(ops);
            let expected: Vec<String> = KEYS
                .iter()
                .filter(|k| model.contains(**k))
                .map(|k| k.to_string())
                .collect();
            assert_eq!(running, expected, "sequence {:?}", ops);
        }
    }

    #[test]
    fn test_unknown_keys_always_rejected() {
        let (running, _, rejected) = replay(&[
            ("start", "Z"),
            ("cleanup", "Z"),
            ("start", "ALL"),
            ("start", ""),
        ]);
        assert!(running.is_empty());
        assert_eq!(rejected, 4);
    }

    #[test]
    fn test_running_keys_follow_declaration_order() {
        let keys = KeySet::new("Test", KEYS);
        keys.start("C").unwrap();
        keys.start("A").unwrap();
        assert_eq!(keys.running(), vec!["A".to_string(), "C".to_string()]);
    }
}

#[cfg(test)]
mod poll_tests {
    use crate::collector::{Collector, DataSource, ExecCollector};
    use crate::error::CollectorError;
    use crate::models::PollOutcome;
    use crate::session::{CommandRunner, ExecSession, LocalSession};
    use crate::testutils::RecordingCallback;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Source over keys A, B and C; keys listed in `failing` error out
    #[derive(Default)]
    struct CountingSource {
        failing: Vec<&'static str>,
        attempts: Arc<Mutex<HashMap<String, usize>>>,
    }

    #[async_trait]
    impl DataSource for CountingSource {
        fn keys(&self) -> &'static [&'static str] {
            &["A", "B", "C"]
        }

        async fn fetch(
            &self,
            _runner: &dyn CommandRunner,
            key: &str,
        ) -> Result<Value, CollectorError> {
            *self
                .attempts
                .lock()
                .unwrap()
                .entry(key.to_string())
                .or_insert(0) += 1;
            if self.failing.iter().any(|k| *k == key) {
                return Err(CollectorError::Setup(format!("{} failed", key)));
            }
            Ok(json!({ "key": key }))
        }
    }

    fn collector(
        source: CountingSource,
        callback: Arc<RecordingCallback>,
    ) -> ExecCollector<CountingSource> {
        ExecCollector::new(
            "Counting",
            source,
            ExecSession::Local(LocalSession::new()),
            callback,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_only_running_keys_are_polled() {
        let source = CountingSource::default();
        let attempts = source.attempts.clone();
        let callback = Arc::new(RecordingCallback::new());
        let collector = collector(source, callback.clone());
        collector.start("A").unwrap();

        let (tx, mut rx) = mpsc::channel::<PollOutcome>(1);
        collector.poll(tx).await;

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.collector, "Counting");
        assert!(outcome.errors.is_empty());

        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.get("A"), Some(&1));
        assert!(attempts.get("B").is_none());

        let records = callback.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1, "A");
        assert_eq!(records[0].2, r#"{"key":"A"}"#);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_sibling_keys() {
        let source = CountingSource {
            failing: vec!["A", "C"],
            ..Default::default()
        };
        let attempts = source.attempts.clone();
        let callback = Arc::new(RecordingCallback::new());
        let collector = collector(source, callback.clone());
        collector.start("all").unwrap();

        let (tx, mut rx) = mpsc::channel::<PollOutcome>(1);
        collector.poll(tx).await;

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.errors.len(), 2);
        assert_eq!(attempts.lock().unwrap().len(), 3);
        assert_eq!(callback.records().len(), 1);
    }

    #[tokio::test]
    async fn test_one_outcome_per_poll() {
        let callback = Arc::new(RecordingCallback::new());
        let collector = Arc::new(collector(CountingSource::default(), callback));
        collector.start("B").unwrap();

        let (tx, mut rx) = mpsc::channel::<PollOutcome>(16);
        let handles: Vec<_> = (0..5)
            .map(|_| {
                let collector = collector.clone();
                let tx = tx.clone();
                tokio::spawn(async move { collector.poll(tx).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        drop(tx);

        let mut outcomes = 0;
        while rx.recv().await.is_some() {
            outcomes += 1;
        }
        assert_eq!(outcomes, 5);
        assert_eq!(collector.poll_count(), 5);
    }

    #[tokio::test]
    async fn test_poll_with_nothing_running_still_reports() {
        let collector = collector(CountingSource::default(), Arc::new(RecordingCallback::new()));

        let (tx, mut rx) = mpsc::channel::<PollOutcome>(1);
        collector.poll(tx).await;

        assert!(rx.recv().await.unwrap().is_ok());
        assert_eq!(collector.poll_count(), 1);
    }

    #[tokio::test]
    async fn test_callback_failure_is_recorded() {
        let callback = Arc::new(RecordingCallback::failing_on("B"));
        let collector = collector(CountingSource::default(), callback.clone());
        collector.start("all").unwrap();

        let (tx, mut rx) = mpsc::channel::<PollOutcome>(1);
        collector.poll(tx).await;

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.errors.len(), 1);
        assert!(matches!(
            &outcome.errors[0],
            CollectorError::Callback { key, .. } if key == "B"
        ));
        assert_eq!(callback.records().len(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_stops_polling_key() {
        let source = CountingSource::default();
        let attempts = source.attempts.clone();
        let collector = collector(source, Arc::new(RecordingCallback::new()));
        collector.start("all").unwrap();
        collector.cleanup("B").unwrap();
        assert_eq!(collector.running_keys(), vec!["A".to_string(), "C".to_string()]);

        let (tx, mut rx) = mpsc::channel::<PollOutcome>(1);
        collector.poll(tx).await;
        rx.recv().await.unwrap();

        assert!(attempts.lock().unwrap().get("B").is_none());
        assert!(collector.cleanup("Z").is_err());
    }
}
