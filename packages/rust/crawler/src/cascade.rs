//! Level-by-level fan-out used by every source crawler.
//!
//! Each level spawns one task per parent record, bounded by a semaphore, and
//! joins all of them before the caller moves on to the next level. Tasks never
//! share an accumulator: each returns its own records (or error) and the
//! results are folded together at the join point.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use khub_shared::{KhubError, Record, Result};

/// Run `branch` once per parent and merge what the branches return.
///
/// A branch that errors or panics is logged and contributes nothing; its
/// siblings are unaffected. The merged list follows parent order.
pub async fn fan_out<F, Fut>(
    task_name: &str,
    parents: Vec<Record>,
    concurrency: usize,
    branch: F,
) -> Vec<Record>
where
    F: Fn(Record) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Record>>> + Send + 'static,
{
    let total = parents.len();
    let branch = Arc::new(branch);
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, parent) in parents.into_iter().enumerate() {
        let branch = Arc::clone(&branch);
        let semaphore = Arc::clone(&semaphore);

        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (index, Err(KhubError::Process("fan-out semaphore closed".into())));
            };
            (index, branch(parent).await)
        });
    }

    let mut collected: Vec<(usize, Vec<Record>)> = Vec::with_capacity(total);

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(records))) => {
                info!(
                    task = task_name,
                    branch = index + 1,
                    of = total,
                    records = records.len(),
                    "branch retrieved"
                );
                collected.push((index, records));
            }
            Ok((index, Err(e))) => {
                warn!(
                    task = task_name,
                    branch = index + 1,
                    of = total,
                    error = %e,
                    "unable to crawl branch"
                );
            }
            Err(e) => {
                error!(task = task_name, error = %e, "branch task aborted");
            }
        }
    }

    collected.sort_by_key(|(index, _)| *index);
    collected.into_iter().flat_map(|(_, records)| records).collect()
}

/// Drop records that are value-identical to an earlier one.
pub fn dedupe_by_value(records: Vec<Record>) -> Vec<Record> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(value_digest(record)))
        .collect()
}

/// SHA-256 of the record's canonical JSON (object keys are sorted).
fn value_digest(record: &Record) -> String {
    let mut hasher = Sha256::new();
    hasher.update(record.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Log the start of a crawl task.
pub(crate) fn log_task_start(task_name: &str) {
    info!(task = task_name, "started to crawl");
}

/// Log the end of a crawl task, warning when nothing came back.
pub(crate) fn log_task_finish(task_name: &str, records: &[Record]) {
    if records.is_empty() {
        warn!(task = task_name, "no records were retrieved");
    } else {
        info!(task = task_name, records = records.len(), "records retrieved");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use khub_shared::RecordExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn merges_branches_in_parent_order() {
        let parents = vec![json!({"id": "a"}), json!({"id": "b"}), json!({"id": "c"})];

        let merged = fan_out("letters", parents, 2, |parent| async move {
            let id = parent.id_at("id").unwrap();
            // Later parents finish first.
            let delay = match id.as_str() {
                "a" => 30,
                "b" => 15,
                _ => 0,
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok::<_, KhubError>(vec![json!({ "parent": id })])
        })
        .await;

        let parents: Vec<&str> = merged.iter().filter_map(|r| r.str_at("parent")).collect();
        assert_eq!(parents, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn failing_branch_does_not_affect_siblings() {
        let parents = vec![json!({"id": "bad"}), json!({"id": "good"})];

        let merged = fan_out("mixed", parents, 4, |parent| async move {
            match parent.str_at("id") {
                Some("bad") => Err(KhubError::parse("missing key")),
                _ => Ok(vec![json!(1), json!(2)]),
            }
        })
        .await;

        assert_eq!(merged, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn panicking_branch_is_contained() {
        let parents = vec![json!({"id": "boom"}), json!({"id": "fine"})];

        let merged = fan_out("panics", parents, 4, |parent| async move {
            if parent.str_at("id") == Some("boom") {
                panic!("branch exploded");
            }
            Ok::<_, KhubError>(vec![json!("survivor")])
        })
        .await;

        assert_eq!(merged, vec![json!("survivor")]);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let parents: Vec<Record> = (0..10).map(|i| json!({ "id": i })).collect();

        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        fan_out("bounded", parents, 3, move |_| {
            let (running, peak) = (Arc::clone(&r), Arc::clone(&p));
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, KhubError>(vec![])
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn no_parents_no_work() {
        let merged = fan_out("empty", vec![], 4, |_| async { Ok::<_, KhubError>(vec![json!(1)]) }).await;
        assert!(merged.is_empty());
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let records = vec![
            json!({"accountId": "u1", "displayName": "Ada"}),
            json!({"displayName": "Ada", "accountId": "u1"}),
            json!({"accountId": "u2", "displayName": "Grace"}),
        ];
        let unique = dedupe_by_value(records);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[1].str_at("accountId"), Some("u2"));
    }
}
