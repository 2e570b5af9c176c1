//! Task decomposition for delegation
//!
//! Splits a delegation scope into sub-tasks. The `auto` strategy picks a
//! shape from the scope itself: folder grouping for wide scopes, per-file
//! for scopes of small files, and type-bucketed chunking otherwise.

use cadence_agent::{infer_specialization, Specialization, SubTask};
use cadence_core::{CadenceError, DelegationDefaults, IdGenerator, Priority, Result, ScopeItem};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// How a delegation scope is split into sub-tasks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionStrategy {
    /// One sub-task per scope item
    Files,
    /// One sub-task per containing folder
    Folders,
    /// Shape chosen from scope size and item sizes
    #[default]
    Auto,
}

impl fmt::Display for DecompositionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Files => write!(f, "files"),
            Self::Folders => write!(f, "folders"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

impl FromStr for DecompositionStrategy {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "files" => Ok(Self::Files),
            "folders" => Ok(Self::Folders),
            "auto" => Ok(Self::Auto),
            other => Err(CadenceError::Delegation(format!(
                "Unknown decomposition strategy: {}",
                other
            ))),
        }
    }
}

/// Priority from filename and folder heuristics
pub fn item_priority(item: &ScopeItem) -> Priority {
    let path = item.path.to_lowercase();
    if ["auth", "security", "crypto", "secret", "token"]
        .iter()
        .any(|k| path.contains(k))
    {
        Priority::Critical
    } else if ["core", "main", "api", "engine"].iter().any(|k| path.contains(k)) {
        Priority::High
    } else if ["test", "docs", "example", "bench"].iter().any(|k| path.contains(k)) {
        Priority::Low
    } else {
        Priority::Medium
    }
}

/// Highest priority across a group of items (`Critical` sorts lowest)
fn group_priority(items: &[ScopeItem]) -> Priority {
    items
        .iter()
        .map(item_priority)
        .min()
        .unwrap_or(Priority::Medium)
}

/// Chunk size for the mixed strategy: whole bucket when small, then
/// progressively finer splits for larger buckets
fn chunk_size(n: usize) -> usize {
    if n <= 5 {
        n.max(1)
    } else if n <= 20 {
        n.div_ceil(3)
    } else {
        n.div_ceil(5)
    }
}

/// Decompose a delegation scope into sub-tasks.
///
/// Specialization is either explicit or inferred from operation keywords.
pub fn decompose(
    operation: &str,
    scope: &[ScopeItem],
    strategy: DecompositionStrategy,
    explicit_specialization: Option<Specialization>,
    defaults: &DelegationDefaults,
    ids: &dyn IdGenerator,
) -> Result<Vec<SubTask>> {
    if scope.is_empty() {
        return Err(CadenceError::Validation(
            "Delegation scope is empty".to_string(),
        ));
    }
    let specialization =
        explicit_specialization.unwrap_or_else(|| infer_specialization(operation));

    let tasks = match strategy {
        DecompositionStrategy::Files => by_files(operation, scope, specialization, ids),
        DecompositionStrategy::Folders => by_folders(operation, scope, specialization, ids),
        DecompositionStrategy::Auto => {
            if scope.len() > defaults.folder_threshold {
                debug!(
                    "Auto decomposition: {} items > {} threshold, grouping by folder",
                    scope.len(),
                    defaults.folder_threshold
                );
                by_folders(operation, scope, specialization, ids)
            } else {
                let avg = scope.iter().map(|i| i.size_bytes).sum::<u64>() / scope.len() as u64;
                if avg < defaults.small_file_bytes {
                    debug!("Auto decomposition: avg item {}b, going per-file", avg);
                    by_files(operation, scope, specialization, ids)
                } else {
                    debug!("Auto decomposition: mixed type-bucketed chunking");
                    by_type_chunks(operation, scope, specialization, ids)
                }
            }
        }
    };
    Ok(tasks)
}

fn by_files(
    operation: &str,
    scope: &[ScopeItem],
    specialization: Specialization,
    ids: &dyn IdGenerator,
) -> Vec<SubTask> {
    scope
        .iter()
        .map(|item| {
            SubTask::new(
                ids.next("task"),
                format!("{}: {}", operation, item.path),
                vec![item.clone()],
            )
            .with_priority(item_priority(item))
            .with_specialization(specialization)
        })
        .collect()
}

fn by_folders(
    operation: &str,
    scope: &[ScopeItem],
    specialization: Specialization,
    ids: &dyn IdGenerator,
) -> Vec<SubTask> {
    // BTreeMap keeps folder order stable across runs
    let mut groups: BTreeMap<String, Vec<ScopeItem>> = BTreeMap::new();
    for item in scope {
        groups.entry(item.folder()).or_default().push(item.clone());
    }

    groups
        .into_iter()
        .map(|(folder, items)| {
            let label = if folder.is_empty() { "(root)" } else { &folder };
            let priority = group_priority(&items);
            SubTask::new(
                ids.next("task"),
                format!("{}: {} ({} items)", operation, label, items.len()),
                items,
            )
            .with_priority(priority)
            .with_specialization(specialization)
        })
        .collect()
}

fn by_type_chunks(
    operation: &str,
    scope: &[ScopeItem],
    specialization: Specialization,
    ids: &dyn IdGenerator,
) -> Vec<SubTask> {
    let mut buckets: BTreeMap<String, Vec<ScopeItem>> = BTreeMap::new();
    for item in scope {
        buckets
            .entry(item.item_type.clone())
            .or_default()
            .push(item.clone());
    }

    let mut tasks = Vec::new();
    for (item_type, items) in buckets {
        let size = chunk_size(items.len());
        for chunk in items.chunks(size) {
            let chunk: Vec<ScopeItem> = chunk.to_vec();
            let priority = group_priority(&chunk);
            tasks.push(
                SubTask::new(
                    ids.next("task"),
                    format!("{}: {} x{}", operation, item_type, chunk.len()),
                    chunk,
                )
                .with_priority(priority)
                .with_specialization(specialization),
            );
        }
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::SequentialIds;

    fn defaults() -> DelegationDefaults {
        DelegationDefaults::default()
    }

    fn items(n: usize, size: u64) -> Vec<ScopeItem> {
        (0..n)
            .map(|i| ScopeItem::new(format!("src/mod{}/file{}.rs", i % 4, i), size))
            .collect()
    }

    #[test]
    fn test_files_strategy_one_task_per_item() {
        let ids = SequentialIds::new();
        let scope = items(6, 2000);
        let tasks = decompose(
            "improve quality",
            &scope,
            DecompositionStrategy::Files,
            None,
            &defaults(),
            &ids,
        )
        .unwrap();
        assert_eq!(tasks.len(), 6);
        assert!(tasks.iter().all(|t| t.scope.len() == 1));
    }

    #[test]
    fn test_folders_strategy_groups_by_folder() {
        let ids = SequentialIds::new();
        let scope = items(8, 2000);
        let tasks = decompose(
            "improve",
            &scope,
            DecompositionStrategy::Folders,
            None,
            &defaults(),
            &ids,
        )
        .unwrap();
        // Items spread across 4 folders
        assert_eq!(tasks.len(), 4);
        assert_eq!(tasks.iter().map(|t| t.scope.len()).sum::<usize>(), 8);
    }

    #[test]
    fn test_auto_uses_folders_above_threshold() {
        let ids = SequentialIds::new();
        let scope = items(60, 2000);
        let tasks = decompose(
            "improve",
            &scope,
            DecompositionStrategy::Auto,
            None,
            &defaults(),
            &ids,
        )
        .unwrap();
        // 60 items > 50 threshold: folder grouping, far fewer tasks
        assert!(tasks.len() <= 4);
        assert!(tasks.iter().any(|t| t.scope.len() > 1));
    }

    #[test]
    fn test_auto_goes_per_file_for_small_files() {
        let ids = SequentialIds::new();
        let scope = items(10, 500);
        let tasks = decompose(
            "improve",
            &scope,
            DecompositionStrategy::Auto,
            None,
            &defaults(),
            &ids,
        )
        .unwrap();
        assert_eq!(tasks.len(), 10);
    }

    #[test]
    fn test_auto_mixed_chunks_by_type() {
        let ids = SequentialIds::new();
        let mut scope = items(12, 3000);
        scope.extend((0..6).map(|i| ScopeItem::new(format!("web/page{}.ts", i), 3000)));
        let tasks = decompose(
            "improve",
            &scope,
            DecompositionStrategy::Auto,
            None,
            &defaults(),
            &ids,
        )
        .unwrap();

        // 12 .rs files chunk by ceil(12/3)=4, 6 .ts files chunk by 2
        let rs_tasks = tasks.iter().filter(|t| t.scope[0].item_type == "rs").count();
        let ts_tasks = tasks.iter().filter(|t| t.scope[0].item_type == "ts").count();
        assert_eq!(rs_tasks, 3);
        assert_eq!(ts_tasks, 3);
        assert_eq!(
            tasks.iter().map(|t| t.scope.len()).sum::<usize>(),
            scope.len()
        );
    }

    #[test]
    fn test_priority_heuristics() {
        assert_eq!(
            item_priority(&ScopeItem::new("src/auth/login.rs", 100)),
            Priority::Critical
        );
        assert_eq!(
            item_priority(&ScopeItem::new("src/core/engine.rs", 100)),
            Priority::High
        );
        assert_eq!(
            item_priority(&ScopeItem::new("tests/fixtures.rs", 100)),
            Priority::Low
        );
        assert_eq!(
            item_priority(&ScopeItem::new("src/widgets.rs", 100)),
            Priority::Medium
        );
    }

    #[test]
    fn test_specialization_inference_and_override() {
        let ids = SequentialIds::new();
        let scope = items(2, 2000);
        let inferred = decompose(
            "security audit",
            &scope,
            DecompositionStrategy::Files,
            None,
            &defaults(),
            &ids,
        )
        .unwrap();
        assert!(inferred
            .iter()
            .all(|t| t.specialization == Specialization::Security));

        let explicit = decompose(
            "security audit",
            &scope,
            DecompositionStrategy::Files,
            Some(Specialization::Performance),
            &defaults(),
            &ids,
        )
        .unwrap();
        assert!(explicit
            .iter()
            .all(|t| t.specialization == Specialization::Performance));
    }

    #[test]
    fn test_empty_scope_rejected() {
        let ids = SequentialIds::new();
        assert!(decompose(
            "improve",
            &[],
            DecompositionStrategy::Auto,
            None,
            &defaults(),
            &ids,
        )
        .is_err());
    }

    #[test]
    fn test_chunk_size_tiers() {
        assert_eq!(chunk_size(4), 4);
        assert_eq!(chunk_size(5), 5);
        assert_eq!(chunk_size(12), 4);
        assert_eq!(chunk_size(20), 7);
        assert_eq!(chunk_size(21), 5);
        assert_eq!(chunk_size(100), 20);
    }
}
