//! Term-overlap search over an in-memory operation catalog.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::services::{ManagedService, SearchMatch, ServiceError, VectorSearch};

const NAME: &str = "operation-search";

/// Built-in catalog of commonly used Bitbucket operations.
pub fn default_operations() -> Vec<(String, String)> {
    [
        ("list-projects", "List projects visible to the authenticated user"),
        ("get-project", "Get a single project by key"),
        ("list-repositories", "List repositories in a project"),
        ("get-repository", "Get a repository by project key and slug"),
        ("list-pull-requests", "List pull requests for a repository"),
        ("get-pull-request", "Get a pull request by id"),
        ("create-pull-request", "Create a pull request between two branches"),
        ("merge-pull-request", "Merge an open pull request"),
        ("list-branches", "List branches in a repository"),
        ("list-commits", "List commits on a branch"),
        ("get-build-status", "Get build statuses for a commit"),
        ("get-server-info", "Get upstream server version and edition"),
    ]
    .into_iter()
    .map(|(id, description)| (id.to_string(), description.to_string()))
    .collect()
}

struct Entry {
    id: String,
    description: String,
    terms: Vec<String>,
}

pub struct InMemorySearch {
    entries: Vec<Entry>,
    ready: AtomicBool,
}

impl InMemorySearch {
    pub fn new(operations: Vec<(String, String)>) -> Self {
        let entries = operations
            .into_iter()
            .map(|(id, description)| {
                let terms = tokenize(&format!("{id} {description}"));
                Entry {
                    id,
                    description,
                    terms,
                }
            })
            .collect();
        Self {
            entries,
            ready: AtomicBool::new(false),
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl ManagedService for InMemorySearch {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn init(&self) -> Result<(), ServiceError> {
        self.ready.store(true, Ordering::SeqCst);
        tracing::debug!(operations = self.entries.len(), "Operation search ready");
        Ok(())
    }

    async fn dispose(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl VectorSearch for InMemorySearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchMatch>, ServiceError> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(ServiceError::NotReady(NAME));
        }

        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut matches: Vec<SearchMatch> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let hits = query_terms
                    .iter()
                    .filter(|q| entry.terms.iter().any(|t| t.starts_with(q.as_str())))
                    .count();
                (hits > 0).then(|| SearchMatch {
                    id: entry.id.clone(),
                    description: entry.description.clone(),
                    score: hits as f64 / query_terms.len() as f64,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(limit);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_requires_init() {
        let search = InMemorySearch::new(default_operations());
        assert!(matches!(search.search("pull", 5).await, Err(ServiceError::NotReady(_))));

        search.init().await.unwrap();
        assert!(!search.search("pull", 5).await.unwrap().is_empty());

        search.dispose().await;
        assert!(search.search("pull", 5).await.is_err());
    }

    #[tokio::test]
    async fn test_ranked_and_limited() {
        let search = InMemorySearch::new(default_operations());
        search.init().await.unwrap();

        let hits = search.search("merge pull request", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, "merge-pull-request");
        assert_eq!(hits[0].score, 1.0);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }
}
