//! Bounded-depth walks over the document hierarchy.

use std::collections::HashSet;

use tracing::warn;

use recall_core::{Document, Result, StoreError, VectorStore};

/// Walk the ancestor chain of a document, nearest parent first.
///
/// The walk is cycle-guarded and stops at `max_depth` hops when given. A
/// dangling parent reference ends the walk rather than failing it.
pub async fn ancestors<S>(
    store: &S,
    doc: &Document,
    max_depth: Option<u32>,
) -> Result<Vec<Document>>
where
    S: VectorStore + ?Sized,
{
    let mut chain = Vec::new();
    let mut seen: HashSet<String> = HashSet::from([doc.id.clone()]);
    let mut next = doc.parent_id.clone();

    while let Some(parent_id) = next {
        if let Some(depth) = max_depth {
            if chain.len() as u32 >= depth {
                break;
            }
        }
        if !seen.insert(parent_id.clone()) {
            warn!(id = %parent_id, "cycle detected in ancestor chain");
            break;
        }

        match store.get_document(&parent_id).await {
            Ok(parent) => {
                next = parent.parent_id.clone();
                chain.push(parent);
            }
            Err(StoreError::NotFound { .. }) => {
                warn!(id = %parent_id, "dangling parent reference");
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(chain)
}

/// Walk the descendants of a document breadth-first, direct children first.
///
/// `max_depth` caps the walk (1 = direct children only); `None` walks the
/// whole subtree. Cycle-guarded against malformed data.
pub async fn descendants<S>(
    store: &S,
    doc: &Document,
    max_depth: Option<u32>,
) -> Result<Vec<Document>>
where
    S: VectorStore + ?Sized,
{
    let mut result = Vec::new();
    let mut seen: HashSet<String> = HashSet::from([doc.id.clone()]);
    let mut frontier = vec![doc.id.clone()];
    let mut depth = 0u32;

    while !frontier.is_empty() {
        if let Some(max) = max_depth {
            if depth >= max {
                break;
            }
        }
        depth += 1;

        let mut next_frontier = Vec::new();
        for id in frontier {
            for child in store.get_children(&id).await? {
                if !seen.insert(child.id.clone()) {
                    warn!(id = %child.id, "cycle detected in descendant walk");
                    continue;
                }
                next_frontier.push(child.id.clone());
                result.push(child);
            }
        }
        frontier = next_frontier;
    }

    Ok(result)
}
