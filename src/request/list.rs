//! Listing, file consensus and per-blobber stats

use super::{not_reached, RequestBase};
use crate::consensus::OpMask;
use crate::fileref::{DirListing, FileRef, FileStats, ListResult};
use crate::status::OpKind;
use crate::transport::{RefQuery, RefTarget, TransportError};
use crate::{Result, SdkError};
use std::collections::HashMap;
use tracing::debug;

/// Blobbers that agree on the most common version of an object
#[derive(Debug, Clone)]
pub(crate) struct FileConsensus {
    /// Blobbers reporting the selected version
    pub found: OpMask,
    pub file_ref: Option<FileRef>,
}

impl FileConsensus {
    /// The selected reference, provided enough blobbers agree on it
    pub fn into_ref(self, base: &RequestBase, operation: OpKind, target: &str) -> Result<FileRef> {
        match self.file_ref {
            None => Err(SdkError::NotFound(target.to_string())),
            Some(_) if !base.consensus.is_met_by(self.found) => {
                Err(not_reached(operation, self.found, &base.consensus))
            }
            Some(file_ref) => Ok(file_ref),
        }
    }
}

/// Group answers by content hash and pick the largest group
fn select<T>(answers: Vec<(usize, T)>, hash: impl Fn(&T) -> &str) -> (OpMask, Option<T>) {
    let mut groups: HashMap<String, (OpMask, T)> = HashMap::new();

    for (i, answer) in answers {
        groups
            .entry(hash(&answer).to_string())
            .or_insert_with(|| (OpMask::empty(), answer))
            .0
            .set(i);
    }

    groups
        .into_values()
        .max_by_key(|(mask, _)| mask.popcount())
        .map_or((OpMask::empty(), None), |(mask, answer)| (mask, Some(answer)))
}

fn describe(query: &RefQuery) -> &str {
    match &query.target {
        RefTarget::Path(p) => p,
        RefTarget::LookupHash(h) => h,
    }
}

pub(crate) struct ListRequest {
    pub base: RequestBase,
    pub query: RefQuery,
}

impl ListRequest {
    pub fn new(base: RequestBase, query: RefQuery) -> Self {
        Self { base, query }
    }

    /// Ask every blobber in `mask` for the object's reference
    pub async fn file_consensus(&self, mask: OpMask) -> FileConsensus {
        let results = self
            .base
            .fan_out(mask, |_, b| self.base.transport.get_file_ref(b, &self.query))
            .await;

        let answers: Vec<(usize, FileRef)> = results
            .into_iter()
            .filter_map(|(i, r)| r.ok().map(|f| (i, f)))
            .collect();

        let (found, file_ref) = select(answers, |f| f.hash.as_str());
        debug!(object = describe(&self.query), %found, "file consensus");

        FileConsensus {
            found,
            file_ref,
        }
    }

    /// Quorum reference of the object
    pub async fn file_ref(&self, operation: OpKind) -> Result<FileRef> {
        self.file_consensus(self.base.full_mask())
            .await
            .into_ref(&self.base, operation, describe(&self.query))
    }

    /// Quorum listing of a directory (or the single entry of a file)
    pub async fn list(&self) -> Result<ListResult> {
        let results = self
            .base
            .fan_out(self.base.full_mask(), |_, b| self.base.transport.list_dir(b, &self.query))
            .await;

        let all_missing = results
            .iter()
            .all(|(_, r)| matches!(r, Err(TransportError::NotFound(_))));
        if all_missing {
            return Err(SdkError::NotFound(describe(&self.query).to_string()));
        }

        let answers: Vec<(usize, DirListing)> = results
            .into_iter()
            .filter_map(|(i, r)| r.ok().map(|l| (i, l)))
            .collect();

        let (found, listing) = select(answers, |l| l.meta.hash.as_str());
        let listing = match listing {
            Some(listing) if self.base.consensus.is_met_by(found) => listing,
            _ => return Err(self.base.not_reached(OpKind::List, found)),
        };

        let count = found.popcount();
        let mut result = ListResult::from_ref(&listing.meta, count);
        result.children = listing
            .children
            .iter()
            .map(|child| ListResult::from_ref(child, count))
            .collect();

        Ok(result)
    }

    /// Stats from every blobber that answered, keyed by blobber id
    pub async fn stats(&self, path: &str) -> HashMap<String, FileStats> {
        let results = self
            .base
            .fan_out(self.base.full_mask(), |_, b| {
                self.base.transport.file_stats(b, &self.base.allocation_id, path)
            })
            .await;

        results
            .into_iter()
            .filter_map(|(i, r)| {
                let blobber = &self.base.blobbers[i];
                r.ok().map(|mut stats| {
                    stats.blobber_id = blobber.id.clone();
                    stats.blobber_url = blobber.url.clone();
                    (blobber.id.clone(), stats)
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_largest_group() {
        let answers = vec![(0, "a"), (1, "b"), (2, "a"), (3, "a")];
        let (mask, answer) = select(answers, |s| *s);
        assert_eq!(mask, OpMask::from_bits(0b1101));
        assert_eq!(answer, Some("a"));
    }

    #[test]
    fn test_select_nothing() {
        let (mask, answer) = select(Vec::<(usize, &str)>::new(), |s| *s);
        assert!(mask.is_empty());
        assert_eq!(answer, None);
    }
}
