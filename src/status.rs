//! Status reporting for asynchronous operations

use crate::SdkError;
use std::fmt;
use std::sync::Arc;

/// Kind of operation a status event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Upload,
    Download,
    Repair,
    List,
    Delete,
    Rename,
    Copy,
    Share,
    CommitMeta,
    Stat,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpKind::Upload => "upload",
            OpKind::Download => "download",
            OpKind::Repair => "repair",
            OpKind::List => "list",
            OpKind::Delete => "delete",
            OpKind::Rename => "rename",
            OpKind::Copy => "copy",
            OpKind::Share => "share",
            OpKind::CommitMeta => "commit meta",
            OpKind::Stat => "stat",
        };
        f.write_str(name)
    }
}

/// Receives progress of uploads, downloads and meta commits
///
/// Called from the task running the request, never from the dispatcher.
pub trait StatusCallback: Send + Sync {
    fn started(&self, allocation_id: &str, path: &str, op: OpKind, total_bytes: u64);

    /// `completed_bytes` so far, reported after every chunk or block range
    fn in_progress(&self, allocation_id: &str, path: &str, op: OpKind, completed_bytes: u64);

    fn error(&self, allocation_id: &str, path: &str, op: OpKind, err: &SdkError);

    fn completed(&self, allocation_id: &str, path: &str, op: OpKind, size: u64, mime_type: &str);

    fn commit_meta_completed(&self, _request: &str, _txn_hash: &str, _err: Option<&SdkError>) {}

    fn repair_completed(&self, _files_repaired: usize) {}
}

pub type StatusHandle = Arc<dyn StatusCallback>;
