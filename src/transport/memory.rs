//! In-memory blobbers
//!
//! Keeps every blobber's objects and staged connections in process. Faults
//! can be injected per blobber and operation, and rollbacks are counted, so
//! quorum behavior can be exercised without a network.

use super::{
    BlobberTransport, BlockRequest, CommitRequest, RefQuery, RefTarget, ShardUpload, TransportError,
    UploadMeta,
};
use crate::blobber::Blobber;
use crate::fileref::{CommitMetaTxn, DirListing, FileRef, FileStats, RefType};
use crate::path;
use crate::ticket::AuthTicket;
use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

/// Operations faults can be injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobberOp {
    GetRef,
    ListDir,
    Stats,
    Upload,
    Download,
    Delete,
    Rename,
    Copy,
    Commit,
    Rollback,
    CommitMeta,
}

#[derive(Debug, Clone)]
struct StoredObject {
    file_ref: FileRef,
    blocks: Vec<Vec<u8>>,
    thumbnail_blocks: Vec<Vec<u8>>,
    num_of_updates: u64,
    num_of_block_downloads: u64,
    write_marker_txn: String,
}

#[derive(Debug, Clone)]
enum Staged {
    Shard {
        path: String,
        chunk_index: u64,
        data: Vec<u8>,
        is_thumbnail: bool,
    },
    Delete(String),
    Rename { path: String, new_name: String },
    Copy { path: String, dest_dir: String },
}

#[derive(Debug, Default)]
struct MemoryBlobber {
    objects: BTreeMap<String, StoredObject>,
    pending: HashMap<String, Vec<Staged>>,
    faults: HashSet<BlobberOp>,
    offline: bool,
    rollbacks: usize,
    commits: usize,
}

fn prefix_of(dir: &str) -> String {
    if dir == "/" {
        "/".to_string()
    } else {
        format!("{dir}/")
    }
}

impl MemoryBlobber {
    fn under<'a>(&'a self, dir: &str) -> impl Iterator<Item = (&'a String, &'a StoredObject)> {
        let prefix = prefix_of(dir);
        self.objects
            .range(prefix.clone()..)
            .take_while(move |(p, _)| p.starts_with(&prefix))
    }

    fn is_dir(&self, dir: &str) -> bool {
        dir == "/" || self.under(dir).next().is_some()
    }

    fn exists(&self, path: &str) -> bool {
        self.objects.contains_key(path) || self.is_dir(path)
    }

    fn resolve(&self, allocation_id: &str, target: &RefTarget) -> Result<String, TransportError> {
        match target {
            RefTarget::Path(p) => Ok(p.clone()),
            RefTarget::LookupHash(hash) => {
                if let Some(obj) = self.objects.values().find(|o| &o.file_ref.lookup_hash == hash) {
                    return Ok(obj.file_ref.path.clone());
                }

                let mut dirs: HashSet<String> = HashSet::from(["/".to_string()]);
                for p in self.objects.keys() {
                    let mut dir = path::parent(p);
                    while dir != "/" && dirs.insert(dir.to_string()) {
                        dir = path::parent(dir);
                    }
                }

                dirs.into_iter()
                    .find(|d| path::lookup_hash(allocation_id, d) == *hash)
                    .ok_or_else(|| TransportError::NotFound(hash.clone()))
            }
        }
    }

    fn dir_ref(&self, allocation_id: &str, dir: &str) -> Option<FileRef> {
        if !self.is_dir(dir) {
            return None;
        }

        let (hashes, size): (Vec<&str>, u64) = self.under(dir).fold((vec![], 0), |(mut h, s), (_, o)| {
            h.push(o.file_ref.hash.as_str());
            (h, s + o.file_ref.size)
        });

        Some(FileRef {
            ref_type: RefType::Directory,
            name: path::file_name(dir).to_string(),
            path: dir.to_string(),
            lookup_hash: path::lookup_hash(allocation_id, dir),
            hash: FileRef::compute_dir_hash(dir, hashes),
            size,
            ..Default::default()
        })
    }

    fn file_ref(&self, allocation_id: &str, p: &str) -> Result<FileRef, TransportError> {
        if let Some(obj) = self.objects.get(p) {
            return Ok(obj.file_ref.clone());
        }
        self.dir_ref(allocation_id, p)
            .ok_or_else(|| TransportError::NotFound(p.to_string()))
    }

    fn children(&self, allocation_id: &str, dir: &str) -> Vec<FileRef> {
        let prefix = prefix_of(dir);
        let mut seen = HashSet::new();
        let mut children = Vec::new();

        for (p, obj) in self.under(dir) {
            let rest = &p[prefix.len()..];
            match rest.split_once('/') {
                None => children.push(obj.file_ref.clone()),
                Some((sub, _)) => {
                    if seen.insert(sub.to_string()) {
                        if let Some(r) = self.dir_ref(allocation_id, &path::join(dir, sub)) {
                            children.push(r);
                        }
                    }
                }
            }
        }

        children
    }

    fn move_object(&mut self, allocation_id: &str, from: &str, to: String, keep_source: bool) {
        let source = if keep_source {
            self.objects.get(from).cloned()
        } else {
            self.objects.remove(from)
        };

        if let Some(mut obj) = source {
            let now = chrono::Utc::now().timestamp();
            obj.file_ref.name = path::file_name(&to).to_string();
            obj.file_ref.lookup_hash = path::lookup_hash(allocation_id, &to);
            obj.file_ref.path = to.clone();
            obj.file_ref.hash = obj.file_ref.compute_file_hash();
            obj.file_ref.updated_at = now;
            self.objects.insert(to, obj);
        }
    }

    /// Move or copy `from` (file or directory) so it ends up at `to`
    fn relocate(&mut self, allocation_id: &str, from: &str, to: &str, keep_source: bool) {
        let mut moves = vec![];
        if self.objects.contains_key(from) {
            moves.push((from.to_string(), to.to_string()));
        }
        let prefix = prefix_of(from);
        for (p, _) in self.under(from) {
            moves.push((p.clone(), format!("{}/{}", to, &p[prefix.len()..])));
        }

        for (src, dst) in moves {
            self.move_object(allocation_id, &src, dst, keep_source);
        }
    }

    fn apply_upload(
        &mut self,
        allocation_id: &str,
        connection_id: &str,
        meta: &UploadMeta,
        mut shards: Vec<(u64, bool, Vec<u8>)>,
    ) -> Result<(), TransportError> {
        let existing = self.objects.get(&meta.path);
        if existing.is_some() && !meta.is_update && !meta.is_repair {
            return Err(TransportError::Rejected(format!("{} already exists", meta.path)));
        }
        if existing.is_none() && meta.is_update {
            return Err(TransportError::NotFound(meta.path.clone()));
        }

        shards.sort_by_key(|(index, _, _)| *index);
        let (thumbs, blocks): (Vec<_>, Vec<_>) = shards.into_iter().partition(|(_, t, _)| *t);

        let now = chrono::Utc::now().timestamp();
        let created_at = existing.map_or(now, |o| o.file_ref.created_at);
        let num_of_updates = existing.map_or(0, |o| o.num_of_updates + u64::from(meta.is_update));

        let mut file_ref = FileRef {
            ref_type: RefType::File,
            name: meta.name.clone(),
            path: meta.path.clone(),
            lookup_hash: path::lookup_hash(allocation_id, &meta.path),
            hash: String::new(),
            mime_type: meta.mime_type.clone(),
            size: meta.size,
            actual_file_size: meta.actual_size,
            actual_file_hash: meta.actual_hash.clone(),
            chunk_size: meta.chunk_size,
            thumbnail_size: meta.thumbnail_size,
            actual_thumbnail_size: meta.actual_thumbnail_size,
            actual_thumbnail_hash: meta.actual_thumbnail_hash.clone(),
            encrypted_key: meta.encrypted_key.clone(),
            commit_meta_txns: vec![],
            created_at,
            updated_at: now,
        };
        file_ref.hash = file_ref.compute_file_hash();

        self.objects.insert(
            meta.path.clone(),
            StoredObject {
                file_ref,
                blocks: blocks.into_iter().map(|(_, _, d)| d).collect(),
                thumbnail_blocks: thumbs.into_iter().map(|(_, _, d)| d).collect(),
                num_of_updates,
                num_of_block_downloads: 0,
                write_marker_txn: connection_id.to_string(),
            },
        );

        Ok(())
    }

    fn commit(&mut self, request: &CommitRequest) -> Result<(), TransportError> {
        let staged = self.pending.remove(&request.connection_id).unwrap_or_default();
        let alloc = request.allocation_id.as_str();
        let mut shards = vec![];

        for change in staged {
            match change {
                Staged::Shard {
                    path: p,
                    chunk_index,
                    data,
                    is_thumbnail,
                } => {
                    let expected = request.upload.as_ref().map(|m| m.path.as_str());
                    if expected != Some(p.as_str()) {
                        return Err(TransportError::Protocol(format!("no upload meta for {p}")));
                    }
                    shards.push((chunk_index, is_thumbnail, data));
                }
                Staged::Delete(p) => {
                    self.objects.remove(&p);
                    let doomed: Vec<String> = self.under(&p).map(|(k, _)| k.clone()).collect();
                    for k in doomed {
                        self.objects.remove(&k);
                    }
                }
                Staged::Rename { path: p, new_name } => {
                    let to = path::join(path::parent(&p), &new_name);
                    self.relocate(alloc, &p, &to, false);
                }
                Staged::Copy { path: p, dest_dir } => {
                    let to = path::join(&dest_dir, path::file_name(&p));
                    self.relocate(alloc, &p, &to, true);
                }
            }
        }

        if let Some(meta) = &request.upload {
            self.apply_upload(alloc, &request.connection_id, meta, shards)?;
        }

        self.commits += 1;
        Ok(())
    }
}

/// A set of blobbers living in this process
#[derive(Default)]
pub struct MemoryNetwork {
    blobbers: Mutex<HashMap<String, MemoryBlobber>>,
    owner_key: Mutex<Option<VerifyingKey>>,
    latency: Mutex<Option<Duration>>,
}

impl MemoryNetwork {
    pub fn new(blobbers: &[Blobber]) -> Self {
        let network = Self::default();
        {
            let mut guard = network.blobbers.lock();
            for b in blobbers {
                guard.insert(b.id.clone(), MemoryBlobber::default());
            }
        }
        network
    }

    /// Make `op` fail on one blobber until healed
    pub fn fail(&self, blobber_id: &str, op: BlobberOp) {
        if let Some(b) = self.blobbers.lock().get_mut(blobber_id) {
            b.faults.insert(op);
        }
    }

    pub fn heal(&self, blobber_id: &str, op: BlobberOp) {
        if let Some(b) = self.blobbers.lock().get_mut(blobber_id) {
            b.faults.remove(&op);
        }
    }

    /// An offline blobber fails every call
    pub fn set_offline(&self, blobber_id: &str, offline: bool) {
        if let Some(b) = self.blobbers.lock().get_mut(blobber_id) {
            b.offline = offline;
        }
    }

    /// Delay applied to every call
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Verify auth ticket signatures against the allocation owner's key
    pub fn set_owner_key(&self, key: VerifyingKey) {
        *self.owner_key.lock() = Some(key);
    }

    pub fn rollback_count(&self, blobber_id: &str) -> usize {
        self.blobbers.lock().get(blobber_id).map_or(0, |b| b.rollbacks)
    }

    pub fn commit_count(&self, blobber_id: &str) -> usize {
        self.blobbers.lock().get(blobber_id).map_or(0, |b| b.commits)
    }

    pub fn has_object(&self, blobber_id: &str, path: &str) -> bool {
        self.blobbers
            .lock()
            .get(blobber_id)
            .is_some_and(|b| b.objects.contains_key(path))
    }

    pub fn object_ref(&self, blobber_id: &str, path: &str) -> Option<FileRef> {
        self.blobbers
            .lock()
            .get(blobber_id)
            .and_then(|b| b.objects.get(path).map(|o| o.file_ref.clone()))
    }

    /// Drop an object as if the blobber lost it
    pub fn remove_object(&self, blobber_id: &str, path: &str) -> bool {
        self.blobbers
            .lock()
            .get_mut(blobber_id)
            .is_some_and(|b| b.objects.remove(path).is_some())
    }

    /// Alter what one blobber reports about an object
    pub fn tamper_ref(&self, blobber_id: &str, path: &str, f: impl FnOnce(&mut FileRef)) {
        if let Some(obj) = self
            .blobbers
            .lock()
            .get_mut(blobber_id)
            .and_then(|b| b.objects.get_mut(path))
        {
            f(&mut obj.file_ref);
        }
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn access<R>(
        &self,
        blobber: &Blobber,
        op: BlobberOp,
        f: impl FnOnce(&mut MemoryBlobber) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        self.delay().await;

        let mut guard = self.blobbers.lock();
        let state = guard
            .get_mut(&blobber.id)
            .ok_or_else(|| TransportError::Unreachable(blobber.url.clone()))?;

        if state.offline {
            return Err(TransportError::Unreachable(blobber.url.clone()));
        }
        if state.faults.contains(&op) {
            return Err(TransportError::Rejected(format!("{op:?} refused by {}", blobber.id)));
        }

        f(state)
    }

    fn authorize(
        owner_key: Option<VerifyingKey>,
        state: &MemoryBlobber,
        query: &RefQuery,
        target: &str,
    ) -> Result<(), TransportError> {
        let Some(encoded) = &query.auth_ticket else {
            return Ok(());
        };

        let ticket =
            AuthTicket::decode(encoded).map_err(|e| TransportError::Unauthorized(e.to_string()))?;
        if ticket.allocation_id != query.allocation_id {
            return Err(TransportError::Unauthorized("ticket is for another allocation".into()));
        }
        if ticket.is_expired(chrono::Utc::now().timestamp()) {
            return Err(TransportError::Unauthorized("ticket expired".into()));
        }
        if let Some(key) = owner_key {
            ticket
                .verify(&key)
                .map_err(|e| TransportError::Unauthorized(e.to_string()))?;
        }

        let granted = state.resolve(
            &query.allocation_id,
            &RefTarget::LookupHash(ticket.file_path_hash.clone()),
        )?;
        let within = ticket.reference_type == RefType::Directory
            && target.starts_with(&prefix_of(&granted));

        if target == granted || within {
            Ok(())
        } else {
            Err(TransportError::Unauthorized(format!("{target} not covered by ticket")))
        }
    }

    fn read_target(
        owner_key: Option<VerifyingKey>,
        state: &MemoryBlobber,
        query: &RefQuery,
    ) -> Result<String, TransportError> {
        let target = state.resolve(&query.allocation_id, &query.target)?;
        Self::authorize(owner_key, state, query, &target)?;
        Ok(target)
    }

    fn stage(state: &mut MemoryBlobber, connection_id: &str, change: Staged) {
        state
            .pending
            .entry(connection_id.to_string())
            .or_default()
            .push(change);
    }
}

#[async_trait]
impl BlobberTransport for MemoryNetwork {
    async fn get_file_ref(&self, blobber: &Blobber, query: &RefQuery) -> Result<FileRef, TransportError> {
        let owner_key = *self.owner_key.lock();
        self.access(blobber, BlobberOp::GetRef, |b| {
            let target = Self::read_target(owner_key, b, query)?;
            b.file_ref(&query.allocation_id, &target)
        })
        .await
    }

    async fn list_dir(&self, blobber: &Blobber, query: &RefQuery) -> Result<DirListing, TransportError> {
        let owner_key = *self.owner_key.lock();
        self.access(blobber, BlobberOp::ListDir, |b| {
            let target = Self::read_target(owner_key, b, query)?;
            let meta = b.file_ref(&query.allocation_id, &target)?;
            let children = if meta.is_dir() {
                b.children(&query.allocation_id, &target)
            } else {
                vec![]
            };
            Ok(DirListing { meta, children })
        })
        .await
    }

    async fn file_stats(
        &self,
        blobber: &Blobber,
        allocation_id: &str,
        path: &str,
    ) -> Result<FileStats, TransportError> {
        self.access(blobber, BlobberOp::Stats, |b| {
            let obj = b
                .objects
                .get(path)
                .ok_or_else(|| TransportError::NotFound(path.to_string()))?;
            Ok(FileStats {
                name: obj.file_ref.name.clone(),
                size: obj.file_ref.size,
                path_hash: path::lookup_hash(allocation_id, path),
                path: path.to_string(),
                num_of_blocks: obj.blocks.len() as u64,
                num_of_updates: obj.num_of_updates,
                num_of_block_downloads: obj.num_of_block_downloads,
                write_marker_txn: obj.write_marker_txn.clone(),
                ..Default::default()
            })
        })
        .await
    }

    async fn upload_shard(&self, blobber: &Blobber, shard: &ShardUpload) -> Result<(), TransportError> {
        self.access(blobber, BlobberOp::Upload, |b| {
            Self::stage(
                b,
                &shard.connection_id,
                Staged::Shard {
                    path: shard.path.clone(),
                    chunk_index: shard.chunk_index,
                    data: shard.data.clone(),
                    is_thumbnail: shard.is_thumbnail,
                },
            );
            Ok(())
        })
        .await
    }

    async fn download_blocks(
        &self,
        blobber: &Blobber,
        request: &BlockRequest,
    ) -> Result<Vec<Vec<u8>>, TransportError> {
        let owner_key = *self.owner_key.lock();
        self.access(blobber, BlobberOp::Download, |b| {
            let target = Self::read_target(owner_key, b, &request.query)?;
            let obj = b
                .objects
                .get_mut(&target)
                .ok_or_else(|| TransportError::NotFound(target.clone()))?;

            let source = if request.thumbnail {
                &obj.thumbnail_blocks
            } else {
                &obj.blocks
            };
            let start = (request.start_block as usize).min(source.len());
            let end = start.saturating_add(request.num_blocks as usize).min(source.len());
            let blocks = source[start..end].to_vec();

            obj.num_of_block_downloads += blocks.len() as u64;
            Ok(blocks)
        })
        .await
    }

    async fn delete_object(
        &self,
        blobber: &Blobber,
        _allocation_id: &str,
        connection_id: &str,
        path: &str,
    ) -> Result<(), TransportError> {
        self.access(blobber, BlobberOp::Delete, |b| {
            if !b.exists(path) {
                return Err(TransportError::NotFound(path.to_string()));
            }
            Self::stage(b, connection_id, Staged::Delete(path.to_string()));
            Ok(())
        })
        .await
    }

    async fn rename_object(
        &self,
        blobber: &Blobber,
        _allocation_id: &str,
        connection_id: &str,
        path: &str,
        new_name: &str,
    ) -> Result<(), TransportError> {
        self.access(blobber, BlobberOp::Rename, |b| {
            if !b.exists(path) {
                return Err(TransportError::NotFound(path.to_string()));
            }
            if b.exists(&path::join(path::parent(path), new_name)) {
                return Err(TransportError::Rejected(format!("{new_name} already exists")));
            }
            Self::stage(
                b,
                connection_id,
                Staged::Rename {
                    path: path.to_string(),
                    new_name: new_name.to_string(),
                },
            );
            Ok(())
        })
        .await
    }

    async fn copy_object(
        &self,
        blobber: &Blobber,
        _allocation_id: &str,
        connection_id: &str,
        path: &str,
        dest_dir: &str,
    ) -> Result<(), TransportError> {
        self.access(blobber, BlobberOp::Copy, |b| {
            if !b.exists(path) {
                return Err(TransportError::NotFound(path.to_string()));
            }
            if b.objects.contains_key(dest_dir) {
                return Err(TransportError::Rejected(format!("{dest_dir} is a file")));
            }
            Self::stage(
                b,
                connection_id,
                Staged::Copy {
                    path: path.to_string(),
                    dest_dir: dest_dir.to_string(),
                },
            );
            Ok(())
        })
        .await
    }

    async fn commit(&self, blobber: &Blobber, request: &CommitRequest) -> Result<(), TransportError> {
        self.access(blobber, BlobberOp::Commit, |b| b.commit(request)).await
    }

    async fn rollback(
        &self,
        blobber: &Blobber,
        _allocation_id: &str,
        connection_id: &str,
    ) -> Result<(), TransportError> {
        self.access(blobber, BlobberOp::Rollback, |b| {
            b.pending.remove(connection_id);
            b.rollbacks += 1;
            Ok(())
        })
        .await
    }

    async fn add_commit_meta_txn(
        &self,
        blobber: &Blobber,
        query: &RefQuery,
        txn_id: &str,
    ) -> Result<(), TransportError> {
        let owner_key = *self.owner_key.lock();
        self.access(blobber, BlobberOp::CommitMeta, |b| {
            let target = Self::read_target(owner_key, b, query)?;
            let obj = b
                .objects
                .get_mut(&target)
                .ok_or_else(|| TransportError::NotFound(target.clone()))?;
            obj.file_ref.commit_meta_txns.push(CommitMetaTxn {
                txn_id: txn_id.to_string(),
                created_at: chrono::Utc::now().timestamp(),
            });
            Ok(())
        })
        .await
    }
}
