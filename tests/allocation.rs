use allocation_sdk::consensus::{OpMask, RepairPlan};
use allocation_sdk::fileref::RefType;
use allocation_sdk::transport::memory::{BlobberOp, MemoryNetwork};
use allocation_sdk::transport::BlobberTransport;
use allocation_sdk::{
    Allocation, AllocationEnv, Blobber, ClientIdentity, Consensus, Lifecycle, OpKind, SdkConfig,
    SdkError, StatusCallback,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const ALLOCATION_ID: &str = "alloc-1";

fn blobbers(count: usize) -> Vec<Blobber> {
    (0..count)
        .map(|i| Blobber::new(format!("b{i}"), format!("http://blobber{i}.local")))
        .collect()
}

fn allocation_json(data_shards: usize, parity_shards: usize, owner: &ClientIdentity) -> String {
    serde_json::json!({
        "id": ALLOCATION_ID,
        "tx": "tx-1",
        "data_shards": data_shards,
        "parity_shards": parity_shards,
        "size": 1 << 30,
        "expiration_date": 4_000_000_000i64,
        "owner_id": owner.client_id(),
        "owner_public_key": owner.public_key_hex(),
        "blobbers": blobbers(data_shards + parity_shards),
    })
    .to_string()
}

fn small_chunks() -> SdkConfig {
    SdkConfig {
        chunk_size: 16,
        blocks_per_download: 2,
        ..Default::default()
    }
}

struct Fixture {
    network: Arc<MemoryNetwork>,
    owner: Arc<ClientIdentity>,
    allocation: Allocation,
    json: String,
    dir: TempDir,
}

impl Fixture {
    fn new(data_shards: usize, parity_shards: usize) -> Self {
        let (owner, _) = ClientIdentity::generate(None).unwrap();
        let owner = Arc::new(owner);
        let network = Arc::new(MemoryNetwork::new(&blobbers(data_shards + parity_shards)));
        network.set_owner_key(*owner.verifying_key());

        let json = allocation_json(data_shards, parity_shards, &owner);
        let allocation = Allocation::from_json(&json).unwrap();
        allocation.init_allocation(Self::env(&network, &owner)).unwrap();

        Self {
            network,
            owner,
            allocation,
            json,
            dir: TempDir::new().unwrap(),
        }
    }

    fn env(network: &Arc<MemoryNetwork>, identity: &Arc<ClientIdentity>) -> AllocationEnv {
        let transport: Arc<dyn BlobberTransport> = network.clone();
        AllocationEnv::new(transport, Arc::clone(identity)).with_config(small_chunks())
    }

    fn local_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn download_dir(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    async fn upload(&self, name: &str, remote: &str, content: &[u8]) -> PathBuf {
        let local = self.local_file(name, content);
        self.allocation
            .upload_file(&local, remote, None)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        local
    }

    fn holders(&self, remote: &str) -> Vec<usize> {
        (0..self.allocation.blobbers.len())
            .filter(|i| self.network.has_object(&format!("b{i}"), remote))
            .collect()
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl StatusCallback for Recorder {
    fn started(&self, _allocation_id: &str, path: &str, op: OpKind, _total_bytes: u64) {
        self.events.lock().push(format!("started {op} {path}"));
    }

    fn in_progress(&self, _allocation_id: &str, _path: &str, _op: OpKind, _completed_bytes: u64) {}

    fn error(&self, _allocation_id: &str, path: &str, op: OpKind, _err: &SdkError) {
        self.events.lock().push(format!("error {op} {path}"));
    }

    fn completed(&self, _allocation_id: &str, path: &str, op: OpKind, size: u64, _mime_type: &str) {
        self.events.lock().push(format!("completed {op} {path} {size}"));
    }

    fn commit_meta_completed(&self, _request: &str, _txn_hash: &str, err: Option<&SdkError>) {
        self.events.lock().push(format!("meta committed {}", err.is_none()));
    }

    fn repair_completed(&self, files_repaired: usize) {
        self.events.lock().push(format!("repaired {files_repaired}"));
    }
}

async fn read(path: impl AsRef<Path>) -> Vec<u8> {
    tokio::fs::read(path).await.unwrap()
}

#[tokio::test]
async fn test_upload_download_round_trip() {
    let fx = Fixture::new(2, 2);
    let content = payload(100);
    let local = fx.local_file("report.txt", &content);
    let recorder = Arc::new(Recorder::default());

    fx.allocation
        .upload_file(&local, "/docs/", Some(recorder.clone()))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(fx.holders("/docs/report.txt"), vec![0, 1, 2, 3]);
    assert_eq!(
        recorder.events(),
        vec![
            "started upload /docs/report.txt".to_string(),
            "completed upload /docs/report.txt 100".to_string(),
        ]
    );

    let out = fx.download_dir("out");
    fx.allocation
        .download_file(&out, "/docs/report.txt", None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(read(out.join("report.txt")).await, content);
}

#[tokio::test]
async fn test_one_failed_blobber_still_commits() {
    let fx = Fixture::new(2, 2);
    fx.network.fail("b3", BlobberOp::Upload);

    fx.upload("a.bin", "/a.bin", &payload(70)).await;

    assert_eq!(fx.holders("/a.bin"), vec![0, 1, 2]);
    assert_eq!(fx.network.rollback_count("b0"), 0);
}

#[tokio::test]
async fn test_two_failed_blobbers_meet_boundary() {
    let fx = Fixture::new(2, 2);
    fx.network.fail("b2", BlobberOp::Upload);
    fx.network.fail("b3", BlobberOp::Upload);

    fx.upload("a.bin", "/a.bin", &payload(70)).await;

    assert_eq!(fx.holders("/a.bin"), vec![0, 1]);

    let out = fx.download_dir("out");
    fx.allocation
        .download_file(&out, "/a.bin", None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(read(out.join("a.bin")).await, payload(70));
}

#[tokio::test]
async fn test_below_threshold_rolls_back_acked_blobbers() {
    let fx = Fixture::new(3, 1);
    fx.network.fail("b2", BlobberOp::Upload);
    fx.network.fail("b3", BlobberOp::Upload);
    let local = fx.local_file("a.bin", &payload(40));
    let recorder = Arc::new(Recorder::default());

    let err = fx
        .allocation
        .upload_file(&local, "/a.bin", Some(recorder.clone()))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SdkError::ConsensusNotReached {
            operation: OpKind::Upload,
            successes: 2,
            ..
        }
    ));
    assert_eq!(fx.network.rollback_count("b0"), 1);
    assert_eq!(fx.network.rollback_count("b1"), 1);
    assert_eq!(fx.network.rollback_count("b2"), 0);
    assert_eq!(fx.network.rollback_count("b3"), 0);
    assert!(fx.holders("/a.bin").is_empty());
    assert!(recorder.events().contains(&"error upload /a.bin".to_string()));
}

#[tokio::test]
async fn test_upload_existing_object_needs_update() {
    let fx = Fixture::new(2, 2);
    let local = fx.upload("a.txt", "/a.txt", b"first version").await;

    let err = fx
        .allocation
        .upload_file(&local, "/a.txt", None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::ConsensusNotReached { .. }));

    std::fs::write(&local, b"second version").unwrap();
    fx.allocation
        .update_file(&local, "/a.txt", None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let meta = fx.allocation.get_file_meta("/a.txt").await.unwrap();
    assert_eq!(meta.size, b"second version".len() as u64);
}

#[tokio::test]
async fn test_repair_targets_missing_blobbers() {
    let fx = Fixture::new(2, 2);
    let content = payload(90);
    let local = fx.upload("a.bin", "/a.bin", &content).await;

    fx.network.remove_object("b1", "/a.bin");
    fx.network.remove_object("b3", "/a.bin");

    let plan = RepairPlan::new(OpMask::all(4), OpMask::from_bits(0b0101), Consensus::new(2, 2))
        .unwrap();
    assert_eq!(plan.mask.bits(), 0b1010);
    assert_eq!(plan.consensus.full(), 2.0);

    let recorder = Arc::new(Recorder::default());
    let handle = fx
        .allocation
        .repair_file(&local, "/a.bin", Some(recorder.clone()))
        .await
        .unwrap();
    assert!(fx.allocation.under_repair());
    handle.wait().await.unwrap();

    assert_eq!(fx.holders("/a.bin"), vec![0, 1, 2, 3]);
    assert!(recorder.events().contains(&"repaired 1".to_string()));
    assert_eq!(fx.network.commit_count("b0"), 1);

    let err = fx.allocation.delete_file("/a.bin").await.unwrap_err();
    assert!(matches!(err, SdkError::UnderRepair));
    let err = fx
        .allocation
        .commit_meta_transaction("/a.bin", "update", None, None, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::UnderRepair));
    let err = fx
        .allocation
        .download_file(fx.download_dir("during"), "/a.bin", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::UnderRepair));

    fx.allocation.update_repair_status(false);
    fx.network.set_offline("b0", true);
    fx.network.set_offline("b2", true);

    let out = fx.download_dir("out");
    fx.allocation
        .download_file(&out, "/a.bin", None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(read(out.join("a.bin")).await, content);
}

#[tokio::test]
async fn test_repair_not_needed_when_all_hold_object() {
    let fx = Fixture::new(2, 2);
    let local = fx.upload("a.bin", "/a.bin", &payload(20)).await;

    let err = fx
        .allocation
        .repair_file(&local, "/a.bin", None)
        .await
        .unwrap_err();

    assert!(matches!(err, SdkError::NoRepairNeeded));
    assert!(!fx.allocation.under_repair());
}

#[tokio::test]
async fn test_repair_of_missing_object() {
    let fx = Fixture::new(2, 2);
    let local = fx.local_file("ghost.bin", b"boo");

    let err = fx
        .allocation
        .repair_file(&local, "/ghost.bin", None)
        .await
        .unwrap_err();

    assert!(matches!(err, SdkError::NotFound(_)));
    assert!(!fx.allocation.under_repair());
}

#[tokio::test]
async fn test_repair_rejects_different_content() {
    let fx = Fixture::new(2, 2);
    let local = fx.upload("a.bin", "/a.bin", &payload(20)).await;
    fx.network.remove_object("b3", "/a.bin");
    std::fs::write(&local, b"not what was uploaded").unwrap();

    let err = fx
        .allocation
        .repair_file(&local, "/a.bin", None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();

    assert!(matches!(err, SdkError::IntegrityCheckFailed(_)));
    assert!(!fx.network.has_object("b3", "/a.bin"));
}

#[tokio::test]
async fn test_cancel_unknown_upload() {
    let fx = Fixture::new(2, 2);

    let err = fx.allocation.cancel_upload("/nowhere/file.txt").unwrap_err();
    assert!(matches!(err, SdkError::NotFound(_)));

    let err = fx.allocation.cancel_download("/nowhere/file.txt").unwrap_err();
    assert!(matches!(err, SdkError::NotFound(_)));
}

#[tokio::test]
async fn test_cancel_running_upload() {
    let fx = Fixture::new(2, 2);
    fx.network.set_latency(Duration::from_millis(20));
    let local = fx.local_file("big.bin", &payload(32 * 20));

    let handle = fx.allocation.upload_file(&local, "/big.bin", None).await.unwrap();
    fx.allocation.cancel_upload(&local).unwrap();

    assert!(matches!(handle.wait().await, Err(SdkError::Cancelled)));
    assert!(fx.holders("/big.bin").is_empty());

    let err = fx.allocation.cancel_upload(&local).unwrap_err();
    assert!(matches!(err, SdkError::NotFound(_)));
}

#[tokio::test]
async fn test_same_local_path_in_progress() {
    let fx = Fixture::new(2, 2);
    fx.network.set_latency(Duration::from_millis(20));
    let local = fx.local_file("a.bin", &payload(64));

    let first = fx.allocation.upload_file(&local, "/a.bin", None).await.unwrap();
    let err = fx
        .allocation
        .upload_file(&local, "/b.bin", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::InProgress(_)));

    first.wait().await.unwrap();
    fx.allocation
        .upload_file(&local, "/b.bin", None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_uninitialized_allocation_rejects_everything() {
    let (owner, _) = ClientIdentity::generate(None).unwrap();
    let allocation = Allocation::from_json(&allocation_json(2, 2, &owner)).unwrap();

    assert!(!allocation.is_initialized());
    assert!(matches!(
        allocation.upload_file("/tmp/a", "/a", None).await,
        Err(SdkError::NotInitialized)
    ));
    assert!(matches!(allocation.list_dir("/").await, Err(SdkError::NotInitialized)));
    assert!(matches!(allocation.delete_file("/a").await, Err(SdkError::NotInitialized)));
    assert!(matches!(allocation.cancel_upload("/tmp/a"), Err(SdkError::NotInitialized)));
}

#[tokio::test]
async fn test_init_checks_blobber_count() {
    let (owner, _) = ClientIdentity::generate(None).unwrap();
    let owner = Arc::new(owner);
    let network = Arc::new(MemoryNetwork::new(&blobbers(4)));

    let mut json: serde_json::Value =
        serde_json::from_str(&allocation_json(2, 2, &owner)).unwrap();
    json["parity_shards"] = serde_json::json!(1);
    let allocation = Allocation::from_json(&json.to_string()).unwrap();

    let err = allocation
        .init_allocation(Fixture::env(&network, &owner))
        .unwrap_err();
    assert!(matches!(err, SdkError::InvalidAllocation(_)));
    assert!(!allocation.is_initialized());

    let allocation = Allocation::from_json(&allocation_json(2, 2, &owner)).unwrap();
    allocation.init_allocation(Fixture::env(&network, &owner)).unwrap();
    let err = allocation
        .init_allocation(Fixture::env(&network, &owner))
        .unwrap_err();
    assert!(matches!(err, SdkError::InvalidAllocation(_)));
}

#[tokio::test]
async fn test_invalid_paths() {
    let fx = Fixture::new(2, 2);
    let local = fx.local_file("a.txt", b"x");

    for bad in ["", "relative/a.txt", "."] {
        let err = fx.allocation.upload_file(&local, bad, None).await.unwrap_err();
        assert!(matches!(err, SdkError::InvalidPath(_)), "{bad:?} accepted");
    }
    assert!(matches!(
        fx.allocation.list_dir("docs").await,
        Err(SdkError::InvalidPath(_))
    ));
    assert!(matches!(
        fx.allocation.delete_file("").await,
        Err(SdkError::InvalidPath(_))
    ));

    fx.upload("b.txt", "/docs//./tmp/../b.txt", b"normalized").await;
    assert_eq!(fx.holders("/docs/b.txt"), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_upload_to_path_cleaning_to_root() {
    let fx = Fixture::new(2, 2);

    fx.upload("cat.png", "/docs/..", b"meow").await;
    fx.upload("dog.png", "/.", b"woof").await;
    assert_eq!(fx.holders("/cat.png"), vec![0, 1, 2, 3]);
    assert_eq!(fx.holders("/dog.png"), vec![0, 1, 2, 3]);

    let listing = fx.allocation.list_dir("/").await.unwrap();
    assert_eq!(listing.ref_type, RefType::Directory);
    let mut names: Vec<&str> = listing.children.iter().map(|c| c.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["cat.png", "dog.png"]);
}

#[tokio::test]
async fn test_missing_local_file() {
    let fx = Fixture::new(2, 2);
    let err = fx
        .allocation
        .upload_file(fx.dir.path().join("absent.txt"), "/a.txt", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::LocalIo(_)));
}

#[tokio::test]
async fn test_download_never_overwrites() {
    let fx = Fixture::new(2, 2);
    fx.upload("a.txt", "/a.txt", b"remote").await;

    let out = fx.download_dir("out");
    std::fs::write(out.join("a.txt"), b"local").unwrap();

    let err = fx.allocation.download_file(&out, "/a.txt", None).await.unwrap_err();
    assert!(matches!(err, SdkError::LocalIo(_)));
    assert_eq!(read(out.join("a.txt")).await, b"local");
}

#[tokio::test]
async fn test_download_needs_two_blobbers() {
    let fx = Fixture::new(1, 0);
    let out = fx.download_dir("out");

    let err = fx.allocation.download_file(&out, "/a.txt", None).await.unwrap_err();
    assert!(matches!(err, SdkError::NoBlobbers));
    assert!(matches!(fx.allocation.list_dir("/").await, Err(SdkError::NoBlobbers)));
}

#[tokio::test]
async fn test_download_with_corrupt_size_fails() {
    let fx = Fixture::new(2, 2);
    fx.upload("a.bin", "/a.bin", &payload(32)).await;
    for i in 0..4 {
        fx.network.tamper_ref(&format!("b{i}"), "/a.bin", |r| r.size = u64::MAX);
    }

    let out = fx.download_dir("out");
    let err = fx
        .allocation
        .download_file(&out, "/a.bin", None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();

    assert!(matches!(err, SdkError::ConsensusNotReached { .. }), "{err:?}");
    assert!(!out.join("a.bin").exists());
}

#[tokio::test]
async fn test_download_missing_object() {
    let fx = Fixture::new(2, 2);
    let out = fx.download_dir("out");

    let err = fx
        .allocation
        .download_file(&out, "/absent.txt", None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::NotFound(_)));
    assert!(!out.join("absent.txt").exists());
}

#[tokio::test]
async fn test_thumbnail_round_trip() {
    let fx = Fixture::new(2, 2);
    let local = fx.local_file("photo.jpg", &payload(150));
    let thumb = fx.local_file("photo-thumb.jpg", &payload(33));

    fx.allocation
        .upload_file_with_thumbnail(&local, "/photos/photo.jpg", &thumb, None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let out = fx.download_dir("thumbs");
    fx.allocation
        .download_thumbnail(&out, "/photos/photo.jpg", None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(read(out.join("photo.jpg")).await, payload(33));

    let meta = fx.allocation.get_file_meta("/photos/photo.jpg").await.unwrap();
    assert_eq!(meta.mime_type, "image/jpeg");
}

#[tokio::test]
async fn test_encrypted_round_trip() {
    let fx = Fixture::new(2, 2);
    let content = payload(120);
    let local = fx.local_file("secret.bin", &content);

    fx.allocation
        .encrypt_and_upload_file(&local, "/secret.bin", None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let stored = fx.network.object_ref("b0", "/secret.bin").unwrap();
    assert!(stored.is_encrypted());
    assert_ne!(stored.size, content.len() as u64);

    let out = fx.download_dir("out");
    fx.allocation
        .download_file(&out, "/secret.bin", None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(read(out.join("secret.bin")).await, content);
}

#[tokio::test]
async fn test_share_encrypted_file_with_recipient() {
    let fx = Fixture::new(2, 2);
    let content = payload(80);
    let local = fx.local_file("shared.bin", &content);
    fx.allocation
        .encrypt_and_upload_file(&local, "/shared.bin", None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let (recipient, _) = ClientIdentity::generate(None).unwrap();
    let recipient = Arc::new(recipient);
    let recipient_key = recipient.encryption_keys().public_key_hex();

    let ticket = fx
        .allocation
        .get_auth_ticket("/shared.bin", recipient.client_id(), Some(&recipient_key))
        .await
        .unwrap();

    let theirs = Allocation::from_json(&fx.json).unwrap();
    theirs
        .init_allocation(Fixture::env(&fx.network, &recipient))
        .unwrap();

    let meta = theirs.get_file_meta_from_auth_ticket(&ticket, "").await.unwrap();
    assert_eq!(meta.path, "/shared.bin");

    let out = fx.download_dir("recipient");
    theirs
        .download_from_auth_ticket(&out, &ticket, "", "", None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(read(out.join("shared.bin")).await, content);
}

#[tokio::test]
async fn test_plain_directory_ticket() {
    let fx = Fixture::new(2, 2);
    fx.upload("a.txt", "/shared/a.txt", b"alpha").await;
    fx.upload("b.txt", "/shared/b.txt", b"beta").await;

    let ticket = fx
        .allocation
        .get_auth_ticket_for_share("/shared", RefType::Directory, "")
        .unwrap();

    let listing = fx.allocation.list_dir_from_auth_ticket(&ticket, "").await.unwrap();
    assert_eq!(listing.children.len(), 2);

    let file_hash = allocation_sdk::path::lookup_hash(ALLOCATION_ID, "/shared/b.txt");
    let out = fx.download_dir("out");
    fx.allocation
        .download_from_auth_ticket(&out, &ticket, &file_hash, "b.txt", None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(read(out.join("b.txt")).await, b"beta");
}

#[tokio::test]
async fn test_ticket_decode_errors() {
    let fx = Fixture::new(2, 2);
    let out = fx.download_dir("out");

    let err = fx
        .allocation
        .download_from_auth_ticket(&out, "not a ticket", "", "", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::TicketDecode(_)));

    let mut foreign = allocation_sdk::AuthTicket {
        allocation_id: "another".into(),
        file_path_hash: "abc".into(),
        ..Default::default()
    };
    foreign.sign(&fx.owner);
    let err = fx
        .allocation
        .list_dir_from_auth_ticket(&foreign.encode().unwrap(), "")
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::TicketDecode(_)));
}

#[tokio::test]
async fn test_list_dir() {
    let fx = Fixture::new(2, 2);
    fx.upload("a.txt", "/docs/a.txt", b"alpha").await;
    fx.upload("b.txt", "/docs/sub/b.txt", b"beta").await;

    let listing = fx.allocation.list_dir("/docs").await.unwrap();
    assert_eq!(listing.ref_type, RefType::Directory);
    assert_eq!(listing.consensus, 4);

    let mut names: Vec<&str> = listing.children.iter().map(|c| c.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["a.txt", "sub"]);

    assert!(matches!(
        fx.allocation.list_dir("/nothing").await,
        Err(SdkError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_rename_copy_move() {
    let fx = Fixture::new(2, 2);
    fx.upload("a.txt", "/a.txt", b"alpha").await;

    fx.allocation.rename_object("/a.txt", "b.txt").await.unwrap();
    assert!(fx.holders("/a.txt").is_empty());
    assert_eq!(fx.holders("/b.txt"), vec![0, 1, 2, 3]);

    fx.allocation.copy_object("/b.txt", "/backup").await.unwrap();
    assert_eq!(fx.holders("/b.txt"), vec![0, 1, 2, 3]);
    assert_eq!(fx.holders("/backup/b.txt"), vec![0, 1, 2, 3]);

    fx.allocation.move_object("/b.txt", "/archive").await.unwrap();
    assert!(fx.holders("/b.txt").is_empty());
    assert_eq!(fx.holders("/archive/b.txt"), vec![0, 1, 2, 3]);

    fx.allocation.delete_file("/backup/b.txt").await.unwrap();
    assert!(fx.holders("/backup/b.txt").is_empty());

    assert!(matches!(
        fx.allocation.delete_file("/backup/b.txt").await,
        Err(SdkError::NotFound(_))
    ));
    assert!(matches!(
        fx.allocation.rename_object("/archive/b.txt", "x/y").await,
        Err(SdkError::InvalidPath(_))
    ));
}

#[tokio::test]
async fn test_delete_below_threshold_rolls_back() {
    let fx = Fixture::new(3, 1);
    fx.upload("a.txt", "/a.txt", b"alpha").await;
    fx.network.fail("b2", BlobberOp::Delete);
    fx.network.fail("b3", BlobberOp::Delete);

    let err = fx.allocation.delete_file("/a.txt").await.unwrap_err();

    assert!(matches!(
        err,
        SdkError::ConsensusNotReached {
            operation: OpKind::Delete,
            successes: 2,
            ..
        }
    ));
    assert_eq!(fx.network.rollback_count("b0"), 1);
    assert_eq!(fx.network.rollback_count("b1"), 1);
    assert_eq!(fx.holders("/a.txt"), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_file_stats_reports_every_blobber() {
    let fx = Fixture::new(2, 2);
    fx.upload("a.txt", "/a.txt", &payload(50)).await;
    fx.network.set_offline("b2", true);

    let stats = fx.allocation.get_file_stats("/a.txt").await.unwrap();

    assert_eq!(stats.len(), 3);
    assert!(!stats.contains_key("b2"));
    let b0 = &stats["b0"];
    assert_eq!(b0.blobber_url, "http://blobber0.local");
    assert_eq!(b0.path, "/a.txt");
    assert_eq!(b0.num_of_blocks, 2);
}

#[tokio::test]
async fn test_file_meta_matches_quorum_ref() {
    let fx = Fixture::new(2, 2);
    fx.upload("notes.txt", "/notes.txt", b"some notes").await;
    fx.network.tamper_ref("b3", "/notes.txt", |r| r.hash = "forged".into());

    let meta = fx.allocation.get_file_meta("/notes.txt").await.unwrap();
    let source = fx.network.object_ref("b0", "/notes.txt").unwrap();

    assert_eq!(meta.hash, source.actual_file_hash);
    assert_eq!(meta.size, source.actual_file_size);
    assert_eq!(meta.mime_type, source.mime_type);
    assert_eq!(meta.mime_type, "text/plain");
}

#[tokio::test]
async fn test_commit_meta_transaction() {
    let fx = Fixture::new(2, 2);
    fx.upload("a.txt", "/a.txt", b"alpha").await;
    let recorder = Arc::new(Recorder::default());

    fx.allocation
        .commit_meta_transaction("/a.txt", "update", None, None, None, Some(recorder.clone()))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    for i in 0..4 {
        let stored = fx.network.object_ref(&format!("b{i}"), "/a.txt").unwrap();
        assert_eq!(stored.commit_meta_txns.len(), 1);
    }
    assert_eq!(recorder.events(), vec!["meta committed true".to_string()]);

    let err = fx
        .allocation
        .commit_meta_transaction("/absent.txt", "update", None, None, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::NotFound(_)));
}

#[tokio::test]
async fn test_closed_allocation() {
    let fx = Fixture::new(2, 2);
    let local = fx.local_file("a.txt", b"alpha");

    fx.allocation.shutdown().await;
    let err = fx.allocation.upload_file(&local, "/a.txt", None).await.unwrap_err();
    assert!(matches!(err, SdkError::QueueClosed));
}

#[tokio::test]
async fn test_finalized_allocation_rejects_mutations() {
    let fx = Fixture::new(2, 2);
    fx.upload("a.txt", "/a.txt", b"alpha").await;

    fx.allocation.mark_finalized();
    assert_eq!(fx.allocation.lifecycle(), Lifecycle::Finalized);

    assert!(matches!(
        fx.allocation.delete_file("/a.txt").await,
        Err(SdkError::InvalidAllocation(_))
    ));
    assert!(fx.allocation.get_file_meta("/a.txt").await.is_ok());
}
