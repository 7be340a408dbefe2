//! Revisioned reference dataset and the correction queue feeding it.
//!
//! The current snapshot lives in memory behind an `Arc`; SQLite holds every
//! published revision and all proposals. Accepting a proposal is the only way
//! the revision moves, and it is serialized by `apply_lock`.

mod corrections;
mod validate;

pub use corrections::apply_change;
pub use validate::validate_snapshot;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{
    CorrectionProposal, Decision, ProposalStatus, ProposeCorrectionRequest, RevisionInfo,
    Snapshot, SnapshotResponse,
};

/// Longest accepted free-text description on a proposal.
const MAX_DESCRIPTION_LEN: usize = 2000;

pub struct DatasetStore {
    repo: Repository,
    current: RwLock<Arc<Snapshot>>,
    apply_lock: Mutex<()>,
}

impl DatasetStore {
    /// Load the latest persisted revision, seeding an empty database from
    /// `dataset_path` first.
    pub async fn open(repo: Repository, dataset_path: &Path) -> Result<Self, AppError> {
        let snapshot = match repo.latest_snapshot().await? {
            Some(snapshot) => {
                let recorded = repo.get_revision().await?;
                if recorded != snapshot.revision {
                    return Err(AppError::invariant(format!(
                        "Stored revision {} disagrees with latest snapshot {}",
                        recorded, snapshot.revision
                    )));
                }
                validate_snapshot(&snapshot).map_err(|e| {
                    AppError::invariant(format!(
                        "Persisted revision {} is invalid: {}",
                        snapshot.revision, e
                    ))
                })?;
                tracing::info!("Loaded dataset revision {}", snapshot.revision);
                snapshot
            }
            None => {
                let seed = load_seed(dataset_path).await?;
                validate_snapshot(&seed).map_err(|e| {
                    AppError::Validation(format!(
                        "Seed dataset {} is invalid: {}",
                        dataset_path.display(),
                        e
                    ))
                })?;
                repo.seed_snapshot(&seed).await?;
                tracing::info!(
                    "Seeded dataset revision {} ({} stations, {} trains)",
                    seed.revision,
                    seed.stations.len(),
                    seed.trains.len()
                );
                seed
            }
        };

        Ok(Self {
            repo,
            current: RwLock::new(Arc::new(snapshot)),
            apply_lock: Mutex::new(()),
        })
    }

    /// The snapshot readers should see right now.
    pub async fn current(&self) -> Arc<Snapshot> {
        self.current.read().await.clone()
    }

    pub async fn get_revision(&self) -> i64 {
        self.current.read().await.revision
    }

    pub async fn get_revision_info(&self) -> RevisionInfo {
        let snapshot = self.current().await;
        RevisionInfo {
            revision: snapshot.revision,
            generated_at: snapshot.generated_at,
        }
    }

    /// Full current snapshot. There are no diffs: a client on an old revision
    /// gets everything again.
    pub async fn get_snapshot(&self, known_revision: Option<i64>) -> SnapshotResponse {
        let snapshot = self.current().await;
        SnapshotResponse {
            up_to_date: known_revision == Some(snapshot.revision),
            snapshot: (*snapshot).clone(),
        }
    }

    /// Queue a proposal as pending. The change is dry-run against the current
    /// snapshot so obviously broken edits never reach a moderator.
    pub async fn propose_correction(
        &self,
        request: ProposeCorrectionRequest,
    ) -> Result<CorrectionProposal, AppError> {
        let reporter_token = request.reporter_token.trim();
        if reporter_token.is_empty() {
            return Err(AppError::Validation(
                "Reporter token is required".to_string(),
            ));
        }
        let description = request
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        if description
            .as_ref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
        {
            return Err(AppError::Validation(format!(
                "Description must be at most {} characters",
                MAX_DESCRIPTION_LEN
            )));
        }

        let now = Utc::now();
        let current = self.current().await;
        apply_change(&current, &request.change, now)?;

        let proposal = CorrectionProposal {
            id: uuid::Uuid::new_v4().to_string(),
            target: request.change.target(),
            proposed_change: request.change,
            reporter_token: reporter_token.to_string(),
            description,
            submitted_at: now,
            status: ProposalStatus::Pending,
            resolved_at: None,
            resolved_revision: None,
        };
        self.repo.insert_proposal(&proposal).await?;

        tracing::info!(
            "Queued proposal {} against {} {}",
            proposal.id,
            proposal.target.kind.as_str(),
            proposal.target.id
        );
        Ok(proposal)
    }

    /// Resolve a pending proposal. Acceptance publishes revision `r + 1`; on
    /// any failure the previous revision stays current and the proposal stays
    /// pending.
    pub async fn apply_correction(
        &self,
        proposal_id: &str,
        decision: Decision,
    ) -> Result<CorrectionProposal, AppError> {
        let _guard = self.apply_lock.lock().await;

        let proposal = self
            .repo
            .get_proposal(proposal_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", proposal_id)))?;

        if proposal.status != ProposalStatus::Pending {
            return Err(AppError::InvalidState(format!(
                "Proposal {} is already {}",
                proposal_id,
                proposal.status.as_str()
            )));
        }

        let now = Utc::now();
        match decision {
            Decision::Accepted => {
                let current = self.current().await;
                let next = apply_change(&current, &proposal.proposed_change, now)?;
                self.repo.commit_accepted(proposal_id, &next, now).await?;

                let revision = next.revision;
                *self.current.write().await = Arc::new(next);
                tracing::info!(
                    "Accepted proposal {}, dataset now at revision {}",
                    proposal_id,
                    revision
                );
            }
            Decision::Rejected => {
                self.repo.commit_rejected(proposal_id, now).await?;
                tracing::info!("Rejected proposal {}", proposal_id);
            }
        }

        self.repo.get_proposal(proposal_id).await?.ok_or_else(|| {
            AppError::invariant(format!("Proposal {} vanished after resolution", proposal_id))
        })
    }

    pub async fn get_proposal(&self, proposal_id: &str) -> Result<CorrectionProposal, AppError> {
        self.repo
            .get_proposal(proposal_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", proposal_id)))
    }

    pub async fn list_proposals(
        &self,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<CorrectionProposal>, AppError> {
        self.repo.list_proposals(status).await
    }
}

async fn load_seed(path: &Path) -> Result<Snapshot, AppError> {
    match tokio::fs::read_to_string(path).await {
        Ok(body) => serde_json::from_str(&body).map_err(|e| {
            AppError::Validation(format!("Seed dataset {} is unreadable: {}", path.display(), e))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(
                "No seed dataset at {}, starting from an empty revision 0",
                path.display()
            );
            Ok(Snapshot::empty())
        }
        Err(e) => Err(AppError::Internal(format!(
            "Failed to read seed dataset {}: {}",
            path.display(),
            e
        ))),
    }
}

/// The bundled sample network, for unit tests.
#[cfg(test)]
pub(crate) fn sample_snapshot() -> Snapshot {
    serde_json::from_str(include_str!("../../data/dataset.json")).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use crate::models::{GeoPoint, ProposedChange, Station};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn sample_path() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data/dataset.json")
    }

    async fn open_store(dir: &TempDir) -> DatasetStore {
        let pool = init_database(&dir.path().join("test.sqlite")).await.unwrap();
        DatasetStore::open(Repository::new(pool), &sample_path())
            .await
            .unwrap()
    }

    fn add_station(id: &str, name: &str) -> ProposeCorrectionRequest {
        ProposeCorrectionRequest {
            reporter_token: "rider-1".to_string(),
            change: ProposedChange::AddStation {
                station: Station {
                    id: id.to_string(),
                    name: name.to_string(),
                    location: GeoPoint::new(24.05, 90.98),
                },
            },
            description: None,
        }
    }

    #[tokio::test]
    async fn test_open_seeds_from_file() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        assert_eq!(store.get_revision().await, 1);
        let snapshot = store.current().await;
        assert!(snapshot.train("109").is_some());
        assert_eq!(store.repo.get_revision().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_seed_starts_empty() {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("test.sqlite")).await.unwrap();
        let store = DatasetStore::open(Repository::new(pool), &dir.path().join("absent.json"))
            .await
            .unwrap();

        assert_eq!(store.get_revision().await, 0);
        assert!(store.current().await.trains.is_empty());
    }

    #[tokio::test]
    async fn test_revision_moves_by_one_per_acceptance() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        for (i, id) in ["BBS", "NSD", "TNG"].iter().enumerate() {
            let proposal = store
                .propose_correction(add_station(id, &format!("Station {}", id)))
                .await
                .unwrap();
            assert_eq!(store.get_revision().await, 1 + i as i64);

            let resolved = store
                .apply_correction(&proposal.id, Decision::Accepted)
                .await
                .unwrap();
            assert_eq!(resolved.status, ProposalStatus::Accepted);
            assert_eq!(resolved.resolved_revision, Some(2 + i as i64));
            assert_eq!(store.get_revision().await, 2 + i as i64);
        }
    }

    #[tokio::test]
    async fn test_rejection_leaves_revision_alone() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let before = store.get_snapshot(None).await;

        let proposal = store
            .propose_correction(add_station("BBS", "Bhairab Bazar"))
            .await
            .unwrap();
        let resolved = store
            .apply_correction(&proposal.id, Decision::Rejected)
            .await
            .unwrap();

        assert_eq!(resolved.status, ProposalStatus::Rejected);
        assert!(resolved.resolved_at.is_some());
        assert_eq!(resolved.resolved_revision, None);
        assert_eq!(store.get_snapshot(None).await.snapshot, before.snapshot);
    }

    #[tokio::test]
    async fn test_proposal_leaves_pending_only_once() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let proposal = store
            .propose_correction(add_station("BBS", "Bhairab Bazar"))
            .await
            .unwrap();
        store
            .apply_correction(&proposal.id, Decision::Accepted)
            .await
            .unwrap();

        for decision in [Decision::Accepted, Decision::Rejected] {
            let err = store
                .apply_correction(&proposal.id, decision)
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::InvalidState(_)));
        }
        assert_eq!(store.get_revision().await, 2);
    }

    #[tokio::test]
    async fn test_unknown_proposal_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let err = store
            .apply_correction("no-such-id", Decision::Accepted)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(matches!(
            store.get_proposal("no-such-id").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_broken_proposal_is_refused_up_front() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let err = store
            .propose_correction(add_station("DHK", "Duplicate Dhaka"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(store.list_proposals(None).await.unwrap().is_empty());

        let mut blank = add_station("BBS", "Bhairab Bazar");
        blank.reporter_token = "  ".to_string();
        assert!(matches!(
            store.propose_correction(blank).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_conflicting_acceptances_never_merge() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(open_store(&dir).await);

        // Both pass the dry run on their own; only one can win.
        let first = store
            .propose_correction(add_station("BBS", "Bhairab Bazar"))
            .await
            .unwrap();
        let second = store
            .propose_correction(add_station("BBS", "Bhairab Bridge"))
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            store.apply_correction(&first.id, Decision::Accepted),
            store.apply_correction(&second.id, Decision::Accepted)
        );
        assert!(a.is_ok() != b.is_ok());

        let snapshot = store.current().await;
        assert_eq!(snapshot.revision, 2);
        let added: Vec<_> = snapshot.stations.iter().filter(|s| s.id == "BBS").collect();
        assert_eq!(added.len(), 1);

        let pending = store
            .list_proposals(Some(ProposalStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_acceptances_are_serialized() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(open_store(&dir).await);

        let first = store
            .propose_correction(add_station("BBS", "Bhairab Bazar"))
            .await
            .unwrap();
        let second = store
            .propose_correction(add_station("NSD", "Narsingdi"))
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            store.apply_correction(&first.id, Decision::Accepted),
            store.apply_correction(&second.id, Decision::Accepted)
        );
        let mut revisions = vec![
            a.unwrap().resolved_revision.unwrap(),
            b.unwrap().resolved_revision.unwrap(),
        ];
        revisions.sort();
        assert_eq!(revisions, vec![2, 3]);

        let snapshot = store.current().await;
        assert!(snapshot.station("BBS").is_some());
        assert!(snapshot.station("NSD").is_some());
    }

    #[tokio::test]
    async fn test_reopen_resumes_latest_revision() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir).await;
            let proposal = store
                .propose_correction(add_station("BBS", "Bhairab Bazar"))
                .await
                .unwrap();
            store
                .apply_correction(&proposal.id, Decision::Accepted)
                .await
                .unwrap();
        }

        let store = open_store(&dir).await;
        assert_eq!(store.get_revision().await, 2);
        assert!(store.current().await.station("BBS").is_some());
    }

    #[tokio::test]
    async fn test_snapshot_reads_are_stable() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let first = store.get_snapshot(Some(1)).await;
        let second = store.get_snapshot(Some(1)).await;
        assert!(first.up_to_date);
        assert_eq!(first.snapshot, second.snapshot);

        let stale = store.get_snapshot(Some(0)).await;
        assert!(!stale.up_to_date);
        assert_eq!(stale.snapshot, first.snapshot);
    }
}
