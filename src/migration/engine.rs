//! Orchestrates backup, restore and direct migration of mailbox pairs
//!
//! Each pair runs through the lifecycle in [`PairState`]. Folders are handled
//! in catalog order, parents first, and messages one at a time; every message
//! that reaches its target is checkpointed before the next one starts, so a
//! rerun after a crash or cancellation picks up where the last one stopped.

use crate::accounts::{Account, MailboxPair};
use crate::archive::{FolderManifest, MailboxArchive, MessageArchiveStore, MessageRecord};
use crate::catalog::{self, display_path, FolderIssueKind, FolderNode, FolderTree};
use crate::checkpoint::{Checkpoint, CheckpointStore, Phase};
use crate::config::MigratorConfig;
use crate::imap::{ImapResult, SessionConnector};
use crate::migration::link::Link;
use crate::migration::retry::{retrying, RetryPolicy};
use crate::migration::{
    CancellationToken, FailureEntry, MigrationError, MigrationReport, MigrationResult, Mode,
    PairReport, PairState,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The outer error stops the pair; the inner one belongs to a single message
/// or folder and is recorded while the pair carries on.
type ItemResult<T> = MigrationResult<Result<T, MigrationError>>;

/// Where fetched messages go
enum Target<'a> {
    Archive(&'a mut MessageArchiveStore),
    Destination { link: &'a mut Link, folder: String },
}

impl Target<'_> {
    /// Whether a checkpointed message is still present at the target
    fn holds(&self, content_hash: &str) -> bool {
        match self {
            Target::Archive(store) => store.contains(content_hash),
            Target::Destination { .. } => true,
        }
    }
}

/// Bookkeeping for the pair currently running
struct PairRun {
    report: PairReport,
}

impl PairRun {
    fn new(pair: &MailboxPair, mode: Mode) -> Self {
        Self {
            report: PairReport::new(&pair.label, mode),
        }
    }

    fn label(&self) -> &str {
        &self.report.label
    }

    fn transition(&mut self, next: PairState) {
        if !self.report.state.can_transition_to(&next) {
            warn!(
                "{}: unexpected transition from {} to {}",
                self.report.label, self.report.state, next
            );
        }
        debug!("{}: {}", self.report.label, next);
        self.report.state = next;
    }

    fn folder_failed(&mut self, folder: &str, error: MigrationError) {
        self.report.folders.failed += 1;
        self.report.failures.push(FailureEntry {
            folder: folder.to_string(),
            item: String::new(),
            error,
        });
    }

    fn message_failed(&mut self, folder: &str, item: String, error: MigrationError) {
        self.report.messages.failed += 1;
        self.report.failures.push(FailureEntry {
            folder: folder.to_string(),
            item,
            error,
        });
    }
}

pub struct MigrationEngine {
    config: MigratorConfig,
    policy: RetryPolicy,
    connector: Arc<dyn SessionConnector>,
    checkpoints: CheckpointStore,
    cancel: CancellationToken,
}

impl MigrationEngine {
    pub fn new(config: MigratorConfig, connector: Arc<dyn SessionConnector>) -> MigrationResult<Self> {
        let checkpoints = CheckpointStore::new(config.state_dir())?;
        Ok(Self {
            policy: RetryPolicy::from_config(&config),
            config,
            connector,
            checkpoints,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Token that stops the run before its next unit of work
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.run.output
    }

    pub fn archive_for(&self, label: &str) -> MailboxArchive {
        MailboxArchive::new(&self.config.run.output, label)
    }

    /// Run `mode` over every pair with up to `run.jobs` pairs in flight.
    /// Reports come back in input order.
    pub async fn run(&self, mode: Mode, pairs: &[MailboxPair]) -> MigrationReport {
        let started_at = Utc::now();
        let jobs = self.config.run.jobs.max(1);
        info!(
            "Starting {} of {} mailbox(es) with {} job(s)",
            mode,
            pairs.len(),
            jobs
        );

        let mut results: Vec<(usize, PairReport)> = stream::iter(pairs.iter().enumerate())
            .map(|(index, pair)| async move { (index, self.run_pair(mode, pair).await) })
            .buffer_unordered(jobs)
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        let report = MigrationReport {
            mode,
            started_at,
            finished_at: Utc::now(),
            cancelled: self.cancel.is_cancelled(),
            pairs: results.into_iter().map(|(_, report)| report).collect(),
        };
        let totals = report.messages();
        info!(
            "Finished {}: {} migrated, {} skipped, {} failed",
            mode, totals.succeeded, totals.skipped, totals.failed
        );
        report
    }

    pub async fn run_pair(&self, mode: Mode, pair: &MailboxPair) -> PairReport {
        let mut run = PairRun::new(pair, mode);
        if self.cancel.is_cancelled() {
            run.transition(PairState::Errored(MigrationError::Cancelled));
            return run.report;
        }

        info!("{}: starting {} ({})", pair.label, mode, pair);
        let outcome = match mode {
            Mode::ListSource => self.list(&mut run, &pair.source, "source").await,
            Mode::ListDestination => self.list(&mut run, &pair.destination, "destination").await,
            Mode::Backup => self.backup(&mut run, pair).await,
            Mode::Restore => self.restore(&mut run, pair).await,
            Mode::Migrate => self.migrate(&mut run, pair).await,
        };

        match outcome {
            Ok(()) => {
                if !run.report.state.is_terminal() {
                    run.transition(PairState::Completed);
                }
            }
            Err(error) => {
                if error.is_fatal() {
                    error!("{}: {}, stopping the run", pair.label, error);
                    self.cancel.cancel();
                } else if error == MigrationError::Cancelled {
                    info!("{}: cancelled", pair.label);
                } else {
                    warn!("{}: {}", pair.label, error);
                }
                run.transition(PairState::Errored(error));
            }
        }

        info!(
            "{}: {} ({} migrated, {} skipped, {} failed)",
            pair.label,
            run.report.state,
            run.report.messages.succeeded,
            run.report.messages.skipped,
            run.report.messages.failed
        );
        run.report
    }

    async fn list(&self, run: &mut PairRun, account: &Account, role: &'static str) -> MigrationResult<()> {
        if !account.is_configured() {
            run.transition(PairState::Skipped(format!("no {} account configured", role)));
            return Ok(());
        }

        run.transition(if role == "source" {
            PairState::ConnectingSource
        } else {
            PairState::ConnectingDestination
        });
        let mut link = self.connect(account, role).await?;
        let listed = self.source_catalog(run, &mut link).await;
        link.close().await;

        let tree = listed?;
        run.report.folders.succeeded = tree.len();
        run.report.listing = Some(tree.render());
        Ok(())
    }

    async fn backup(&self, run: &mut PairRun, pair: &MailboxPair) -> MigrationResult<()> {
        if !pair.source.is_configured() {
            run.transition(PairState::Skipped("no source account configured".to_string()));
            return Ok(());
        }

        let archive = self.archive_for(&pair.label);
        let mut checkpoint = self.checkpoints.open(Phase::Backup, &pair.label).await?;

        run.transition(PairState::ConnectingSource);
        let result = match self.connect(&pair.source, "source").await {
            Ok(mut source) => {
                let result = self
                    .backup_folders(run, &archive, &mut source, &mut checkpoint)
                    .await;
                source.close().await;
                result
            }
            Err(error) => Err(error),
        };
        checkpoint.close().await;
        result
    }

    async fn backup_folders(
        &self,
        run: &mut PairRun,
        archive: &MailboxArchive,
        source: &mut Link,
        checkpoint: &mut Checkpoint,
    ) -> MigrationResult<()> {
        let tree = self.source_catalog(run, source).await?;

        let mut manifest = FolderManifest::from_tree(run.label(), &tree);
        if let Some(mut existing) = archive.load_manifest()? {
            existing.merge(manifest);
            manifest = existing;
        }
        archive.save_manifest(&manifest)?;

        for node in tree.iter() {
            self.check_cancelled()?;
            if self.skip_folder(run, &node.path) {
                continue;
            }
            run.transition(PairState::MigratingFolder(display_path(&node.path)));

            if !node.selectable {
                self.finish_folder(run, checkpoint, &node.path, Ok(Ok(0)))
                    .await?;
                continue;
            }

            let mut store = archive.open_folder(&node.path)?;
            let outcome = self
                .copy_folder(run, source, checkpoint, node, &mut Target::Archive(&mut store))
                .await;
            store.close()?;
            self.finish_folder(run, checkpoint, &node.path, outcome)
                .await?;
        }
        Ok(())
    }

    async fn restore(&self, run: &mut PairRun, pair: &MailboxPair) -> MigrationResult<()> {
        if !pair.destination.is_configured() {
            run.transition(PairState::Skipped(
                "no destination account configured".to_string(),
            ));
            return Ok(());
        }

        let archive = self.archive_for(&pair.label);
        let manifest = match archive.load_manifest()? {
            Some(manifest) => manifest,
            None => {
                run.transition(PairState::Skipped(format!(
                    "no backup found in {}",
                    archive.root().display()
                )));
                return Ok(());
            }
        };
        let mut checkpoint = self.checkpoints.open(Phase::Restore, &pair.label).await?;

        run.transition(PairState::ConnectingDestination);
        let result = match self.connect(&pair.destination, "destination").await {
            Ok(mut destination) => {
                let result = self
                    .restore_folders(run, &archive, &manifest, &mut destination, &mut checkpoint)
                    .await;
                destination.close().await;
                result
            }
            Err(error) => Err(error),
        };
        checkpoint.close().await;
        result
    }

    async fn restore_folders(
        &self,
        run: &mut PairRun,
        archive: &MailboxArchive,
        manifest: &FolderManifest,
        destination: &mut Link,
        checkpoint: &mut Checkpoint,
    ) -> MigrationResult<()> {
        let (mut existing, separator) = self.destination_folders(destination).await?;

        for entry in &manifest.folders {
            self.check_cancelled()?;
            if self.skip_folder(run, &entry.path) {
                continue;
            }
            let folder_name = display_path(&entry.path);
            run.transition(PairState::MigratingFolder(folder_name.clone()));

            let wire_name = match self
                .prepare_destination(destination, &mut existing, &entry.path, separator.as_deref())
                .await?
            {
                Ok(name) => name,
                Err(error) => {
                    warn!("{}: cannot create {}: {}", run.label(), folder_name, error);
                    run.folder_failed(&folder_name, error);
                    continue;
                }
            };

            if !entry.selectable || !archive.has_folder(&entry.path) {
                self.finish_folder(run, checkpoint, &entry.path, Ok(Ok(0)))
                    .await?;
                continue;
            }

            let store = archive.open_folder(&entry.path)?;
            let outcome = self
                .restore_folder(run, &store, checkpoint, &entry.path, destination, &wire_name)
                .await;
            store.close()?;
            self.finish_folder(run, checkpoint, &entry.path, outcome)
                .await?;
        }
        Ok(())
    }

    async fn restore_folder(
        &self,
        run: &mut PairRun,
        store: &MessageArchiveStore,
        checkpoint: &mut Checkpoint,
        path: &[String],
        destination: &mut Link,
        wire_name: &str,
    ) -> ItemResult<usize> {
        let folder_name = display_path(path);
        info!(
            "{}: restoring {} message(s) into {}",
            run.label(),
            store.len(),
            folder_name
        );

        let mut failed = 0;
        for item in store.iter()? {
            self.check_cancelled()?;
            let record = item?;
            if checkpoint.is_migrated(path, &record.content_hash) {
                run.report.messages.skipped += 1;
                continue;
            }

            match self.upload(destination, wire_name, &record).await? {
                Ok(()) => {
                    checkpoint
                        .record_message(path, &record.content_hash, None)
                        .await?;
                    run.report.messages.succeeded += 1;
                }
                Err(error) => {
                    self.message_failed(
                        run,
                        checkpoint,
                        path,
                        Some(&record.content_hash),
                        Some(record.uid),
                        error,
                    )
                    .await?;
                    failed += 1;
                }
            }
        }
        Ok(Ok(failed))
    }

    async fn migrate(&self, run: &mut PairRun, pair: &MailboxPair) -> MigrationResult<()> {
        if !pair.source.is_configured() || !pair.destination.is_configured() {
            run.transition(PairState::Skipped(
                "source and destination accounts are both required".to_string(),
            ));
            return Ok(());
        }

        let mut checkpoint = self.checkpoints.open(Phase::Migrate, &pair.label).await?;
        let result = self.migrate_with(run, pair, &mut checkpoint).await;
        checkpoint.close().await;
        result
    }

    async fn migrate_with(
        &self,
        run: &mut PairRun,
        pair: &MailboxPair,
        checkpoint: &mut Checkpoint,
    ) -> MigrationResult<()> {
        run.transition(PairState::ConnectingSource);
        let mut source = self.connect(&pair.source, "source").await?;
        run.transition(PairState::ConnectingDestination);
        let mut destination = match self.connect(&pair.destination, "destination").await {
            Ok(link) => link,
            Err(error) => {
                source.close().await;
                return Err(error);
            }
        };

        let result = self
            .migrate_folders(run, &mut source, &mut destination, checkpoint)
            .await;
        source.close().await;
        destination.close().await;
        result
    }

    async fn migrate_folders(
        &self,
        run: &mut PairRun,
        source: &mut Link,
        destination: &mut Link,
        checkpoint: &mut Checkpoint,
    ) -> MigrationResult<()> {
        let tree = self.source_catalog(run, source).await?;
        let (mut existing, separator) = self.destination_folders(destination).await?;

        for node in tree.iter() {
            self.check_cancelled()?;
            if self.skip_folder(run, &node.path) {
                continue;
            }
            let folder_name = display_path(&node.path);
            run.transition(PairState::MigratingFolder(folder_name.clone()));

            let wire_name = match self
                .prepare_destination(destination, &mut existing, &node.path, separator.as_deref())
                .await?
            {
                Ok(name) => name,
                Err(error) => {
                    warn!("{}: cannot create {}: {}", run.label(), folder_name, error);
                    run.folder_failed(&folder_name, error);
                    continue;
                }
            };

            if !node.selectable {
                self.finish_folder(run, checkpoint, &node.path, Ok(Ok(0)))
                    .await?;
                continue;
            }

            let mut target = Target::Destination {
                link: &mut *destination,
                folder: wire_name,
            };
            let outcome = self.copy_folder(run, source, checkpoint, node, &mut target).await;
            self.finish_folder(run, checkpoint, &node.path, outcome)
                .await?;
        }
        Ok(())
    }

    /// Copy every message of one source folder to `target`
    async fn copy_folder(
        &self,
        run: &mut PairRun,
        source: &mut Link,
        checkpoint: &mut Checkpoint,
        node: &FolderNode,
        target: &mut Target<'_>,
    ) -> ItemResult<usize> {
        let path = &node.path;
        let folder_name = display_path(path);

        let examined = retrying!(&self.policy, source, "EXAMINE", |session| session
            .examine(&node.wire_name));
        let status = match self.settle(source, examined).await? {
            Ok(status) => status,
            Err(error) => return Ok(Err(error)),
        };
        source.set_selected(&node.wire_name);

        let searched = retrying!(&self.policy, source, "UID SEARCH", |session| session
            .uid_search_all());
        let uids = match self.settle(source, searched).await? {
            Ok(uids) => uids,
            Err(error) => return Ok(Err(error)),
        };
        info!("{}: {} message(s) in {}", run.label(), uids.len(), folder_name);

        let mut seen: HashSet<String> = HashSet::new();
        let mut failed = 0;
        for uid in uids {
            self.check_cancelled()?;

            let source_key = status.uid_validity.map(|validity| (validity, uid));
            if let Some((validity, _)) = source_key {
                if let Some(hash) = checkpoint.cached_hash(path, validity, uid) {
                    if target.holds(hash) {
                        seen.insert(hash.to_string());
                        run.report.messages.skipped += 1;
                        continue;
                    }
                }
            }

            let fetched = retrying!(&self.policy, source, "UID FETCH", |session| session
                .fetch_message(uid));
            let message = match self.settle(source, fetched).await? {
                Ok(Some(message)) => message,
                Ok(None) => {
                    debug!("{}: uid {} is gone from {}", run.label(), uid, folder_name);
                    run.report.messages.skipped += 1;
                    continue;
                }
                Err(error) => {
                    self.message_failed(run, checkpoint, path, None, Some(uid), error)
                        .await?;
                    failed += 1;
                    continue;
                }
            };

            let record = MessageRecord::new(
                path.clone(),
                uid,
                message.flags,
                message.internal_date,
                message.body,
            );
            if !seen.insert(record.content_hash.clone()) {
                debug!(
                    "{}: uid {} in {} duplicates an earlier message",
                    run.label(),
                    uid,
                    folder_name
                );
                run.report.messages.skipped += 1;
                continue;
            }

            let already = checkpoint.is_migrated(path, &record.content_hash)
                && target.holds(&record.content_hash);
            if !already {
                if let Err(error) = self.deliver(target, &record).await? {
                    self.message_failed(
                        run,
                        checkpoint,
                        path,
                        Some(&record.content_hash),
                        Some(uid),
                        error,
                    )
                    .await?;
                    failed += 1;
                    continue;
                }
            }

            if !already || source_key.is_some() {
                checkpoint
                    .record_message(path, &record.content_hash, source_key)
                    .await?;
            }
            if already {
                run.report.messages.skipped += 1;
            } else {
                run.report.messages.succeeded += 1;
            }
        }
        source.clear_selected();
        Ok(Ok(failed))
    }

    async fn deliver(&self, target: &mut Target<'_>, record: &MessageRecord) -> ItemResult<()> {
        match target {
            Target::Archive(store) => {
                store.append(record)?;
                Ok(Ok(()))
            }
            Target::Destination { link, folder } => {
                self.upload(&mut **link, folder.as_str(), record).await
            }
        }
    }

    async fn upload(&self, link: &mut Link, folder: &str, record: &MessageRecord) -> ItemResult<()> {
        let flags = record.upload_flags();
        let appended = retrying!(&self.policy, link, "APPEND", |session| session.append(
            folder,
            &flags,
            record.internal_date,
            &record.raw_content
        ));
        self.settle(link, appended).await
    }

    /// Make sure the destination folder for `path` exists and return its wire name
    async fn prepare_destination(
        &self,
        link: &mut Link,
        existing: &mut HashSet<String>,
        path: &[String],
        separator: Option<&str>,
    ) -> ItemResult<String> {
        let name = match catalog::destination_name(path, separator) {
            Ok(name) => name,
            Err(error) => return Ok(Err(error.into())),
        };
        if name.eq_ignore_ascii_case("INBOX") || existing.contains(&name) {
            return Ok(Ok(name));
        }

        let created = retrying!(&self.policy, link, "CREATE", |session| session
            .create_folder(&name));
        match self.settle(link, created).await? {
            Ok(()) => {
                info!("Created {} on {}", display_path(path), link.describe());
                existing.insert(name.clone());
                Ok(Ok(name))
            }
            Err(error) => Ok(Err(error)),
        }
    }

    /// Sort a failed operation into a pair-level or an item-level error
    async fn settle<T>(&self, link: &mut Link, outcome: ImapResult<T>) -> ItemResult<T> {
        match outcome {
            Ok(value) => Ok(Ok(value)),
            Err(error) => {
                if link.ensure_connected(&self.policy).await {
                    Ok(Err(error.into()))
                } else {
                    Err(MigrationError::Connection(format!(
                        "{} lost: {}",
                        link.describe(),
                        error
                    )))
                }
            }
        }
    }

    async fn connect(&self, account: &Account, role: &'static str) -> MigrationResult<Link> {
        let config = account.imap_config(self.config.network.timeout_seconds);
        Link::open(self.connector.clone(), config, role, &self.policy)
            .await
            .map_err(|error| MigrationError::Connection(format!("{} {}: {}", role, account, error)))
    }

    /// List the folders to transfer, recording the ones that cannot be.
    ///
    /// LIST and every STATUS are separate round trips, each with its own
    /// timeout and retries.
    async fn source_catalog(&self, run: &mut PairRun, link: &mut Link) -> MigrationResult<FolderTree> {
        let mut tree = self.listed_tree(link).await?;

        for (path, wire_name) in tree.selectable_folders() {
            let count = retrying!(&self.policy, link, "STATUS", |session| {
                catalog::count_messages(session, &wire_name)
            })?;
            if let Some(node) = tree.find_mut(&path) {
                node.message_count = count;
            }
        }

        for issue in &tree.issues {
            let error = match &issue.kind {
                FolderIssueKind::Encoding(reason) => MigrationError::Encoding(reason.clone()),
                FolderIssueKind::Conflict(reason) => MigrationError::Conflict(reason.clone()),
            };
            warn!("{}: skipping folder {}: {}", run.label(), issue.wire_name, error);
            run.folder_failed(&issue.wire_name, error);
        }

        info!(
            "{}: {} folder(s), {} message(s) on {}",
            run.label(),
            tree.len(),
            tree.total_messages(),
            link.describe()
        );
        Ok(tree)
    }

    /// Wire names already on the destination, and the separator to build new ones with
    async fn destination_folders(
        &self,
        link: &mut Link,
    ) -> MigrationResult<(HashSet<String>, Option<String>)> {
        let tree = self.listed_tree(link).await?;

        let mut existing: HashSet<String> = tree.iter().map(|node| node.wire_name.clone()).collect();
        existing.extend(tree.issues.iter().map(|issue| issue.wire_name.clone()));

        let separator = self
            .config
            .destination_separator()
            .map(str::to_string)
            .or(tree.delimiter);
        debug!(
            "{} has {} folder(s), separator {:?}",
            link.describe(),
            existing.len(),
            separator
        );
        Ok((existing, separator))
    }

    /// Folder tree without message counts
    async fn listed_tree(&self, link: &mut Link) -> MigrationResult<FolderTree> {
        let listed = retrying!(&self.policy, link, "LIST", |session| session.list_folders())?;
        let mut tree = catalog::build_tree(listed);
        if tree.delimiter.is_none() {
            tree.delimiter = retrying!(&self.policy, link, "LIST delimiter", |session| session
                .hierarchy_delimiter())?;
        }
        Ok(tree)
    }

    fn skip_folder(&self, run: &mut PairRun, path: &[String]) -> bool {
        if self.config.is_excluded(path) {
            info!("{}: skipping excluded folder {}", run.label(), display_path(path));
            run.report.folders.skipped += 1;
            true
        } else {
            false
        }
    }

    async fn finish_folder(
        &self,
        run: &mut PairRun,
        checkpoint: &mut Checkpoint,
        path: &[String],
        outcome: ItemResult<usize>,
    ) -> MigrationResult<()> {
        let folder_name = display_path(path);
        match outcome? {
            Ok(0) => {
                checkpoint.mark_folder_done(path).await?;
                run.report.folders.succeeded += 1;
            }
            Ok(failed) => {
                warn!("{}: {} message(s) failed in {}", run.label(), failed, folder_name);
                run.report.folders.failed += 1;
            }
            Err(error) => {
                warn!("{}: folder {} failed: {}", run.label(), folder_name, error);
                checkpoint
                    .record_failure(path, None, None, &error.to_string())
                    .await?;
                run.folder_failed(&folder_name, error);
            }
        }
        Ok(())
    }

    async fn message_failed(
        &self,
        run: &mut PairRun,
        checkpoint: &mut Checkpoint,
        path: &[String],
        content_hash: Option<&str>,
        uid: Option<u32>,
        error: MigrationError,
    ) -> MigrationResult<()> {
        let folder_name = display_path(path);
        let item = match (uid, content_hash) {
            (Some(uid), _) => format!("uid {}", uid),
            (None, Some(hash)) => format!("message {}", &hash[..hash.len().min(12)]),
            (None, None) => String::new(),
        };
        warn!("{}: {} in {} failed: {}", run.label(), item, folder_name, error);
        checkpoint
            .record_failure(path, content_hash, uid, &error.to_string())
            .await?;
        run.message_failed(&folder_name, item, error);
        Ok(())
    }

    fn check_cancelled(&self) -> MigrationResult<()> {
        if self.cancel.is_cancelled() {
            Err(MigrationError::Cancelled)
        } else {
            Ok(())
        }
    }
}
