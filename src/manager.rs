// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Registry of open models.
//!
//! The manager owns one [`TextFileModel`] per resource, wires every model to the same
//! collaborators and fans file change notifications out to the affected models.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::model::{LoadReason, Resource};
use crate::store::{BackupStore, FileChangeType, FileChanges, FileService, NoBackupStore};
use crate::textfile::{
    LoadOptions, LoggingSaveErrorHandler, ModelError, SaveErrorHandler, SaveOptions,
    SaveParticipant, SaveResult, TextFileModel,
};

pub struct ModelManager {
    files: Arc<dyn FileService>,
    backups: Arc<dyn BackupStore>,
    settings: Arc<Settings>,
    participant: Option<Arc<dyn SaveParticipant>>,
    error_handler: Arc<dyn SaveErrorHandler>,
    models: Mutex<BTreeMap<Resource, TextFileModel>>,
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("models", &self.lock().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ModelManager {
    pub fn new(files: Arc<dyn FileService>) -> Self {
        Self {
            files,
            backups: Arc::new(NoBackupStore),
            settings: Arc::new(Settings::default()),
            participant: None,
            error_handler: Arc::new(LoggingSaveErrorHandler),
            models: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_backups(mut self, backups: Arc<dyn BackupStore>) -> Self {
        self.backups = backups;
        self
    }

    pub fn with_settings(mut self, settings: Arc<Settings>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_save_participant(mut self, participant: Arc<dyn SaveParticipant>) -> Self {
        self.participant = Some(participant);
        self
    }

    pub fn with_save_error_handler(mut self, handler: Arc<dyn SaveErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Resource, TextFileModel>> {
        self.models.lock().expect("model manager lock poisoned")
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    fn build(&self, resource: Resource) -> TextFileModel {
        let mut builder = TextFileModel::builder(resource, self.files.clone())
            .backups(self.backups.clone())
            .settings(self.settings.clone())
            .save_error_handler(self.error_handler.clone());
        if let Some(participant) = &self.participant {
            builder = builder.save_participant(participant.clone());
        }
        builder.build()
    }

    /// Returns the model for `resource`, creating and loading it on first use.
    ///
    /// An existing model is loaded again, which is a no-op unless the file changed. A model whose
    /// first load fails is dropped from the registry.
    pub async fn resolve(
        &self,
        resource: &Resource,
        options: LoadOptions,
    ) -> Result<TextFileModel, ModelError> {
        let (model, created) = {
            let mut models = self.lock();
            match models.get(resource) {
                Some(model) => (model.clone(), false),
                None => {
                    let model = self.build(resource.clone());
                    models.insert(resource.clone(), model.clone());
                    (model, true)
                }
            }
        };

        match model.load(options).await {
            Ok(()) => Ok(model),
            Err(err) => {
                if created && !model.is_resolved() {
                    log::debug!("{resource}: first load failed, dropping model: {err}");
                    let mut models = self.lock();
                    if models.get(resource).is_some_and(|held| held.same_model(&model)) {
                        models.remove(resource);
                    }
                    drop(models);
                    model.dispose();
                }
                Err(err)
            }
        }
    }

    pub fn get(&self, resource: &Resource) -> Option<TextFileModel> {
        self.lock().get(resource).cloned()
    }

    pub fn models(&self) -> Vec<TextFileModel> {
        self.lock().values().cloned().collect()
    }

    pub fn dirty_models(&self) -> Vec<TextFileModel> {
        self.lock()
            .values()
            .filter(|model| model.is_dirty())
            .cloned()
            .collect()
    }

    /// Saves every dirty model and reports each outcome.
    pub async fn save_all(&self, options: SaveOptions) -> Vec<(Resource, SaveResult)> {
        let pending: Vec<_> = self
            .dirty_models()
            .into_iter()
            .map(|model| (model.resource().clone(), model.save(options)))
            .collect();

        let mut results = Vec::with_capacity(pending.len());
        for (resource, completion) in pending {
            results.push((resource, completion.await));
        }
        results
    }

    /// Removes and disposes the model for `resource`.
    pub fn dispose(&self, resource: &Resource) -> bool {
        let removed = self.lock().remove(resource);
        match removed {
            Some(model) => {
                model.dispose();
                true
            }
            None => false,
        }
    }

    pub fn dispose_all(&self) {
        let models = std::mem::take(&mut *self.lock());
        for model in models.into_values() {
            model.dispose();
        }
    }

    /// Dispatches one batch of change notifications.
    ///
    /// Each affected model handles the batch on its own task so one model's settle delay does not
    /// hold up the others. Clean models reload when their file was updated or re-created; the
    /// etag check makes that free for the manager's own writes.
    pub async fn handle_file_changes(&self, changes: &FileChanges) {
        let affected: Vec<TextFileModel> = self
            .lock()
            .values()
            .filter(|model| changes.affects(model.resource()))
            .cloned()
            .collect();

        let tasks: Vec<JoinHandle<()>> = affected
            .into_iter()
            .map(|model| {
                let changes = changes.clone();
                tokio::spawn(async move {
                    model.handle_file_changes(&changes).await;

                    let resource = model.resource();
                    let touched = changes.contains(resource, FileChangeType::Updated)
                        || changes.contains(resource, FileChangeType::Added);
                    if !touched || !model.is_resolved() || model.is_dirty() {
                        return;
                    }
                    let options = LoadOptions {
                        reason: LoadReason::FileChange,
                        ..LoadOptions::default()
                    };
                    if let Err(err) = model.load(options).await {
                        log::warn!("{}: reload after change failed: {err}", model.resource());
                    }
                })
            })
            .collect();

        for task in tasks {
            if let Err(err) = task.await {
                log::error!("file change handler panicked: {err}");
            }
        }
    }

    /// Forwards the file service's change stream until the manager is dropped.
    pub fn watch(self: &Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.files.subscribe();
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(batch) => {
                        let Some(manager) = manager.upgrade() else {
                            break;
                        };
                        manager.handle_file_changes(&batch).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("file change stream lagged, {skipped} batches dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            log::debug!("file change watcher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rstest::{fixture, rstest};

    use super::ModelManager;
    use crate::model::{Resource, TextEdit};
    use crate::store::{FileChangeType, FileChanges, MemoryFileService};
    use crate::textfile::{LoadOptions, ModelError, SaveOptions};

    struct ManagerCtx {
        files: Arc<MemoryFileService>,
        manager: Arc<ModelManager>,
    }

    #[fixture]
    fn ctx() -> ManagerCtx {
        let files = Arc::new(MemoryFileService::new());
        let manager = Arc::new(ModelManager::new(files.clone()));
        ManagerCtx { files, manager }
    }

    fn res(path: &str) -> Resource {
        Resource::new(path).unwrap()
    }

    #[rstest]
    #[tokio::test]
    async fn resolve_reuses_the_model(ctx: ManagerCtx) {
        ctx.files.insert(&res("/w/a.txt"), "a");
        let first = ctx
            .manager
            .resolve(&res("/w/a.txt"), LoadOptions::default())
            .await
            .unwrap();
        let second = ctx
            .manager
            .resolve(&res("/w/a.txt"), LoadOptions::default())
            .await
            .unwrap();

        assert!(first.same_model(&second));
        assert_eq!(ctx.manager.models().len(), 1);
        assert_eq!(second.text().as_deref(), Some("a"));
    }

    #[rstest]
    #[tokio::test]
    async fn failed_first_resolve_is_forgotten(ctx: ManagerCtx) {
        let err = ctx
            .manager
            .resolve(&res("/w/missing.txt"), LoadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::File(_)));
        assert!(ctx.manager.get(&res("/w/missing.txt")).is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn save_all_saves_only_dirty_models(ctx: ManagerCtx) {
        ctx.files.insert(&res("/w/a.txt"), "a");
        ctx.files.insert(&res("/w/b.txt"), "b");
        let a = ctx
            .manager
            .resolve(&res("/w/a.txt"), LoadOptions::default())
            .await
            .unwrap();
        ctx.manager
            .resolve(&res("/w/b.txt"), LoadOptions::default())
            .await
            .unwrap();
        a.apply_edit(&TextEdit::insert(1, "!")).unwrap();

        let results = ctx.manager.save_all(SaveOptions::default()).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, res("/w/a.txt"));
        assert!(matches!(results[0].1, Ok(true)));
        assert_eq!(ctx.files.write_count(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn external_update_reloads_clean_models_only(ctx: ManagerCtx) {
        ctx.files.insert(&res("/w/clean.txt"), "old");
        ctx.files.insert(&res("/w/dirty.txt"), "old");
        let clean = ctx
            .manager
            .resolve(&res("/w/clean.txt"), LoadOptions::default())
            .await
            .unwrap();
        let dirty = ctx
            .manager
            .resolve(&res("/w/dirty.txt"), LoadOptions::default())
            .await
            .unwrap();
        dirty.apply_edit(&TextEdit::insert(3, "!")).unwrap();

        let mut changes = FileChanges::new();
        let new_clean = ctx.files.write_external(&res("/w/clean.txt"), "new", 5_000);
        ctx.files.write_external(&res("/w/dirty.txt"), "new", 5_000);
        changes.push(res("/w/clean.txt"), FileChangeType::Updated);
        changes.push(res("/w/dirty.txt"), FileChangeType::Updated);
        ctx.manager.handle_file_changes(&changes).await;

        assert_eq!(clean.text().as_deref(), Some("new"));
        assert_eq!(clean.last_resolved_stat(), Some(new_clean));
        assert_eq!(dirty.text().as_deref(), Some("old!"));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn watcher_orphans_deleted_files(ctx: ManagerCtx) {
        ctx.files.insert(&res("/w/a.txt"), "a");
        let model = ctx
            .manager
            .resolve(&res("/w/a.txt"), LoadOptions::default())
            .await
            .unwrap();
        let watcher = ctx.manager.watch();

        ctx.files.delete_external(&res("/w/a.txt"));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(model.is_orphaned());

        ctx.files.write_external(&res("/w/a.txt"), "back", 9_000);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!model.is_orphaned());
        assert_eq!(model.text().as_deref(), Some("back"));

        drop(ctx.manager);
        watcher.abort();
    }

    #[rstest]
    #[tokio::test]
    async fn dispose_removes_and_disposes(ctx: ManagerCtx) {
        ctx.files.insert(&res("/w/a.txt"), "a");
        let model = ctx
            .manager
            .resolve(&res("/w/a.txt"), LoadOptions::default())
            .await
            .unwrap();

        assert!(ctx.manager.dispose(&res("/w/a.txt")));
        assert!(!ctx.manager.dispose(&res("/w/a.txt")));
        assert!(model.is_disposed());

        ctx.files.insert(&res("/w/b.txt"), "b");
        let b = ctx
            .manager
            .resolve(&res("/w/b.txt"), LoadOptions::default())
            .await
            .unwrap();
        ctx.manager.dispose_all();
        assert!(b.is_disposed());
        assert!(ctx.manager.models().is_empty());
    }
}
