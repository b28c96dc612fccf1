use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::gateway::Gateway;
use crate::models::{Application, Field, ValueError};

type Collection = Arc<Vec<Application>>;

/// Outcome of a background save, reported back to whoever drives the store.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistEvent {
    Saved { count: usize, at: DateTime<Utc> },
    Failed { message: String },
}

impl PersistEvent {
    /// The user-facing notice for a failed save.
    pub fn warning(&self) -> Option<String> {
        match self {
            PersistEvent::Saved { .. } => None,
            PersistEvent::Failed { message } => Some(format!(
                "Could not save your applications ({}). Export them to CSV to keep a copy.",
                message
            )),
        }
    }
}

/// Hands out ids from the creation instant (milliseconds, scaled) plus a
/// random tiebreaker, always above anything issued or loaded before.
struct IdGenerator {
    last: i64,
}

impl IdGenerator {
    fn after(last: i64) -> Self {
        Self { last }
    }

    fn next(&mut self, now: DateTime<Utc>) -> i64 {
        let tiebreak: i64 = rand::thread_rng().gen_range(0..1000);
        let candidate = now.timestamp_millis().saturating_mul(1000) + tiebreak;
        self.last = candidate.max(self.last + 1);
        self.last
    }
}

struct Persister {
    changes: watch::Sender<Collection>,
    task: JoinHandle<()>,
}

/// Owner of the canonical collection.
///
/// Mutations apply synchronously and replace the collection as a whole;
/// when loaded through a [`Gateway`], each mutation also restarts a
/// debounce window after which the latest collection is saved.
pub struct ApplicationStore {
    apps: Collection,
    clock: Arc<dyn Clock>,
    ids: IdGenerator,
    last_sync: Option<DateTime<Utc>>,
    persister: Option<Persister>,
    events: Option<mpsc::UnboundedReceiver<PersistEvent>>,
}

impl ApplicationStore {
    /// An empty store with no persistence attached.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            apps: Arc::new(Vec::new()),
            clock,
            ids: IdGenerator::after(0),
            last_sync: None,
            persister: None,
            events: None,
        }
    }

    /// Loads the saved collection and starts the background persister.
    /// Loading itself never schedules a save.
    pub async fn load(gateway: Arc<Gateway>, clock: Arc<dyn Clock>, debounce: Duration) -> Self {
        let snapshot = gateway.load().await;
        let mut apps = snapshot.applications;

        let mut ids = IdGenerator::after(apps.iter().map(|a| a.id).max().unwrap_or(0));
        let mut seen = HashSet::new();
        for app in apps.iter_mut() {
            if app.id <= 0 || !seen.insert(app.id) {
                let fresh = ids.next(clock.now());
                warn!(old = app.id, new = fresh, "Reassigned missing or duplicate id");
                app.id = fresh;
                seen.insert(fresh);
            }
        }

        let apps = Arc::new(apps);
        let (changes, receiver) = watch::channel(Arc::clone(&apps));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_persister(
            gateway,
            Arc::clone(&clock),
            receiver,
            events_tx,
            debounce,
        ));

        Self {
            apps,
            clock,
            ids,
            last_sync: snapshot.last_sync,
            persister: Some(Persister { changes, task }),
            events: Some(events_rx),
        }
    }

    pub fn applications(&self) -> &[Application] {
        &self.apps
    }

    pub fn get(&self, id: i64) -> Option<&Application> {
        self.apps.iter().find(|a| a.id == id)
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    /// A fresh draft dated today.
    pub fn draft(&self) -> Application {
        Application::draft(self.today())
    }

    /// Appends the draft under a new id. Drafts without a company or
    /// position are dropped without touching the collection.
    pub fn add(&mut self, mut draft: Application) -> Option<i64> {
        if !draft.is_creatable() {
            debug!("Ignoring draft without company or position");
            return None;
        }
        let id = self.ids.next(self.clock.now());
        draft.id = id;
        draft.stamp(self.clock.today());
        Arc::make_mut(&mut self.apps).push(draft);
        self.publish();
        info!(id, "Added application");
        Some(id)
    }

    /// Replaces one field and re-stamps `lastUpdate`. `Ok(false)` when no
    /// record has `id`; a value that doesn't parse leaves the record as is.
    pub fn update_field(&mut self, id: i64, field: Field, value: &str) -> Result<bool, ValueError> {
        let Some(index) = self.index_of(id) else {
            return Ok(false);
        };
        let mut updated = self.apps[index].clone();
        updated.set_field(field, value)?;
        updated.stamp(self.clock.today());
        Arc::make_mut(&mut self.apps)[index] = updated;
        self.publish();
        debug!(id, field = field.name(), "Updated application");
        Ok(true)
    }

    /// Re-stamps `lastUpdate` after an edit session without changing fields.
    pub fn touch(&mut self, id: i64) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let today = self.clock.today();
        Arc::make_mut(&mut self.apps)[index].stamp(today);
        self.publish();
        true
    }

    /// Removes the record. Callers are expected to have confirmed with the
    /// user first.
    pub fn delete(&mut self, id: i64) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        Arc::make_mut(&mut self.apps).remove(index);
        self.publish();
        info!(id, "Deleted application");
        true
    }

    /// Appends imported records under fresh ids. No de-duplication against
    /// what is already stored.
    pub fn import_batch(&mut self, records: Vec<Application>) -> usize {
        if records.is_empty() {
            return 0;
        }
        let count = records.len();
        let now = self.clock.now();
        let apps = Arc::make_mut(&mut self.apps);
        for mut record in records {
            record.id = self.ids.next(now);
            apps.push(record);
        }
        self.publish();
        info!(count, "Imported applications");
        count
    }

    /// Drains save outcomes reported since the last call.
    pub fn poll_events(&mut self) -> Vec<PersistEvent> {
        let mut drained = Vec::new();
        if let Some(events) = self.events.as_mut() {
            while let Ok(event) = events.try_recv() {
                if let PersistEvent::Saved { at, .. } = &event {
                    self.last_sync = Some(*at);
                }
                drained.push(event);
            }
        }
        drained
    }

    /// Stops the persister, saving a pending change right away instead of
    /// waiting out the debounce window.
    pub async fn flush(&mut self) {
        if let Some(Persister { changes, task }) = self.persister.take() {
            drop(changes);
            if let Err(e) = task.await {
                warn!(error = %e, "Persistence task ended abnormally");
            }
        }
    }

    fn index_of(&self, id: i64) -> Option<usize> {
        self.apps.iter().position(|a| a.id == id)
    }

    fn publish(&self) {
        if let Some(persister) = &self.persister {
            persister.changes.send_replace(Arc::clone(&self.apps));
        }
    }
}

async fn run_persister(
    gateway: Arc<Gateway>,
    clock: Arc<dyn Clock>,
    mut changes: watch::Receiver<Collection>,
    events: mpsc::UnboundedSender<PersistEvent>,
    debounce: Duration,
) {
    loop {
        if changes.changed().await.is_err() {
            return;
        }

        // Every further change restarts the window.
        let closed = loop {
            match tokio::time::timeout(debounce, changes.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => break true,
                Err(_) => break false,
            }
        };

        let snapshot = Arc::clone(&changes.borrow_and_update());
        save(&gateway, clock.as_ref(), &snapshot, &events).await;

        if closed {
            return;
        }
    }
}

async fn save(
    gateway: &Gateway,
    clock: &dyn Clock,
    apps: &[Application],
    events: &mpsc::UnboundedSender<PersistEvent>,
) {
    // An empty collection would overwrite whatever an earlier session saved.
    if apps.is_empty() {
        debug!("Collection is empty, skipping save");
        return;
    }

    let at = clock.now();
    let event = match gateway.save(apps, at).await {
        Ok(()) => {
            info!(count = apps.len(), "Saved applications");
            PersistEvent::Saved {
                count: apps.len(),
                at,
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to save applications");
            PersistEvent::Failed {
                message: format!("{:#}", e),
            }
        }
    };
    let _ = events.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::gateway::memory::MemoryStore;
    use crate::models::Status;

    const WINDOW: Duration = Duration::from_millis(300);

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock(NaiveDate::from_ymd_opt(2024, 10, 20).unwrap()))
    }

    fn draft(store: &ApplicationStore, company: &str) -> Application {
        let mut draft = store.draft();
        draft.company = company.to_string();
        draft.position = "Cloud Engineer".to_string();
        draft
    }

    fn saved_companies(blob: &str) -> Vec<String> {
        let value: serde_json::Value = serde_json::from_str(blob).unwrap();
        value["applications"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["company"].as_str().unwrap().to_string())
            .collect()
    }

    async fn loaded(backend: &Arc<MemoryStore>) -> ApplicationStore {
        let gateway = Arc::new(Gateway::new(backend.clone()));
        ApplicationStore::load(gateway, clock(), WINDOW).await
    }

    #[test]
    fn test_add_assigns_unique_ids() {
        let mut store = ApplicationStore::new(clock());
        let mut ids = HashSet::new();
        for i in 0..50 {
            let before = store.len();
            let id = store.add(draft(&store, &format!("Company {}", i))).unwrap();
            assert_eq!(store.len(), before + 1);
            assert!(ids.insert(id), "id {} issued twice", id);
        }
    }

    #[test]
    fn test_add_rejects_incomplete_drafts() {
        let mut store = ApplicationStore::new(clock());
        let mut missing_position = draft(&store, "Acme");
        missing_position.position = " ".to_string();
        let missing_company = draft(&store, "");

        assert_eq!(store.add(missing_position), None);
        assert_eq!(store.add(missing_company), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_field_changes_only_target_and_stamps() {
        let mut store = ApplicationStore::new(clock());
        let mut old = draft(&store, "Acme");
        old.last_update = NaiveDate::from_ymd_opt(2024, 9, 1);
        let id = store.add(old).unwrap();
        let before = store.get(id).unwrap().clone();

        assert_eq!(store.update_field(id, Field::Status, "Offer"), Ok(true));

        let after = store.get(id).unwrap();
        assert_eq!(after.status, Status::Offer);
        assert_eq!(after.last_update, Some(store.today()));
        assert_eq!(after.company, before.company);
        assert_eq!(after.position, before.position);
        assert_eq!(after.notes, before.notes);
        assert_eq!(after.date_applied, before.date_applied);
    }

    #[test]
    fn test_update_field_unknown_id_is_noop() {
        let mut store = ApplicationStore::new(clock());
        store.add(draft(&store, "Acme")).unwrap();
        let before = store.applications().to_vec();
        assert_eq!(store.update_field(12345, Field::Notes, "x"), Ok(false));
        assert_eq!(store.applications(), before.as_slice());
    }

    #[test]
    fn test_update_field_bad_value_leaves_record() {
        let mut store = ApplicationStore::new(clock());
        let id = store.add(draft(&store, "Acme")).unwrap();
        let before = store.get(id).unwrap().clone();
        assert!(store.update_field(id, Field::Status, "Ghosted").is_err());
        assert_eq!(store.get(id).unwrap(), &before);
    }

    #[test]
    fn test_touch_restamps_without_changing_fields() {
        let mut store = ApplicationStore::new(clock());
        let id = store.add(draft(&store, "Acme")).unwrap();
        Arc::make_mut(&mut store.apps)[0].last_update = NaiveDate::from_ymd_opt(2024, 9, 1);

        assert!(store.touch(id));
        assert_eq!(store.get(id).unwrap().last_update, Some(store.today()));
        assert_eq!(store.get(id).unwrap().company, "Acme");
        assert!(!store.touch(id + 1));
    }

    #[test]
    fn test_delete() {
        let mut store = ApplicationStore::new(clock());
        let a = store.add(draft(&store, "Acme")).unwrap();
        let b = store.add(draft(&store, "Globex")).unwrap();

        assert!(store.delete(a));
        assert_eq!(store.len(), 1);
        assert!(store.get(a).is_none());
        assert!(store.get(b).is_some());

        assert!(!store.delete(a));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_import_batch_appends_with_fresh_ids() {
        let mut store = ApplicationStore::new(clock());
        let existing = store.add(draft(&store, "Acme")).unwrap();
        let batch = vec![draft(&store, "Acme"), draft(&store, "Globex"), draft(&store, "Initech")];

        assert_eq!(store.import_batch(batch), 3);

        let companies: Vec<_> = store.applications().iter().map(|a| a.company.as_str()).collect();
        assert_eq!(companies, ["Acme", "Acme", "Globex", "Initech"]);
        let ids: HashSet<_> = store.applications().iter().map(|a| a.id).collect();
        assert_eq!(ids.len(), 4);
        assert!(ids.contains(&existing));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_mutations_saves_once() {
        let backend = Arc::new(MemoryStore::default());
        let mut store = loaded(&backend).await;

        for i in 0..5 {
            store.add(draft(&store, &format!("Company {}", i)));
            tokio::time::sleep(WINDOW / 10).await;
        }
        tokio::time::sleep(WINDOW * 3).await;

        let saves = backend.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saved_companies(&saves[0]).len(), 5);
        assert!(matches!(
            store.poll_events().as_slice(),
            [PersistEvent::Saved { count: 5, .. }]
        ));
        assert!(store.last_sync().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_save_separately() {
        let backend = Arc::new(MemoryStore::default());
        let mut store = loaded(&backend).await;

        store.add(draft(&store, "Acme"));
        tokio::time::sleep(WINDOW * 2).await;
        store.add(draft(&store, "Globex"));
        tokio::time::sleep(WINDOW * 2).await;

        let saves = backend.saves();
        assert_eq!(saves.len(), 2);
        assert_eq!(saved_companies(&saves[1]), ["Acme", "Globex"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_does_not_save() {
        let blob = r#"{"applications": [{"id": 1, "company": "Acme", "position": "SRE"}], "lastSync": "2024-10-19T08:00:00Z"}"#;
        let backend = Arc::new(MemoryStore::with_blob(blob));
        let mut store = loaded(&backend).await;

        tokio::time::sleep(WINDOW * 3).await;
        assert_eq!(store.len(), 1);
        assert!(backend.saves().is_empty());
        assert!(store.poll_events().is_empty());
        assert!(store.last_sync().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_collection_is_never_saved() {
        let backend = Arc::new(MemoryStore::default());
        let mut store = loaded(&backend).await;

        let id = store.add(draft(&store, "Acme")).unwrap();
        store.delete(id);
        tokio::time::sleep(WINDOW * 3).await;

        assert!(backend.saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_warns_and_keeps_state() {
        let backend = Arc::new(MemoryStore::default());
        backend.set_failing(true);
        let mut store = loaded(&backend).await;

        store.add(draft(&store, "Acme"));
        tokio::time::sleep(WINDOW * 3).await;

        let events = store.poll_events();
        assert_eq!(events.len(), 1);
        let warning = events[0].warning().unwrap();
        assert!(warning.contains("storage quota exceeded"));
        assert!(warning.contains("CSV"));
        assert_eq!(store.len(), 1);
        assert!(store.last_sync().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_saves_pending_change_immediately() {
        let backend = Arc::new(MemoryStore::default());
        let mut store = loaded(&backend).await;

        store.add(draft(&store, "Acme"));
        store.flush().await;

        assert_eq!(backend.saves().len(), 1);
    }

    #[tokio::test]
    async fn test_load_repairs_missing_and_duplicate_ids() {
        let blob = r#"{"applications": [
            {"id": 5, "company": "A", "position": "x"},
            {"id": 5, "company": "B", "position": "x"},
            {"company": "C", "position": "x"}
        ]}"#;
        let backend = Arc::new(MemoryStore::with_blob(blob));
        let mut store = loaded(&backend).await;

        let ids: HashSet<_> = store.applications().iter().map(|a| a.id).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(store.applications()[0].id, 5);
        assert!(ids.iter().all(|id| *id > 0));
        store.flush().await;
    }
}
