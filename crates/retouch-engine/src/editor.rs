use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use retouch_contracts::events::EventWriter;
use retouch_contracts::history::{History, ImageVersion};
use retouch_contracts::requests::{
    CropRect, GenerationRequest, Hotspot, InvalidInput, OperationKind,
};
use retouch_contracts::session::{check_gate, GateDenial, SessionStore, UserSession};
use retouch_contracts::summary::EditSummary;
use serde_json::{json, Value};
use thiserror::Error;

use crate::classify::GenerationError;
use crate::client::GenerationClient;
use crate::codec::image_dimensions;
use crate::expand::crop_image;
use crate::providers::error_chain_text;

/// Everything that can end a user action without a new version.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),
    #[error(transparent)]
    Gate(#[from] GateDenial),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("session storage failed: {0}")]
    Storage(String),
}

impl EditError {
    /// True only when the user should be sent to the purchase flow.
    pub fn is_paywall(&self) -> bool {
        matches!(self, Self::Gate(denial) if denial.is_paywall())
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Gate(_) => "gate",
            Self::Generation(GenerationError::PolicyBlocked { .. }) => "policy_blocked",
            Self::Generation(GenerationError::AbnormalCompletion(_)) => "abnormal_completion",
            Self::Generation(GenerationError::NoImageReturned(_)) => "no_image_returned",
            Self::Generation(GenerationError::Transport(_)) => "transport",
            Self::Storage(_) => "storage",
        }
    }

    fn storage(err: anyhow::Error) -> Self {
        Self::Storage(error_chain_text(&err, 512))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Committed {
        version: ImageVersion,
        credits_remaining: i64,
    },
    /// The image was replaced while the request was in flight; the result was dropped.
    Discarded,
}

#[derive(Debug, Default)]
struct EditStats {
    committed: u64,
    failed: u64,
    denied: u64,
    credits_spent: u64,
}

#[derive(Debug, Default)]
struct EditorState {
    history: History,
    hotspot: Option<Hotspot>,
    epoch: u64,
    stats: EditStats,
}

/// Ties history, the session gate and the generation client together.
///
/// All methods take `&self`; the editor can be shared across threads and
/// several submissions may be in flight at once. The state lock is never held
/// across a provider call. Commits are last-write-wins on the history.
pub struct Editor {
    client: Mutex<GenerationClient>,
    sessions: Arc<dyn SessionStore>,
    events: EventWriter,
    started_at: String,
    state: Mutex<EditorState>,
}

impl Editor {
    pub fn new(
        client: GenerationClient,
        sessions: Arc<dyn SessionStore>,
        events: EventWriter,
    ) -> Self {
        let editor = Self {
            started_at: now_utc_iso(),
            client: Mutex::new(client),
            sessions,
            events,
            state: Mutex::new(EditorState::default()),
        };
        let (model, provider) = editor
            .client()
            .map(|client| (client.model().to_string(), client.provider_name().to_string()))
            .unwrap_or_default();
        editor.record(
            "editor_started",
            json!({ "model": model, "provider": provider }),
        );
        editor
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn client(&self) -> Result<GenerationClient, EditError> {
        self.client
            .lock()
            .map(|client| client.clone())
            .map_err(|_| EditError::Storage("editor client lock poisoned".to_string()))
    }

    pub fn set_client(&self, client: GenerationClient) -> Result<(), EditError> {
        let mut guard = self
            .client
            .lock()
            .map_err(|_| EditError::Storage("editor client lock poisoned".to_string()))?;
        *guard = client;
        Ok(())
    }

    pub fn session(&self) -> Result<Option<UserSession>, EditError> {
        self.sessions.current().map_err(EditError::storage)
    }

    /// Starts a fresh history from `image`. Results still in flight for the
    /// previous image are discarded when they arrive.
    pub fn load_image(&self, image: ImageVersion) -> Result<(), EditError> {
        let mut state = self.lock_state()?;
        state.epoch += 1;
        state.hotspot = None;
        let payload = json!({
            "name": image.name,
            "mime_type": image.mime_type,
            "bytes": image.len(),
            "digest": image.digest,
            "epoch": state.epoch,
        });
        state.history.reset(image);
        drop(state);
        self.record("image_loaded", payload);
        Ok(())
    }

    pub fn current(&self) -> Result<Option<ImageVersion>, EditError> {
        Ok(self.lock_state()?.history.current().cloned())
    }

    pub fn original(&self) -> Result<Option<ImageVersion>, EditError> {
        Ok(self.lock_state()?.history.original().cloned())
    }

    pub fn history(&self) -> Result<History, EditError> {
        Ok(self.lock_state()?.history.clone())
    }

    pub fn hotspot(&self) -> Result<Option<Hotspot>, EditError> {
        Ok(self.lock_state()?.hotspot)
    }

    /// Stores the point used by the next prompt-only edit.
    pub fn set_hotspot(&self, x: u32, y: u32) -> Result<Hotspot, EditError> {
        let head = self.head()?;
        let hotspot = Hotspot::new(x, y);
        check_hotspot(hotspot, &head)?;
        self.lock_state()?.hotspot = Some(hotspot);
        Ok(hotspot)
    }

    /// Edit at the stored hotspot.
    pub fn edit_at_hotspot(&self, prompt: &str) -> Result<SubmitOutcome, EditError> {
        let hotspot = {
            let state = self.lock_state()?;
            if state.history.is_empty() {
                drop(state);
                return Err(self.reject(InvalidInput::NoImageLoaded.into(), "edit"));
            }
            state.hotspot
        };
        if prompt.trim().is_empty() {
            let err = InvalidInput::MissingPrompt(OperationKind::Edit);
            return Err(self.reject(err.into(), "edit"));
        }
        let Some(hotspot) = hotspot else {
            return Err(self.reject(InvalidInput::MissingHotspot.into(), "edit"));
        };
        self.submit(GenerationRequest::Edit {
            hotspot,
            prompt: prompt.to_string(),
        })
    }

    /// Runs one generation: validate, gate, call the provider, then commit
    /// the new version and debit one credit as a single step.
    pub fn submit(&self, request: GenerationRequest) -> Result<SubmitOutcome, EditError> {
        let operation = request.kind().as_str();
        let Some((head, epoch)) = self.snapshot()? else {
            return Err(self.reject(InvalidInput::NoImageLoaded.into(), operation));
        };
        if let Err(err) = request.validate() {
            return Err(self.reject(err.into(), operation));
        }
        if let GenerationRequest::Edit { hotspot, .. } = &request {
            if let Err(err) = check_hotspot(*hotspot, &head) {
                return Err(self.reject(err, operation));
            }
        }

        let session = self.sessions.current().map_err(EditError::storage)?;
        if let Err(denial) = check_gate(session.as_ref()) {
            if let Ok(mut state) = self.lock_state() {
                state.stats.denied += 1;
            }
            self.record(
                "generation_denied",
                json!({
                    "operation": operation,
                    "reason": denial,
                    "paywall": denial.is_paywall(),
                }),
            );
            return Err(denial.into());
        }
        let Some(session) = session else {
            return Err(GateDenial::NotLoggedIn.into());
        };

        let client = self.client()?;
        self.record(
            "generation_requested",
            json!({
                "operation": operation,
                "model": client.model(),
                "provider": client.provider_name(),
                "user_id": session.user_id,
                "head": head.name,
                "prompt": request.prompt(),
            }),
        );

        let version = match client.submit(&request, &head) {
            Ok(version) => version,
            Err(err) => return Err(self.reject(err.into(), operation)),
        };

        let mut state = self.lock_state()?;
        if state.epoch != epoch {
            drop(state);
            self.record(
                "result_discarded",
                json!({ "operation": operation, "version": version.name }),
            );
            return Ok(SubmitOutcome::Discarded);
        }
        let debit = match self.sessions.debit(&session.user_id, operation) {
            Ok(debit) => debit,
            Err(err) => {
                drop(state);
                return Err(self.reject(EditError::storage(err), operation));
            }
        };
        let spent = debit.charged;
        let updated = debit.session;
        state.history.append(version.clone());
        if matches!(request, GenerationRequest::Edit { .. }) {
            state.hotspot = None;
        }
        state.stats.committed += 1;
        if spent {
            state.stats.credits_spent += 1;
        }
        let index = state.history.index();
        drop(state);

        self.record(
            "version_committed",
            json!({
                "operation": operation,
                "version": version.name,
                "mime_type": version.mime_type,
                "bytes": version.len(),
                "digest": version.digest,
                "index": index,
            }),
        );
        if spent {
            self.record(
                "credit_debited",
                json!({
                    "user_id": updated.user_id,
                    "operation": operation,
                    "credits_remaining": updated.credits,
                }),
            );
        }
        Ok(SubmitOutcome::Committed {
            version,
            credits_remaining: updated.credits,
        })
    }

    /// Local crop of the current version; no gate and no credit.
    pub fn crop(&self, rect: CropRect) -> Result<ImageVersion, EditError> {
        let Some((head, epoch)) = self.snapshot()? else {
            return Err(self.reject(InvalidInput::NoImageLoaded.into(), "crop"));
        };
        let cropped = match crop_image(&head.bytes, rect) {
            Ok(cropped) => cropped,
            Err(err) => {
                let err = match err.downcast::<InvalidInput>() {
                    Ok(invalid) => EditError::InvalidInput(invalid),
                    Err(other) => EditError::storage(other),
                };
                return Err(self.reject(err, "crop"));
            }
        };
        let version = ImageVersion::generated("crop", cropped.mime_type, cropped.bytes);
        let mut state = self.lock_state()?;
        if state.epoch != epoch {
            return Err(EditError::InvalidInput(InvalidInput::NoImageLoaded));
        }
        state.history.append(version.clone());
        state.stats.committed += 1;
        let index = state.history.index();
        drop(state);
        self.record(
            "version_committed",
            json!({
                "operation": "crop",
                "version": version.name,
                "mime_type": version.mime_type,
                "bytes": version.len(),
                "digest": version.digest,
                "index": index,
            }),
        );
        Ok(version)
    }

    pub fn undo(&self) -> Result<bool, EditError> {
        self.navigate("undo", History::undo)
    }

    pub fn redo(&self) -> Result<bool, EditError> {
        self.navigate("redo", History::redo)
    }

    pub fn reset_to_original(&self) -> Result<bool, EditError> {
        self.navigate("reset_to_original", |history| {
            let before = history.index();
            history.reset_to_original();
            history.index() != before
        })
    }

    pub fn summary(&self) -> Result<EditSummary, EditError> {
        let state = self.lock_state()?;
        Ok(EditSummary {
            session_id: self.events.session_id().to_string(),
            started_at: self.started_at.clone(),
            finished_at: now_utc_iso(),
            total_versions: state.history.len() as u64,
            committed: state.stats.committed,
            failed: state.stats.failed,
            denied: state.stats.denied,
            credits_spent: state.stats.credits_spent,
            current_version: state.history.current().map(|version| version.name.clone()),
        })
    }

    pub fn finish(&self) -> Result<EditSummary, EditError> {
        let summary = self.summary()?;
        self.record(
            "editor_finished",
            json!({
                "total_versions": summary.total_versions,
                "committed": summary.committed,
                "failed": summary.failed,
                "denied": summary.denied,
                "credits_spent": summary.credits_spent,
            }),
        );
        Ok(summary)
    }

    fn navigate(
        &self,
        action: &str,
        step: impl FnOnce(&mut History) -> bool,
    ) -> Result<bool, EditError> {
        let mut state = self.lock_state()?;
        let moved = step(&mut state.history);
        let index = state.history.index();
        drop(state);
        self.record(
            "history_navigated",
            json!({ "action": action, "moved": moved, "index": index }),
        );
        Ok(moved)
    }

    /// Current head plus the epoch it belongs to.
    fn snapshot(&self) -> Result<Option<(ImageVersion, u64)>, EditError> {
        let state = self.lock_state()?;
        Ok(state
            .history
            .current()
            .cloned()
            .map(|head| (head, state.epoch)))
    }

    fn head(&self) -> Result<ImageVersion, EditError> {
        self.lock_state()?
            .history
            .current()
            .cloned()
            .ok_or(EditError::InvalidInput(InvalidInput::NoImageLoaded))
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, EditorState>, EditError> {
        self.state
            .lock()
            .map_err(|_| EditError::Storage("editor state lock poisoned".to_string()))
    }

    /// Counts and logs a failed action, then hands the error back unchanged.
    fn reject(&self, err: EditError, operation: &str) -> EditError {
        if let Ok(mut state) = self.lock_state() {
            state.stats.failed += 1;
        }
        self.record(
            "generation_failed",
            json!({
                "operation": operation,
                "error_kind": err.kind(),
                "error": err.to_string(),
            }),
        );
        err
    }

    fn record(&self, event_type: &str, payload: Value) {
        if let Err(err) = self.events.emit(event_type, payload) {
            eprintln!("retouch: event log write failed: {err:#}");
        }
    }
}

fn check_hotspot(hotspot: Hotspot, head: &ImageVersion) -> Result<(), EditError> {
    let (width, height) = image_dimensions(&head.bytes).map_err(EditError::storage)?;
    if hotspot.x >= width || hotspot.y >= height {
        return Err(InvalidInput::HotspotOutOfBounds {
            x: hotspot.x,
            y: hotspot.y,
            width,
            height,
        }
        .into());
    }
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
