use std::{collections::BTreeMap, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{AttributeName, FieldMode, Validity},
    protocol::{ClientMessage, ValidationOutcome},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod config;
pub mod error;

pub use error::CoordinatorError;

pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

const MODEL_ERROR_SEPARATOR: &str = ", ";

/// Result of a constraint check on a single input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintCheck {
    Satisfied,
    Violated { message: String },
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub attribute: AttributeName,
    pub mode: FieldMode,
}

/// The form surface the coordinator drives. Reads are constraint checks and
/// value snapshots; writes are error text, custom validity overrides, the
/// form-level error region, and the submit control.
pub trait FieldSource: Send + Sync {
    /// Tracked inputs. Read once at construction; the set is fixed afterwards.
    fn fields(&self) -> Vec<FieldDescriptor>;
    fn check_constraints(&self, attribute: &AttributeName) -> ConstraintCheck;
    /// Override the input's reported validity; an empty message resets to
    /// whatever the native constraints say.
    fn set_custom_validity(&self, attribute: &AttributeName, message: &str);
    /// Write the error-display slot for one input; an empty string clears it.
    fn set_error_text(&self, attribute: &AttributeName, text: &str);
    /// Replace the form-level error region. An empty slice hides and clears it.
    fn set_base_errors(&self, errors: &[String]);
    fn set_submit_enabled(&self, enabled: bool);
    /// Current value of every form input, keyed by input name.
    fn form_snapshot(&self) -> BTreeMap<String, String>;
}

/// Transport seam for server-side validation. Dispatch is fire-and-forget:
/// verdicts come back unsolicited via [`ValidationCoordinator::apply_remote_result`].
#[async_trait]
pub trait ValidationChannel: Send + Sync {
    async fn perform_validate(&self, message: ClientMessage) -> Result<()>;
}

pub struct MissingValidationChannel;

#[async_trait]
impl ValidationChannel for MissingValidationChannel {
    async fn perform_validate(&self, _message: ClientMessage) -> Result<()> {
        Err(anyhow!("validation channel is unavailable"))
    }
}

#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    FieldValidated {
        attribute: AttributeName,
        validity: Validity,
    },
    SnapshotDispatched,
    BaseErrorsUpdated {
        errors: Vec<String>,
    },
    SubmitGateChanged {
        enabled: bool,
    },
    Error(String),
}

#[derive(Debug, Clone)]
pub struct FieldState {
    pub attribute: AttributeName,
    pub mode: FieldMode,
    /// Set on the field's first edit. Remote verdicts only ever touch dirty
    /// fields, so errors echoed for untouched inputs never surface.
    pub dirty: bool,
    pub validity: Validity,
    /// Server-sourced message currently overriding the input's validity.
    pub custom_message: Option<String>,
}

struct CoordinatorState {
    fields: Vec<FieldState>,
    base_errors: Vec<String>,
    submit_enabled: bool,
}

/// Drives per-field validation and the aggregate submit gate for one form.
///
/// Locally-validated fields settle synchronously from constraint checks.
/// Remote fields dispatch a whole-form snapshot over the channel and settle
/// later when a verdict arrives. Either way the gate is recomputed after
/// every pass: enabled only while every tracked field is valid.
pub struct ValidationCoordinator<S: FieldSource> {
    source: S,
    channel: Arc<dyn ValidationChannel>,
    inner: Mutex<CoordinatorState>,
    // One pending dispatch timer for the whole form, replaced on every
    // debounced edit regardless of which field it came from.
    debounce: Mutex<Option<JoinHandle<()>>>,
    debounce_window: Duration,
    events: broadcast::Sender<CoordinatorEvent>,
}

impl<S: FieldSource + 'static> ValidationCoordinator<S> {
    pub fn new(source: S, channel: Arc<dyn ValidationChannel>) -> Arc<Self> {
        Self::with_debounce_window(source, channel, DEFAULT_DEBOUNCE_WINDOW)
    }

    pub fn with_debounce_window(
        source: S,
        channel: Arc<dyn ValidationChannel>,
        debounce_window: Duration,
    ) -> Arc<Self> {
        let fields = source
            .fields()
            .into_iter()
            .map(|descriptor| FieldState {
                attribute: descriptor.attribute,
                mode: descriptor.mode,
                dirty: false,
                validity: Validity::Unknown,
                custom_message: None,
            })
            .collect::<Vec<_>>();
        info!(fields = fields.len(), "coordinator initialized");

        // Nothing has been validated yet, so the form must not be submittable.
        source.set_submit_enabled(false);

        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            source,
            channel,
            inner: Mutex::new(CoordinatorState {
                fields,
                base_errors: Vec::new(),
                submit_enabled: false,
            }),
            debounce: Mutex::new(None),
            debounce_window,
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    /// Handle a change event on one field.
    ///
    /// The field is marked dirty first. Local fields then settle from a
    /// native constraint check; remote fields dispatch the whole form's
    /// current values and keep their validity until a verdict arrives.
    pub async fn validate(&self, attribute: &AttributeName) -> Result<()> {
        let mut state = self.inner.lock().await;
        let field = find_field_mut(&mut state.fields, attribute)
            .ok_or_else(|| CoordinatorError::UnknownField(attribute.to_string()))?;
        field.dirty = true;
        let mode = field.mode;

        match mode {
            FieldMode::Local => {
                self.run_native_pass(&mut state, attribute)?;
                self.recompute_gate(&mut state);
            }
            FieldMode::Remote => {
                drop(state);
                let snapshot = self.source.form_snapshot();
                debug!(attribute = %attribute, fields = snapshot.len(), "dispatching form snapshot");
                if let Err(err) = self
                    .channel
                    .perform_validate(ClientMessage::Validate { fields: snapshot })
                    .await
                {
                    let _ = self.events.send(CoordinatorEvent::Error(err.to_string()));
                    return Err(CoordinatorError::Dispatch(err.to_string()).into());
                }
                let _ = self.events.send(CoordinatorEvent::SnapshotDispatched);
            }
        }
        Ok(())
    }

    /// Debounced variant of [`Self::validate`] for keystroke-frequency
    /// events. Each call aborts any pending timer and starts a fresh one, so
    /// a burst of edits collapses into a single trailing dispatch carrying
    /// the form's values as of the last edit.
    pub async fn debounced_validate(self: &Arc<Self>, attribute: AttributeName) {
        let mut pending = self.debounce.lock().await;
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        let coordinator = Arc::clone(self);
        let window = self.debounce_window;
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Err(err) = coordinator.validate(&attribute).await {
                warn!(attribute = %attribute, "debounced validation failed: {err}");
            }
        }));
    }

    /// Apply a whole-form verdict from the channel.
    ///
    /// This is the only entry point for remote results, independent of how
    /// they were delivered. There is no correlation to a specific dispatch;
    /// the latest verdict wins. The pass is: update the form-level error
    /// region, re-evaluate every dirty remote field (native constraint
    /// violations take precedence over server-reported errors), then
    /// recompute the gate.
    pub async fn apply_remote_result(&self, outcome: ValidationOutcome) {
        let mut state = self.inner.lock().await;
        debug!(
            base_errors = outcome.base_errors.len(),
            model_errors = outcome.model_errors.len(),
            "applying remote verdict"
        );

        self.source.set_base_errors(&outcome.base_errors);
        if state.base_errors != outcome.base_errors {
            state.base_errors = outcome.base_errors.clone();
            let _ = self.events.send(CoordinatorEvent::BaseErrorsUpdated {
                errors: outcome.base_errors.clone(),
            });
        }

        for field in state.fields.iter_mut() {
            if field.mode != FieldMode::Remote || !field.dirty {
                continue;
            }

            // Clear any previous server override before re-checking, so the
            // constraint check reflects the input's own rules.
            self.source.set_custom_validity(&field.attribute, "");
            field.custom_message = None;

            let validity = match self.source.check_constraints(&field.attribute) {
                ConstraintCheck::Violated { message } => {
                    self.source.set_error_text(&field.attribute, &message);
                    Validity::Invalid { message }
                }
                ConstraintCheck::Satisfied => {
                    match outcome.model_errors.get(field.attribute.as_str()) {
                        Some(messages) => {
                            let joined = messages.join(MODEL_ERROR_SEPARATOR);
                            self.source.set_error_text(&field.attribute, &joined);
                            self.source.set_custom_validity(&field.attribute, &joined);
                            field.custom_message = Some(joined.clone());
                            Validity::Invalid { message: joined }
                        }
                        None => {
                            self.source.set_error_text(&field.attribute, "");
                            Validity::Valid
                        }
                    }
                }
            };
            field.validity = validity.clone();
            let _ = self.events.send(CoordinatorEvent::FieldValidated {
                attribute: field.attribute.clone(),
                validity,
            });
        }

        self.recompute_gate(&mut state);
    }

    /// Pipe verdicts from a transport subscription into the coordinator
    /// until the sender side goes away.
    pub fn run_outcome_feed(
        self: &Arc<Self>,
        mut outcomes: broadcast::Receiver<ValidationOutcome>,
    ) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match outcomes.recv().await {
                    Ok(outcome) => coordinator.apply_remote_result(outcome).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Only the most recent verdict matters anyway.
                        warn!(skipped, "outcome feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn submit_enabled(&self) -> bool {
        self.inner.lock().await.submit_enabled
    }

    pub async fn base_errors(&self) -> Vec<String> {
        self.inner.lock().await.base_errors.clone()
    }

    pub async fn field_state(&self, attribute: &AttributeName) -> Option<FieldState> {
        self.inner
            .lock()
            .await
            .fields
            .iter()
            .find(|field| &field.attribute == attribute)
            .cloned()
    }

    fn run_native_pass(&self, state: &mut CoordinatorState, attribute: &AttributeName) -> Result<()> {
        let field = find_field_mut(&mut state.fields, attribute)
            .ok_or_else(|| CoordinatorError::UnknownField(attribute.to_string()))?;
        let validity = match self.source.check_constraints(&field.attribute) {
            ConstraintCheck::Satisfied => {
                self.source.set_error_text(&field.attribute, "");
                Validity::Valid
            }
            ConstraintCheck::Violated { message } => {
                self.source.set_error_text(&field.attribute, &message);
                Validity::Invalid { message }
            }
        };
        field.validity = validity.clone();
        let _ = self.events.send(CoordinatorEvent::FieldValidated {
            attribute: field.attribute.clone(),
            validity,
        });
        Ok(())
    }

    fn recompute_gate(&self, state: &mut CoordinatorState) {
        let enabled = state.fields.iter().all(|field| field.validity.is_valid());
        self.source.set_submit_enabled(enabled);
        if state.submit_enabled != enabled {
            state.submit_enabled = enabled;
            info!(enabled, "submit gate changed");
            let _ = self
                .events
                .send(CoordinatorEvent::SubmitGateChanged { enabled });
        }
    }
}

fn find_field_mut<'a>(
    fields: &'a mut [FieldState],
    attribute: &AttributeName,
) -> Option<&'a mut FieldState> {
    fields.iter_mut().find(|field| &field.attribute == attribute)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
