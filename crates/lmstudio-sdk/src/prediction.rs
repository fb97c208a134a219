//! Ongoing predictions and the `predict` channel state machine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lmstudio_protocol::chat::LlmContext;
use lmstudio_protocol::messages::{PredictionChannelMessage, decode_channel_message};
use lmstudio_protocol::prediction::{LlmPredictionConfig, PredictionResult};
use lmstudio_protocol::{KvConfigStack, ModelSpecifier};
use serde_json::json;

use crate::cancellation::{BufferedEvent, EventEmitter};
use crate::error::LmStudioError;
use crate::port::{ChannelEvent, ChannelHandler, ChannelSender, ClientPort};
use crate::streaming::{StreamIter, StreamingSink};

pub type PredictionSink = StreamingSink<String, PredictionResult>;

type ProgressCallback = Box<dyn FnMut(f64) + Send>;
type FirstTokenCallback = Box<dyn FnMut() + Send>;

/// Caller options for a prediction: wire config plus local callbacks.
#[derive(Default)]
pub struct LlmPredictionOpts {
    pub config: LlmPredictionConfig,
    /// Called with prompt processing progress in `[0, 1]`, until the first token arrives.
    pub on_prompt_processing_progress: Option<ProgressCallback>,
    /// Called once, when the first fragment arrives.
    pub on_first_token: Option<FirstTokenCallback>,
}

impl LlmPredictionOpts {
    pub fn new(config: LlmPredictionConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn with_on_prompt_processing_progress(
        mut self,
        callback: impl FnMut(f64) + Send + 'static,
    ) -> Self {
        self.on_prompt_processing_progress = Some(Box::new(callback));
        self
    }

    pub fn with_on_first_token(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.on_first_token = Some(Box::new(callback));
        self
    }

    pub(crate) fn split(self) -> (LlmPredictionConfig, PredictionCallbacks) {
        (
            self.config,
            PredictionCallbacks {
                on_prompt_processing_progress: self.on_prompt_processing_progress,
                on_first_token: self.on_first_token,
            },
        )
    }
}

impl From<LlmPredictionConfig> for LlmPredictionOpts {
    fn from(config: LlmPredictionConfig) -> Self {
        Self::new(config)
    }
}

impl std::fmt::Debug for LlmPredictionOpts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmPredictionOpts")
            .field("config", &self.config)
            .field(
                "on_prompt_processing_progress",
                &self.on_prompt_processing_progress.is_some(),
            )
            .field("on_first_token", &self.on_first_token.is_some())
            .finish()
    }
}

#[derive(Default)]
pub(crate) struct PredictionCallbacks {
    on_prompt_processing_progress: Option<ProgressCallback>,
    on_first_token: Option<FirstTokenCallback>,
}

/// A prediction running on the server.
///
/// Iterate it to receive fragments as they arrive, or call
/// [`result`](Self::result) to block until the full [`PredictionResult`].
/// Both can be combined; fragments are buffered.
pub struct OngoingPrediction {
    sink: Arc<PredictionSink>,
    cancel: EventEmitter,
}

impl OngoingPrediction {
    pub fn iter(&self) -> StreamIter<String, PredictionResult> {
        self.sink.iter()
    }

    pub fn result(&self) -> Result<PredictionResult, LmStudioError> {
        self.sink.wait()
    }

    pub fn try_result(&self) -> Option<Result<PredictionResult, LmStudioError>> {
        self.sink.try_result()
    }

    /// Asks the server to stop. The prediction still ends with the server's
    /// final message, usually a success with stop reason `userStopped`.
    /// Does nothing once the prediction has finished.
    pub fn cancel(&self) {
        self.cancel.emit();
    }

    pub fn is_finished(&self) -> bool {
        self.sink.is_settled()
    }
}

impl std::fmt::Debug for OngoingPrediction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OngoingPrediction")
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl IntoIterator for &OngoingPrediction {
    type Item = Result<String, LmStudioError>;
    type IntoIter = StreamIter<String, PredictionResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for OngoingPrediction {
    type Item = Result<String, LmStudioError>;
    type IntoIter = StreamIter<String, PredictionResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

struct PredictionChannelHandler {
    sink: Arc<PredictionSink>,
    finished: Arc<AtomicBool>,
    is_first_token: bool,
    callbacks: PredictionCallbacks,
}

impl PredictionChannelHandler {
    fn on_message(&mut self, message: PredictionChannelMessage) {
        match message {
            PredictionChannelMessage::Fragment { fragment } => {
                self.sink.push(fragment);
                if self.is_first_token {
                    self.is_first_token = false;
                    log::debug!("First token received");
                    if let Some(on_first_token) = &mut self.callbacks.on_first_token {
                        on_first_token();
                    }
                }
            }
            PredictionChannelMessage::PromptProcessingProgress { progress } => {
                log::debug!("Processing prompt, progress: {progress}");
                if self.is_first_token {
                    if let Some(on_progress) = &mut self.callbacks.on_prompt_processing_progress {
                        on_progress(progress);
                    }
                }
            }
            PredictionChannelMessage::Success {
                stats,
                model_info,
                load_config,
                prediction_config,
            } => {
                self.finished.store(true, Ordering::SeqCst);
                log::debug!("Prediction finished: {}", stats.stop_reason);
                self.sink.finish_with(move |fragments| PredictionResult {
                    content: fragments.concat(),
                    stats,
                    model_info,
                    load_config,
                    prediction_config,
                });
            }
            PredictionChannelMessage::Error { error } => {
                log::error!("Prediction failed: {error}");
                self.fail(LmStudioError::Channel { title: error.title });
            }
            PredictionChannelMessage::Unknown => {}
        }
    }

    fn fail(&mut self, error: LmStudioError) {
        self.finished.store(true, Ordering::SeqCst);
        self.sink.fail(error);
    }
}

impl ChannelHandler for PredictionChannelHandler {
    fn handle(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Message(message) => {
                match decode_channel_message::<PredictionChannelMessage>("predict", message) {
                    Ok(message) => self.on_message(message),
                    Err(e) => {
                        log::error!("{e}");
                        self.fail(e.into());
                    }
                }
            }
            ChannelEvent::Error(error) => {
                log::debug!("Prediction channel failed: {error}");
                self.fail(error);
            }
            ChannelEvent::Closed => self.fail(LmStudioError::ChannelClosed),
        }
    }
}

/// Opens a `predict` channel and wires caller cancellation to it.
pub(crate) fn start_prediction(
    port: &ClientPort,
    model_specifier: &ModelSpecifier,
    context: &LlmContext,
    prediction_config_stack: &KvConfigStack,
    callbacks: PredictionCallbacks,
) -> Result<OngoingPrediction, LmStudioError> {
    let sink = Arc::new(PredictionSink::new());
    let finished = Arc::new(AtomicBool::new(false));
    let handler = PredictionChannelHandler {
        sink: sink.clone(),
        finished: finished.clone(),
        is_first_token: true,
        callbacks,
    };

    let channel_id = port.create_channel(
        "predict",
        Some(json!({
            "modelSpecifier": model_specifier,
            "context": context,
            "predictionConfigStack": prediction_config_stack,
        })),
        handler,
    )?;

    let (cancel_event, cancel) = BufferedEvent::create();
    let sender = ChannelSender::new(port.downgrade(), channel_id);
    cancel_event.subscribe(move || {
        if finished.load(Ordering::SeqCst) {
            return;
        }
        log::info!("Cancelling prediction on channel {}", sender.channel_id());
        if let Err(e) = sender.send(json!({"type": "cancel"})) {
            log::debug!("Failed to send cancel: {e}");
        }
    });

    Ok(OngoingPrediction { sink, cancel })
}
