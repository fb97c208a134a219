//! Loading, unloading and looking up models of one domain.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use lmstudio_protocol::kv_config::KvConfigLayerName;
use lmstudio_protocol::load_config::{
    EmbeddingLoadModelConfig, LlmLoadModelConfig, LoadConfig, LoadModelRequest,
};
use lmstudio_protocol::messages::{LoadModelChannelMessage, decode_channel_message};
use lmstudio_protocol::model::LoadedModelInfo;
use lmstudio_protocol::{KvConfigStack, ModelDescriptor, ModelDomainType, ModelQuery, ModelSpecifier};
use serde_json::json;

use crate::cancellation::{AbortSignal, BufferedEvent, CancellableResult, EventEmitter};
use crate::error::LmStudioError;
use crate::handles::{
    DomainHandle, DynamicHandle, EmbeddingDynamicHandle, LlmDynamicHandle, SpecificModel,
};
use crate::port::{
    ChannelEvent, ChannelHandler, ChannelSender, ClientPort, WeakPort, decode_result,
};
use crate::streaming::{StreamIter, StreamingSink};

/// Binds a namespace to its domain's handle and load config types.
pub trait ModelDomain: Send + Sync + 'static {
    const DOMAIN: ModelDomainType;
    type Handle: DomainHandle;
    type LoadConfig: LoadConfig + Default + Send + 'static;
}

#[derive(Debug)]
pub struct Llm;

impl ModelDomain for Llm {
    const DOMAIN: ModelDomainType = ModelDomainType::Llm;
    type Handle = LlmDynamicHandle;
    type LoadConfig = LlmLoadModelConfig;
}

#[derive(Debug)]
pub struct Embedding;

impl ModelDomain for Embedding {
    const DOMAIN: ModelDomainType = ModelDomainType::Embedding;
    type Handle = EmbeddingDynamicHandle;
    type LoadConfig = EmbeddingLoadModelConfig;
}

pub type LlmNamespace = ModelNamespace<Llm>;
pub type EmbeddingNamespace = ModelNamespace<Embedding>;

type ProgressCallback = Box<dyn FnMut(f64) + Send>;

/// Options for [`ModelNamespace::load`].
pub struct LoadModelOpts<C> {
    /// Identifier to assign to the loaded instance.
    pub identifier: Option<String>,
    pub config: C,
    /// Aborting it cancels the load.
    pub signal: Option<AbortSignal>,
    /// Level at which progress is logged when no `on_progress` callback is set.
    pub verbose: Option<log::Level>,
    pub on_progress: Option<ProgressCallback>,
}

impl<C: Default> Default for LoadModelOpts<C> {
    fn default() -> Self {
        Self {
            identifier: None,
            config: C::default(),
            signal: None,
            verbose: Some(log::Level::Info),
            on_progress: None,
        }
    }
}

impl<C> LoadModelOpts<C> {
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_config(mut self, config: C) -> Self {
        self.config = config;
        self
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose.then_some(log::Level::Info);
        self
    }

    pub fn with_verbose_level(mut self, level: log::Level) -> Self {
        self.verbose = Some(level);
        self
    }

    pub fn with_on_progress(mut self, on_progress: impl FnMut(f64) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(on_progress));
        self
    }
}

type LoadSink<H> = StreamingSink<f64, CancellableResult<SpecificModel<H>>>;

/// A model load in progress.
///
/// Iterating [`progress`](Self::progress) yields load progress in `[0, 1]`.
/// The load completes with the loaded model, or with
/// [`CancellableResult::Cancelled`] if it was cancelled.
pub struct LoadingModel<H> {
    sink: Arc<LoadSink<H>>,
    cancel: EventEmitter,
}

impl<H: Clone> LoadingModel<H> {
    pub fn progress(&self) -> StreamIter<f64, CancellableResult<SpecificModel<H>>> {
        self.sink.iter()
    }

    pub fn wait(&self) -> Result<CancellableResult<SpecificModel<H>>, LmStudioError> {
        self.sink.wait()
    }

    pub fn try_result(&self) -> Option<Result<CancellableResult<SpecificModel<H>>, LmStudioError>> {
        self.sink.try_result()
    }

    /// Settles the load as cancelled and asks the server to stop. No-op once finished.
    pub fn cancel(&self) {
        self.cancel.emit();
    }
}

struct LoadModelChannelHandler<H> {
    port: WeakPort,
    path: String,
    full_path: String,
    started: Instant,
    sink: Arc<LoadSink<H>>,
    finished: Arc<AtomicBool>,
    verbose: Option<log::Level>,
    on_progress: Option<ProgressCallback>,
}

impl<H: DomainHandle> LoadModelChannelHandler<H> {
    fn on_message(&mut self, message: LoadModelChannelMessage) {
        match message {
            LoadModelChannelMessage::Resolved {
                full_path,
                ambiguous,
            } => {
                if ambiguous {
                    log::warn!(
                        "Multiple models found for '{}'. Using '{full_path}'.",
                        self.path
                    );
                }
                log::debug!("Start loading model {full_path}...");
                self.full_path = full_path;
                self.started = Instant::now();
            }
            LoadModelChannelMessage::Progress { progress } => {
                self.sink.push(progress);
                match (&mut self.on_progress, self.verbose) {
                    (Some(on_progress), _) => on_progress(progress),
                    (None, Some(level)) => log::log!(
                        level,
                        "Loading {}: {:.1}%",
                        self.full_path,
                        progress * 100.0
                    ),
                    (None, None) => {}
                }
            }
            LoadModelChannelMessage::Success {
                instance_reference,
                identifier,
            } => {
                if self.finished.swap(true, Ordering::SeqCst) {
                    return;
                }
                log::debug!(
                    "Model {} loaded in {:.3}s",
                    self.full_path,
                    self.started.elapsed().as_secs_f64()
                );
                let identifier = identifier.unwrap_or_else(|| self.path.clone());
                let model = SpecificModel::new(
                    self.port.clone(),
                    instance_reference,
                    ModelDescriptor::new(identifier, self.path.clone()),
                );
                self.sink
                    .finish_with(move |_| CancellableResult::Completed(model));
            }
            LoadModelChannelMessage::Error { error } => {
                self.fail(LmStudioError::Channel { title: error.title });
            }
            LoadModelChannelMessage::Unknown => {}
        }
    }

    fn fail(&mut self, error: LmStudioError) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        log::error!("Failed to load model {}: {error}", self.full_path);
        self.sink.fail(error);
    }
}

impl<H: DomainHandle> ChannelHandler for LoadModelChannelHandler<H> {
    fn handle(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Message(message) => {
                match decode_channel_message::<LoadModelChannelMessage>("loadModel", message) {
                    Ok(message) => self.on_message(message),
                    Err(e) => self.fail(e.into()),
                }
            }
            ChannelEvent::Error(error) => self.fail(error),
            ChannelEvent::Closed => self.fail(LmStudioError::ChannelClosed),
        }
    }
}

/// Model operations for one domain, bound to that domain's port.
pub struct ModelNamespace<D> {
    port: ClientPort,
    _domain: PhantomData<D>,
}

impl<D> std::fmt::Debug for ModelNamespace<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelNamespace")
            .field("port", &self.port)
            .finish()
    }
}

impl<D: ModelDomain> ModelNamespace<D> {
    pub(crate) fn new(port: ClientPort) -> Self {
        Self {
            port,
            _domain: PhantomData,
        }
    }

    pub(crate) fn port(&self) -> &ClientPort {
        &self.port
    }

    /// Loads the model at `path` (`<publisher>/<repo>[/<file>]`) and blocks until it is ready.
    pub fn load(
        &self,
        path: &str,
        opts: LoadModelOpts<D::LoadConfig>,
    ) -> Result<CancellableResult<SpecificModel<D::Handle>>, LmStudioError> {
        self.start_load(path, opts)?.wait()
    }

    /// Starts loading the model at `path` without waiting for it.
    pub fn start_load(
        &self,
        path: &str,
        opts: LoadModelOpts<D::LoadConfig>,
    ) -> Result<LoadingModel<D::Handle>, LmStudioError> {
        let LoadModelOpts {
            identifier,
            config,
            signal,
            verbose,
            on_progress,
        } = opts;

        let sink = Arc::new(LoadSink::new());
        let finished = Arc::new(AtomicBool::new(false));
        let handler = LoadModelChannelHandler::<D::Handle> {
            port: self.port.downgrade(),
            path: path.to_string(),
            full_path: path.to_string(),
            started: Instant::now(),
            sink: sink.clone(),
            finished: finished.clone(),
            verbose,
            on_progress,
        };

        let request = LoadModelRequest {
            path: path.to_string(),
            identifier,
            load_config_stack: KvConfigStack::single(
                KvConfigLayerName::ApiOverride,
                config.to_kv_config(),
            ),
        };
        let parameter =
            serde_json::to_value(&request).map_err(|e| LmStudioError::Protocol(e.to_string()))?;
        let channel_id = self.port.create_channel("loadModel", Some(parameter), handler)?;

        let sender = ChannelSender::new(self.port.downgrade(), channel_id);
        let cancel_load: Arc<dyn Fn() + Send + Sync> = {
            let sink = sink.clone();
            Arc::new(move || {
                if finished.swap(true, Ordering::SeqCst) {
                    return;
                }
                log::info!("Cancelling model load on channel {}", sender.channel_id());
                sink.finish_with(|_| CancellableResult::Cancelled);
                if let Err(e) = sender.send(json!({"type": "cancel"})) {
                    log::debug!("Failed to send cancel: {e}");
                }
            })
        };

        let (cancel_event, cancel) = BufferedEvent::create();
        let on_cancel = cancel_load.clone();
        cancel_event.subscribe(move || on_cancel());
        if let Some(signal) = signal {
            signal.on_abort(move || cancel_load());
        }

        Ok(LoadingModel { sink, cancel })
    }

    /// Unloads the model with the given identifier.
    pub fn unload(&self, identifier: &str) -> Result<(), LmStudioError> {
        self.port
            .call_rpc("unloadModel", Some(json!({ "identifier": identifier })))?;
        Ok(())
    }

    pub fn list_loaded(&self) -> Result<Vec<ModelDescriptor>, LmStudioError> {
        self.port.call_rpc_as("listLoaded", None)
    }

    /// Pins the model currently matching `query`. Fails if none is loaded.
    pub fn get(
        &self,
        query: impl Into<ModelQuery>,
    ) -> Result<SpecificModel<D::Handle>, LmStudioError> {
        let query = query.into().with_domain(D::DOMAIN);
        let result = self.port.call_rpc(
            "getModelInfo",
            Some(json!({
                "specifier": ModelSpecifier::query(query.clone()),
                "throwIfNotFound": true,
            })),
        )?;
        if result.is_null() {
            return Err(LmStudioError::ModelNotFound(format!("{query:?}")));
        }
        let info: LoadedModelInfo = decode_result("getModelInfo", result)?;
        Ok(SpecificModel::new(
            self.port.downgrade(),
            info.instance_reference,
            info.descriptor,
        ))
    }

    /// A handle to whichever model matches `query` at each call.
    pub fn create_dynamic_handle(
        &self,
        query: impl Into<ModelQuery>,
    ) -> Result<D::Handle, LmStudioError> {
        let query = query.into();
        if let Some(path) = &query.path {
            if path.contains('\\') {
                log::error!("Model path should not contain backslashes, received: {path}");
                return Err(LmStudioError::InvalidArgument(
                    "model path should not contain backslashes".to_string(),
                ));
            }
        }
        Ok(self.handle_for(ModelSpecifier::query(query)))
    }

    pub fn create_dynamic_handle_from_instance_reference(
        &self,
        instance_reference: impl Into<String>,
    ) -> D::Handle {
        self.handle_for(ModelSpecifier::instance_reference(instance_reference))
    }

    fn handle_for(&self, specifier: ModelSpecifier) -> D::Handle {
        D::Handle::from_dynamic(DynamicHandle::new(self.port.downgrade(), specifier))
    }

    /// Any loaded model of this domain.
    pub fn unstable_get_any(&self) -> Result<SpecificModel<D::Handle>, LmStudioError> {
        self.get(ModelQuery::any())
    }

    /// Returns the model loaded under `identifier`, loading `path` under that identifier otherwise.
    pub fn unstable_get_or_load(
        &self,
        identifier: &str,
        path: &str,
        opts: LoadModelOpts<D::LoadConfig>,
    ) -> Result<CancellableResult<SpecificModel<D::Handle>>, LmStudioError> {
        match self.get(identifier) {
            Ok(model) => Ok(CancellableResult::Completed(model)),
            Err(e) => {
                log::debug!("Model '{identifier}' not available ({e}), loading '{path}'");
                self.load(path, opts.with_identifier(identifier))
            }
        }
    }
}
