// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Language client session engine.
//!
//! A [`LanguageClient`] owns one reconnecting transport, keeps the open
//! documents in sync with whatever server is on the other end, and gates
//! requests on the negotiated capabilities. Work issued before the
//! handshake completes is queued and replayed in order.

use lsp_types::{
    CodeAction, CodeActionContext, CodeActionOrCommand, CodeActionParams, CodeLens,
    CodeLensParams, CompletionContext, CompletionItem, CompletionParams, CompletionResponse,
    Diagnostic, DocumentFormattingParams, DocumentHighlight, DocumentHighlightParams,
    DocumentRangeFormattingParams, DocumentSymbolParams, DocumentSymbolResponse,
    FormattingOptions, GotoDefinitionParams, GotoDefinitionResponse, Hover, HoverParams,
    InitializeResult, Location, PartialResultParams, Position, Range, ReferenceContext,
    ReferenceParams, RenameParams, ServerCapabilities, ServerInfo, SignatureHelp,
    SignatureHelpParams, TextDocumentContentChangeEvent, TextDocumentIdentifier,
    TextDocumentPositionParams, TextEdit, Uri, WorkDoneProgressParams, WorkspaceEdit,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::capabilities::{Capability, CapabilityRegistry};
use super::dispatch::Dispatcher;
use super::handlers;
use super::options::{Features, SessionOptions, initialize_params};
use super::protocol::Incoming;
use super::queue::{PendingAction, PendingQueue};
use super::rpc::{RpcConnection, await_response};
use super::sink::{MessageSink, TracingSink};
use super::state::{ProgressTracker, SessionState};
use crate::document::{Document, DocumentStore};
use crate::error::{DocumentError, SessionError, SessionResult};
use crate::transport::{CloseEvent, CloseKind, Connector, ReconnectingTransport, TransportEvent};

/// Mutable session state, guarded by one lock.
pub(crate) struct SessionCore {
    pub(crate) name: String,
    pub(crate) state: SessionState,
    /// Transport generation the session is bound to.
    pub(crate) generation: Option<u64>,
    pub(crate) documents: DocumentStore,
    pub(crate) capabilities: CapabilityRegistry,
    pub(crate) queue: PendingQueue,
    pub(crate) diagnostics: HashMap<String, Vec<Diagnostic>>,
    pub(crate) progress: ProgressTracker,
    pub(crate) settings: Value,
    pub(crate) server_info: Option<ServerInfo>,
    pub(crate) last_connection_error: Option<String>,
    pub(crate) fault: Option<String>,
    /// Set by an idle close: the next queued mutation reconnects.
    pub(crate) reconnect_on_demand: bool,
    pub(crate) features: Features,
    pub(crate) sink: Arc<dyn MessageSink>,
    state_tx: watch::Sender<SessionState>,
}

impl SessionCore {
    fn set_state(&mut self, state: SessionState) {
        if self.state == SessionState::Disposed || self.state == state {
            return;
        }
        debug!("[{}] {} -> {}", self.name, self.state, state);
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.state == SessionState::Disposed {
            return Err(SessionError::Disposed);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> SessionResult<()> {
        self.ensure_open()?;
        if let Some(fault) = &self.fault {
            return Err(SessionError::ProtocolFault(fault.clone()));
        }
        Ok(())
    }

    /// The generation to send on, if the session is ready.
    const fn ready_generation(&self) -> Option<u64> {
        match (self.state, self.generation) {
            (SessionState::Ready, Some(generation)) => Some(generation),
            _ => None,
        }
    }
}

/// Static data the handshake task needs.
struct Handshake {
    params: Value,
    timeout: Duration,
}

/// Which feature toggle gates an operation.
type FeatureGate = fn(&Features) -> bool;

/// A session with one language server.
pub struct LanguageClient {
    name: String,
    modes: Vec<String>,
    core: Arc<Mutex<SessionCore>>,
    rpc: Arc<RpcConnection>,
    state_rx: watch::Receiver<SessionState>,
    shutdown_timeout: Duration,
    pump: std::sync::Mutex<Option<JoinHandle<SessionResult<()>>>>,
}

impl std::fmt::Debug for LanguageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageClient")
            .field("name", &self.name)
            .field("modes", &self.modes)
            .field("state", &*self.state_rx.borrow())
            .finish_non_exhaustive()
    }
}

impl LanguageClient {
    /// Starts a session that reports server messages through `tracing`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(options: SessionOptions, connector: Arc<dyn Connector>) -> Self {
        let sink = Arc::new(TracingSink::new(options.name.clone()));
        Self::start_with_sink(options, connector, sink)
    }

    /// Starts a session with a custom message sink.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_with_sink(
        options: SessionOptions,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        let (transport, events) = ReconnectingTransport::spawn(connector, options.policy);
        let rpc = Arc::new(RpcConnection::new(transport));
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);

        let handshake = Arc::new(Handshake {
            params: initialize_params(&options),
            timeout: options.handshake_timeout,
        });

        let mut core = SessionCore {
            name: options.name.clone(),
            state: SessionState::Disconnected,
            generation: None,
            documents: DocumentStore::new(),
            capabilities: CapabilityRegistry::new(),
            queue: PendingQueue::new(),
            diagnostics: HashMap::new(),
            progress: ProgressTracker::new(),
            settings: options.settings,
            server_info: None,
            last_connection_error: None,
            fault: None,
            reconnect_on_demand: false,
            features: options.features,
            sink,
            state_tx,
        };
        core.set_state(SessionState::Connecting);
        let core = Arc::new(Mutex::new(core));

        let pump = tokio::spawn(pump(events, Arc::clone(&core), Arc::clone(&rpc), handshake));
        rpc.transport().connect();
        info!("[{}] Starting session for {:?}", options.name, options.modes);

        Self {
            name: options.name,
            modes: options.modes,
            core,
            rpc,
            state_rx,
            shutdown_timeout: options.shutdown_timeout,
            pump: std::sync::Mutex::new(Some(pump)),
        }
    }

    /// Service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Modes this session serves.
    #[must_use]
    pub fn modes(&self) -> &[String] {
        &self.modes
    }

    /// Returns true if the session serves `mode`.
    #[must_use]
    pub fn serves(&self, mode: &str) -> bool {
        self.modes.iter().any(|m| m == mode)
    }

    // ---- observation ----

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// A receiver that observes every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Waits until the session reaches `target`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Disposed`] if the session is disposed first.
    pub async fn wait_for_state(&self, target: SessionState) -> SessionResult<()> {
        let mut rx = self.state_rx.clone();
        let reached = rx
            .wait_for(|s| *s == target || s.is_terminal())
            .await
            .map_err(|_| SessionError::Disposed)?;
        if *reached == target {
            Ok(())
        } else {
            Err(SessionError::Disposed)
        }
    }

    /// Returns true if the server supports `capability`.
    pub async fn supports(&self, capability: Capability) -> bool {
        self.core.lock().await.capabilities.supports(capability)
    }

    /// Every capability the server currently supports.
    pub async fn supported_capabilities(&self) -> Vec<Capability> {
        self.core.lock().await.capabilities.supported()
    }

    /// Static capabilities from the last handshake.
    pub async fn server_capabilities(&self) -> ServerCapabilities {
        self.core
            .lock()
            .await
            .capabilities
            .server_capabilities()
            .clone()
    }

    /// Server name and version from the last handshake.
    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.core.lock().await.server_info.clone()
    }

    /// Why the last connection attempt or handshake failed.
    pub async fn last_connection_error(&self) -> Option<String> {
        self.core.lock().await.last_connection_error.clone()
    }

    /// The protocol fault that ended the session, if any.
    pub async fn fault(&self) -> Option<String> {
        self.core.lock().await.fault.clone()
    }

    /// Actions waiting for the next handshake.
    pub async fn pending_actions(&self) -> Vec<PendingAction> {
        self.core.lock().await.queue.snapshot()
    }

    /// Current settings object.
    pub async fn settings(&self) -> Value {
        self.core.lock().await.settings.clone()
    }

    /// Returns true while the server reports work in progress.
    pub async fn is_busy(&self) -> bool {
        self.core.lock().await.progress.is_busy()
    }

    /// Snapshot of an open document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::NotFound`] if the document is not open.
    pub async fn document(&self, uri: &Uri) -> SessionResult<Document> {
        Ok(self.core.lock().await.documents.get(uri)?.clone())
    }

    /// Latest diagnostics published for `uri`.
    ///
    /// Empty when none were published or diagnostics are disabled.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Disposed`] after disposal.
    pub async fn validation(&self, uri: &Uri) -> SessionResult<Vec<Diagnostic>> {
        let core = self.core.lock().await;
        core.ensure_open()?;
        if !core.features.diagnostics {
            return Ok(Vec::new());
        }
        Ok(core
            .diagnostics
            .get(uri.as_str())
            .cloned()
            .unwrap_or_default())
    }

    // ---- lifecycle ----

    /// Drops the current connection and connects again with a fresh retry
    /// budget.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Disposed`] after disposal and
    /// [`SessionError::ProtocolFault`] after a fault.
    pub async fn reconnect(&self) -> SessionResult<()> {
        let mut core = self.core.lock().await;
        core.ensure_writable()?;
        core.reconnect_on_demand = false;
        // A live connection reports its own close, which moves the state.
        if core.state == SessionState::Disconnected {
            core.set_state(SessionState::Connecting);
        }
        self.rpc.transport().reconnect();
        Ok(())
    }

    /// Shuts the server down and stops the session.
    ///
    /// A ready server gets `shutdown` (bounded) and `exit` first.
    /// Calling this more than once is harmless.
    pub async fn dispose(&self) {
        let shutdown = {
            let mut core = self.core.lock().await;
            if core.state == SessionState::Disposed {
                return;
            }
            let shutdown = core.ready_generation().and_then(|generation| {
                self.rpc
                    .request_on(generation, "shutdown", Value::Null)
                    .ok()
                    .map(|rx| (generation, rx))
            });
            core.set_state(SessionState::Disposed);
            core.generation = None;
            shutdown
        };

        if let Some((generation, rx)) = shutdown {
            match tokio::time::timeout(self.shutdown_timeout, await_response::<Value>(rx)).await {
                Ok(Ok(_)) => debug!("[{}] Server acknowledged shutdown", self.name),
                Ok(Err(e)) => warn!("[{}] Shutdown request failed: {}", self.name, e),
                Err(_) => warn!(
                    "[{}] Server did not answer shutdown within {:?}",
                    self.name, self.shutdown_timeout
                ),
            }
            if let Err(e) = self.rpc.notify_on(generation, "exit", Value::Null) {
                warn!("[{}] Failed to send exit: {}", self.name, e);
            }
        }

        self.rpc.transport().shutdown();
        self.rpc.fail_pending();
        info!("[{}] Session disposed", self.name);
    }

    /// Waits for the dispatch task to finish.
    ///
    /// The task ends after disposal, or early on a protocol fault.
    ///
    /// # Errors
    ///
    /// Returns the [`SessionError::ProtocolFault`] that ended the session.
    pub async fn join(&self) -> SessionResult<()> {
        let handle = self
            .pump
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => handle.await.map_err(|e| {
                SessionError::protocol_fault(format!("dispatch task failed: {e}"))
            })?,
            None => Ok(()),
        }
    }

    // ---- document synchronization ----

    /// Sends an action now if ready, otherwise queues it.
    fn dispatch_action(&self, core: &mut SessionCore, action: PendingAction) -> SessionResult<()> {
        if let Some(generation) = core.ready_generation() {
            let params = action.params(core.capabilities.sync_kind())?;
            return self.rpc.notify_on(generation, action.method(), params);
        }

        trace!("[{}] Queueing {}", core.name, action.method());
        core.queue.push(action);
        self.wake_if_idle(core);
        Ok(())
    }

    /// Reconnects a session that was closed for inactivity.
    fn wake_if_idle(&self, core: &mut SessionCore) {
        if core.reconnect_on_demand {
            core.reconnect_on_demand = false;
            debug!("[{}] Reconnecting on demand", core.name);
            core.set_state(SessionState::Connecting);
            self.rpc.transport().connect();
        }
    }

    /// Opens a document at version 1 and announces it.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::AlreadyOpen`] if the document is open,
    /// [`SessionError::ProtocolFault`] after a fault and
    /// [`SessionError::Disposed`] after disposal.
    pub async fn open_document(
        &self,
        uri: Uri,
        language_id: impl Into<String>,
        text: impl Into<String>,
    ) -> SessionResult<()> {
        let mut core = self.core.lock().await;
        core.ensure_writable()?;
        let item = core.documents.open(uri, language_id, text)?.item();
        self.dispatch_action(&mut core, PendingAction::OpenDoc { item })
    }

    /// Replaces a document's text, bumping its version.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::NotOpen`] if the document is not open,
    /// [`DocumentError::VersionOverflow`] if its version cannot advance,
    /// [`SessionError::ProtocolFault`] after a fault and
    /// [`SessionError::Disposed`] after disposal.
    pub async fn set_document_text(&self, uri: &Uri, text: impl Into<String>) -> SessionResult<i32> {
        let text = text.into();
        let mut core = self.core.lock().await;
        core.ensure_writable()?;
        let version = core.documents.apply_full_text(uri, text.clone())?;
        let action = PendingAction::ChangeDoc {
            uri: uri.clone(),
            version,
            edits: vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: text.clone(),
            }],
            text,
        };
        self.dispatch_action(&mut core, action)?;
        Ok(version)
    }

    /// Applies ordered edits and moves the document to `version`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::NotOpen`] if the document is not open,
    /// [`DocumentError::StaleVersion`] if `version` does not advance it,
    /// [`SessionError::ProtocolFault`] after a fault and
    /// [`SessionError::Disposed`] after disposal.
    pub async fn apply_deltas(
        &self,
        uri: &Uri,
        version: i32,
        edits: Vec<TextDocumentContentChangeEvent>,
    ) -> SessionResult<()> {
        let mut core = self.core.lock().await;
        core.ensure_writable()?;
        let text = core.documents.apply_deltas(uri, version, &edits)?.text.clone();
        let action = PendingAction::ChangeDoc {
            uri: uri.clone(),
            version,
            edits,
            text,
        };
        self.dispatch_action(&mut core, action)
    }

    /// Closes a document. Closing a document that is not open does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ProtocolFault`] after a fault and
    /// [`SessionError::Disposed`] after disposal.
    pub async fn close_document(&self, uri: &Uri) -> SessionResult<()> {
        let mut core = self.core.lock().await;
        core.ensure_writable()?;
        if !core.documents.close(uri) {
            return Ok(());
        }
        core.diagnostics.remove(uri.as_str());
        self.dispatch_action(&mut core, PendingAction::CloseDoc { uri: uri.clone() })
    }

    /// Replaces the settings object and pushes it to the server.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ProtocolFault`] after a fault and
    /// [`SessionError::Disposed`] after disposal.
    pub async fn set_global_options(&self, settings: Value) -> SessionResult<()> {
        let mut core = self.core.lock().await;
        core.ensure_writable()?;
        core.settings = settings.clone();
        self.dispatch_action(&mut core, PendingAction::SetConfig { settings })
    }

    // ---- capability-gated requests ----

    /// Sends a request if every gate passes; otherwise returns `None`.
    ///
    /// A discarded request or a server error also yields `None`. A request
    /// made while idle-closed still yields `None` but starts a reconnect.
    async fn query<P: Serialize, R: DeserializeOwned>(
        &self,
        target: Option<&Uri>,
        feature: Option<FeatureGate>,
        capability: Capability,
        method: &str,
        params: P,
    ) -> SessionResult<Option<R>> {
        let rx = {
            let mut core = self.core.lock().await;
            core.ensure_open()?;
            if let Some(uri) = target
                && !core.documents.contains(uri)
            {
                return Err(DocumentError::NotOpen(uri.as_str().to_string()).into());
            }
            if feature.is_some_and(|enabled| !enabled(&core.features)) {
                trace!("[{}] {} disabled by feature toggle", self.name, method);
                return Ok(None);
            }
            let Some(generation) = core.ready_generation() else {
                trace!("[{}] {} skipped: session is {}", self.name, method, core.state);
                self.wake_if_idle(&mut core);
                return Ok(None);
            };
            if !core.capabilities.supports(capability) {
                trace!("[{}] {} skipped: server lacks {}", self.name, method, capability);
                return Ok(None);
            }
            self.rpc
                .request_on(generation, method, serde_json::to_value(params)?)?
        };

        match await_response::<Option<R>>(rx).await {
            Ok(result) => Ok(result),
            Err(SessionError::ConnectionLost) => {
                debug!("[{}] {} discarded by reconnect", self.name, method);
                Ok(None)
            }
            Err(SessionError::Rpc { code, message }) => {
                warn!("[{}] {} failed ({}): {}", self.name, method, code, message);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Hover information at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::NotOpen`] if the document is not open,
    /// [`SessionError::Json`] for a malformed response and
    /// [`SessionError::Disposed`] after disposal.
    pub async fn hover(&self, uri: &Uri, position: Position) -> SessionResult<Option<Hover>> {
        let params = HoverParams {
            text_document_position_params: position_params(uri, position),
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        self.query(
            Some(uri),
            Some(|f| f.hover),
            Capability::Hover,
            "textDocument/hover",
            params,
        )
        .await
    }

    /// Completion candidates at `position`.
    ///
    /// # Errors
    ///
    /// See [`LanguageClient::hover`].
    pub async fn completion(
        &self,
        uri: &Uri,
        position: Position,
        context: Option<CompletionContext>,
    ) -> SessionResult<Option<CompletionResponse>> {
        let params = CompletionParams {
            text_document_position: position_params(uri, position),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            context,
        };
        self.query(
            Some(uri),
            Some(|f| f.completion),
            Capability::Completion,
            "textDocument/completion",
            params,
        )
        .await
    }

    /// Fills in the details of a completion item.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Json`] for a malformed response and
    /// [`SessionError::Disposed`] after disposal.
    pub async fn completion_resolve(
        &self,
        item: CompletionItem,
    ) -> SessionResult<Option<CompletionItem>> {
        self.query(
            None,
            Some(|f| f.completion_resolve),
            Capability::CompletionResolve,
            "completionItem/resolve",
            item,
        )
        .await
    }

    /// Signature help at `position`.
    ///
    /// # Errors
    ///
    /// See [`LanguageClient::hover`].
    pub async fn signature_help(
        &self,
        uri: &Uri,
        position: Position,
    ) -> SessionResult<Option<SignatureHelp>> {
        let params = SignatureHelpParams {
            context: None,
            text_document_position_params: position_params(uri, position),
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        self.query(
            Some(uri),
            Some(|f| f.signature_help),
            Capability::SignatureHelp,
            "textDocument/signatureHelp",
            params,
        )
        .await
    }

    /// Occurrences of the symbol at `position`.
    ///
    /// # Errors
    ///
    /// See [`LanguageClient::hover`].
    pub async fn document_highlight(
        &self,
        uri: &Uri,
        position: Position,
    ) -> SessionResult<Vec<DocumentHighlight>> {
        let params = DocumentHighlightParams {
            text_document_position_params: position_params(uri, position),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        Ok(self
            .query::<_, Vec<DocumentHighlight>>(
                Some(uri),
                Some(|f| f.document_highlight),
                Capability::DocumentHighlight,
                "textDocument/documentHighlight",
                params,
            )
            .await?
            .unwrap_or_default())
    }

    async fn goto(
        &self,
        uri: &Uri,
        position: Position,
        capability: Capability,
        method: &str,
    ) -> SessionResult<Option<GotoDefinitionResponse>> {
        let params = GotoDefinitionParams {
            text_document_position_params: position_params(uri, position),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        self.query(Some(uri), None, capability, method, params).await
    }

    /// Definition of the symbol at `position`.
    ///
    /// # Errors
    ///
    /// See [`LanguageClient::hover`].
    pub async fn definition(
        &self,
        uri: &Uri,
        position: Position,
    ) -> SessionResult<Option<GotoDefinitionResponse>> {
        self.goto(uri, position, Capability::Definition, "textDocument/definition")
            .await
    }

    /// Declaration of the symbol at `position`.
    ///
    /// # Errors
    ///
    /// See [`LanguageClient::hover`].
    pub async fn declaration(
        &self,
        uri: &Uri,
        position: Position,
    ) -> SessionResult<Option<GotoDefinitionResponse>> {
        self.goto(uri, position, Capability::Declaration, "textDocument/declaration")
            .await
    }

    /// Type definition of the symbol at `position`.
    ///
    /// # Errors
    ///
    /// See [`LanguageClient::hover`].
    pub async fn type_definition(
        &self,
        uri: &Uri,
        position: Position,
    ) -> SessionResult<Option<GotoDefinitionResponse>> {
        self.goto(
            uri,
            position,
            Capability::TypeDefinition,
            "textDocument/typeDefinition",
        )
        .await
    }

    /// Implementations of the symbol at `position`.
    ///
    /// # Errors
    ///
    /// See [`LanguageClient::hover`].
    pub async fn implementation(
        &self,
        uri: &Uri,
        position: Position,
    ) -> SessionResult<Option<GotoDefinitionResponse>> {
        self.goto(
            uri,
            position,
            Capability::Implementation,
            "textDocument/implementation",
        )
        .await
    }

    /// References to the symbol at `position`.
    ///
    /// # Errors
    ///
    /// See [`LanguageClient::hover`].
    pub async fn references(
        &self,
        uri: &Uri,
        position: Position,
        include_declaration: bool,
    ) -> SessionResult<Vec<Location>> {
        let params = ReferenceParams {
            text_document_position: position_params(uri, position),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            context: ReferenceContext {
                include_declaration,
            },
        };
        Ok(self
            .query::<_, Vec<Location>>(
                Some(uri),
                None,
                Capability::References,
                "textDocument/references",
                params,
            )
            .await?
            .unwrap_or_default())
    }

    /// Workspace edit renaming the symbol at `position`.
    ///
    /// # Errors
    ///
    /// See [`LanguageClient::hover`].
    pub async fn rename(
        &self,
        uri: &Uri,
        position: Position,
        new_name: impl Into<String>,
    ) -> SessionResult<Option<WorkspaceEdit>> {
        let params = RenameParams {
            text_document_position: position_params(uri, position),
            new_name: new_name.into(),
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        self.query(
            Some(uri),
            None,
            Capability::Rename,
            "textDocument/rename",
            params,
        )
        .await
    }

    /// Code actions for `range`.
    ///
    /// # Errors
    ///
    /// See [`LanguageClient::hover`].
    pub async fn code_action(
        &self,
        uri: &Uri,
        range: Range,
        context: CodeActionContext,
    ) -> SessionResult<Vec<CodeActionOrCommand>> {
        let params = CodeActionParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            range,
            context,
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        Ok(self
            .query::<_, Vec<CodeActionOrCommand>>(
                Some(uri),
                None,
                Capability::CodeAction,
                "textDocument/codeAction",
                params,
            )
            .await?
            .unwrap_or_default())
    }

    /// Fills in the edit of a code action.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Json`] for a malformed response and
    /// [`SessionError::Disposed`] after disposal.
    pub async fn code_action_resolve(&self, action: CodeAction) -> SessionResult<Option<CodeAction>> {
        self.query(
            None,
            None,
            Capability::CodeActionResolve,
            "codeAction/resolve",
            action,
        )
        .await
    }

    /// Code lenses for a document.
    ///
    /// # Errors
    ///
    /// See [`LanguageClient::hover`].
    pub async fn code_lens(&self, uri: &Uri) -> SessionResult<Vec<CodeLens>> {
        let params = CodeLensParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        Ok(self
            .query::<_, Vec<CodeLens>>(
                Some(uri),
                None,
                Capability::CodeLens,
                "textDocument/codeLens",
                params,
            )
            .await?
            .unwrap_or_default())
    }

    /// Symbols defined in a document.
    ///
    /// # Errors
    ///
    /// See [`LanguageClient::hover`].
    pub async fn document_symbol(&self, uri: &Uri) -> SessionResult<Option<DocumentSymbolResponse>> {
        let params = DocumentSymbolParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        self.query(
            Some(uri),
            None,
            Capability::DocumentSymbol,
            "textDocument/documentSymbol",
            params,
        )
        .await
    }

    /// Formats a document.
    ///
    /// Uses whole-document formatting when the server offers it, and
    /// range formatting over `range` when that is all it offers.
    ///
    /// # Errors
    ///
    /// See [`LanguageClient::hover`].
    pub async fn format(
        &self,
        uri: &Uri,
        range: Range,
        options: FormattingOptions,
    ) -> SessionResult<Vec<TextEdit>> {
        let (whole, ranged) = {
            let core = self.core.lock().await;
            (
                core.capabilities.supports(Capability::DocumentFormatting),
                core.capabilities
                    .supports(Capability::DocumentRangeFormatting),
            )
        };
        if ranged && !whole {
            return self.format_range(uri, range, options).await;
        }

        let params = DocumentFormattingParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            options,
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        Ok(self
            .query::<_, Vec<TextEdit>>(
                Some(uri),
                Some(|f| f.format),
                Capability::DocumentFormatting,
                "textDocument/formatting",
                params,
            )
            .await?
            .unwrap_or_default())
    }

    /// Formats `range` of a document.
    ///
    /// # Errors
    ///
    /// See [`LanguageClient::hover`].
    pub async fn format_range(
        &self,
        uri: &Uri,
        range: Range,
        options: FormattingOptions,
    ) -> SessionResult<Vec<TextEdit>> {
        let params = DocumentRangeFormattingParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            range,
            options,
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        Ok(self
            .query::<_, Vec<TextEdit>>(
                Some(uri),
                Some(|f| f.format),
                Capability::DocumentRangeFormatting,
                "textDocument/rangeFormatting",
                params,
            )
            .await?
            .unwrap_or_default())
    }
}

fn position_params(uri: &Uri, position: Position) -> TextDocumentPositionParams {
    TextDocumentPositionParams {
        text_document: TextDocumentIdentifier { uri: uri.clone() },
        position,
    }
}

// ---- dispatch task ----

/// Consumes transport events in order until the transport stops or the
/// server breaks the protocol.
async fn pump(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    core: Arc<Mutex<SessionCore>>,
    rpc: Arc<RpcConnection>,
    handshake: Arc<Handshake>,
) -> SessionResult<()> {
    let dispatcher = handlers::dispatcher();

    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Open { generation } => {
                let mut guard = core.lock().await;
                if guard.state == SessionState::Disposed {
                    continue;
                }
                guard.generation = Some(generation);
                guard.reconnect_on_demand = false;
                guard.set_state(SessionState::AwaitingHandshake);
                drop(guard);

                tokio::spawn(run_handshake(
                    generation,
                    Arc::clone(&core),
                    Arc::clone(&rpc),
                    Arc::clone(&handshake),
                ));
            }
            TransportEvent::Message(body) => {
                if let Err(reason) = handle_message(&body, &core, &rpc, &dispatcher).await {
                    return Err(fault(&core, &rpc, reason).await);
                }
            }
            TransportEvent::Error(reason) => {
                let mut guard = core.lock().await;
                debug!("[{}] Connection attempt failed: {}", guard.name, reason);
                guard.last_connection_error = Some(reason);
            }
            TransportEvent::Fault(reason) => {
                return Err(fault(&core, &rpc, reason).await);
            }
            TransportEvent::Close(close) => handle_close(&core, &rpc, close).await,
        }
    }

    debug!("Transport event stream ended");
    Ok(())
}

async fn handle_message(
    body: &str,
    core: &Mutex<SessionCore>,
    rpc: &RpcConnection,
    dispatcher: &Dispatcher<SessionCore>,
) -> Result<(), String> {
    let incoming = Incoming::parse(body).map_err(|e| format!("{e:#}"))?;

    match incoming {
        Incoming::Response(response) => {
            rpc.route_response(response);
        }
        Incoming::Notification(notification) => {
            let mut guard = core.lock().await;
            if guard.generation.is_none() {
                trace!("Dropping {} from a closed connection", notification.method);
                return Ok(());
            }
            dispatcher.dispatch_notification(&mut guard, notification);
        }
        Incoming::Request(request) => {
            let mut guard = core.lock().await;
            let Some(generation) = guard.generation else {
                trace!("Dropping {} from a closed connection", request.method);
                return Ok(());
            };
            let response = dispatcher.dispatch_request(&mut guard, request);
            if let Err(e) = rpc.respond_on(generation, &response) {
                warn!("[{}] Failed to answer server request: {}", guard.name, e);
            }
        }
    }
    Ok(())
}

async fn handle_close(core: &Mutex<SessionCore>, rpc: &RpcConnection, close: CloseEvent) {
    let mut guard = core.lock().await;
    let was_ready = guard.state == SessionState::Ready;

    rpc.fail_pending();
    guard.progress.clear();
    guard.generation = None;
    if guard.state == SessionState::Disposed {
        return;
    }

    if was_ready {
        let documents = guard.documents.documents();
        guard.queue.prepend_snapshots(&documents);
    }

    match close.kind {
        CloseKind::Idle => guard.reconnect_on_demand = true,
        CloseKind::Failed | CloseKind::Lost => {
            guard.last_connection_error = Some(close.reason.clone());
        }
        CloseKind::Graceful | CloseKind::Faulted | CloseKind::Reconnecting => {}
    }

    info!(
        "[{}] Connection closed ({:?}): {}",
        guard.name, close.kind, close.reason
    );
    guard.set_state(if close.will_retry {
        SessionState::Connecting
    } else {
        SessionState::Disconnected
    });
}

/// Records a protocol fault and tears the connection down.
async fn fault(core: &Mutex<SessionCore>, rpc: &RpcConnection, reason: String) -> SessionError {
    let mut guard = core.lock().await;
    error!("[{}] Protocol fault: {}", guard.name, reason);

    guard.fault = Some(reason.clone());
    guard.generation = None;
    guard.progress.clear();
    rpc.fail_pending();
    rpc.transport().close();
    guard.set_state(SessionState::Disconnected);
    SessionError::ProtocolFault(reason)
}

async fn run_handshake(
    generation: u64,
    core: Arc<Mutex<SessionCore>>,
    rpc: Arc<RpcConnection>,
    handshake: Arc<Handshake>,
) {
    let rx = {
        let mut guard = core.lock().await;
        if guard.generation != Some(generation) {
            return;
        }
        match rpc.request_on(generation, "initialize", handshake.params.clone()) {
            Ok(rx) => rx,
            Err(e) => {
                guard.last_connection_error = Some(e.to_string());
                return;
            }
        }
    };

    let outcome =
        tokio::time::timeout(handshake.timeout, await_response::<InitializeResult>(rx)).await;

    let mut guard = core.lock().await;
    if guard.generation != Some(generation) || guard.state != SessionState::AwaitingHandshake {
        trace!("Handshake for generation {} superseded", generation);
        return;
    }

    let failure = match outcome {
        Ok(Ok(result)) => match complete_handshake(&mut guard, &rpc, generation, result) {
            Ok(()) => return,
            Err(e) => format!("handshake failed: {e}"),
        },
        Ok(Err(SessionError::ConnectionLost)) => return,
        Ok(Err(e)) => format!("initialize failed: {e}"),
        Err(_) => format!("initialize timed out after {:?}", handshake.timeout),
    };

    let error = SessionError::unavailable(failure);
    warn!("[{}] {}", guard.name, error);
    guard.last_connection_error = Some(error.to_string());
    guard.generation = None;
    rpc.fail_pending();
    rpc.transport().close();
}

fn complete_handshake(
    core: &mut SessionCore,
    rpc: &RpcConnection,
    generation: u64,
    result: InitializeResult,
) -> SessionResult<()> {
    core.capabilities.set_all(result.capabilities);
    if let Some(info) = &result.server_info {
        info!(
            "[{}] Connected to {} {}",
            core.name,
            info.name,
            info.version.as_deref().unwrap_or("")
        );
    }
    core.server_info = result.server_info;

    rpc.notify_on(generation, "initialized", json!({}))?;
    rpc.notify_on(
        generation,
        "workspace/didChangeConfiguration",
        json!({ "settings": core.settings }),
    )?;

    let sync_kind = core.capabilities.sync_kind();
    let actions = core.queue.drain();
    if !actions.is_empty() {
        debug!("[{}] Replaying {} queued action(s)", core.name, actions.len());
    }
    for action in actions {
        rpc.notify_on(generation, action.method(), action.params(sync_kind)?)?;
    }

    core.last_connection_error = None;
    core.set_state(SessionState::Ready);
    Ok(())
}
