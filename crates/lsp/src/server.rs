use crate::backends::{BackendRegistry, Finding};
use crate::config::Config;
use crate::diagnostics::{self, DiagnosticsPublisher};
use crate::dispatcher::NotificationDispatcher;
use crate::dispatcher::RequestDispatcher;
use crate::document::DocumentStore;
use crate::handlers;
use crate::lsp_ext;
use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};
use lsp_types::notification::Notification;
use std::sync::Arc;
use std::time::Instant;

pub(crate) type RequestHandler = fn(&mut ServerState, lsp_server::Response);

/// Work delivered back to the loop by background jobs and timers.
#[derive(Debug)]
pub(crate) enum Task {
    Response(lsp_server::Response),
    Notify(lsp_server::Notification),
    /// A completed analysis cycle, still subject to the publish-time
    /// version guard.
    Diagnostics {
        uri: lsp_types::Uri,
        version: i32,
        findings: Vec<Finding>,
    },
    /// A debounce timer fired; analysis runs only if the version is still
    /// current.
    AnalysisDue { uri: lsp_types::Uri, version: i32 },
}

#[derive(Debug)]
pub(crate) enum Event {
    Lsp(lsp_server::Message),
    Task(Task),
}

pub(crate) struct ServerState {
    // Gateway over the registered analysis backends; shared read-only with
    // worker threads.
    pub backends: Arc<BackendRegistry>,

    // the lsp server config options
    pub config: Config,

    // Documents that are currently kept in memory from the client
    pub documents: DocumentStore,

    // Version-guarded publishDiagnostics bookkeeping
    pub publisher: DiagnosticsPublisher,

    // The request queue keeps track of all incoming and outgoing requests.
    pub req_queue: lsp_server::ReqQueue<(String, Instant), RequestHandler>,

    // Channel to send language server messages to the client
    pub sender: Sender<lsp_server::Message>,

    // True if the client requested that we shut down
    pub shutdown_requested: bool,

    // Channel to send tasks to from background operations
    pub task_sender: Sender<Task>,

    // Channel to receive tasks on from background operations
    pub task_receiver: Receiver<Task>,

    // Thread pool for async execution
    pub thread_pool: threadpool::ThreadPool,
}

/// A snapshot of the state of the language server, handed to request
/// handlers running on the thread pool.
pub(crate) struct StateSnapshot {
    pub backends: Arc<BackendRegistry>,
    pub documents: DocumentStore,
}

impl ServerState {
    pub fn new(sender: Sender<lsp_server::Message>, config: Config) -> Self {
        let (task_sender, task_receiver) = crossbeam_channel::unbounded();
        let backends = Arc::new(BackendRegistry::from_config(&config));
        Self {
            backends,
            config,
            documents: DocumentStore::new(),
            publisher: DiagnosticsPublisher::new(),
            req_queue: lsp_server::ReqQueue::default(),
            sender,
            shutdown_requested: false,
            task_sender,
            task_receiver,
            thread_pool: threadpool::ThreadPool::default(),
        }
    }

    pub fn run(&mut self, receiver: Receiver<lsp_server::Message>) -> Result<()> {
        while let Some(event) = self.next_event(&receiver) {
            if let Event::Lsp(lsp_server::Message::Notification(notification)) = &event {
                if notification.method == lsp_types::notification::Exit::METHOD {
                    return Ok(());
                }
            }
            self.handle_event(event)?;
        }
        Ok(())
    }

    // Blocks until a new event is received on either channel
    fn next_event(&self, receiver: &Receiver<lsp_server::Message>) -> Option<Event> {
        crossbeam_channel::select! {
            recv(receiver) -> msg => msg.ok().map(Event::Lsp),
            recv(self.task_receiver) -> task => task.ok().map(Event::Task),
        }
    }

    // handles an event
    fn handle_event(&mut self, event: Event) -> Result<()> {
        let start_time = Instant::now();

        match event {
            Event::Task(task) => self.handle_task(task)?,
            Event::Lsp(msg) => match msg {
                lsp_server::Message::Request(req) => self.on_request(req, start_time)?,
                lsp_server::Message::Response(resp) => self.complete_request(resp),
                lsp_server::Message::Notification(notif) => self.on_notification(notif)?,
            },
        };
        Ok(())
    }

    // Handles a task sent by a background job or timer
    fn handle_task(&mut self, task: Task) -> Result<()> {
        match task {
            Task::Notify(notification) => {
                self.send(notification.into());
            }
            Task::Response(response) => self.respond(response),
            Task::Diagnostics {
                uri,
                version,
                findings,
            } => {
                if let Some(notification) =
                    self.publisher
                        .publish(&self.documents, uri, version, findings)
                {
                    self.send(notification.into());
                }
            }
            Task::AnalysisDue { uri, version } => diagnostics::analysis_due(self, uri, version),
        }
        Ok(())
    }

    // Registers a request with the server. We register all these request to make
    // sure they all get handled and so we can measure the time it takes for them
    // to complete from the point of view of the client.
    fn register_request(&mut self, request: &lsp_server::Request, start_time: Instant) {
        self.req_queue
            .incoming
            .register(request.id.clone(), (request.method.clone(), start_time))
    }

    // Handles a language server protocol request
    fn on_request(&mut self, req: lsp_server::Request, start_time: Instant) -> Result<()> {
        self.register_request(&req, start_time);
        if self.shutdown_requested {
            self.respond(lsp_server::Response::new_err(
                req.id,
                lsp_server::ErrorCode::InvalidRequest as i32,
                "shutdown was requested".to_string(),
            ));
            return Ok(());
        }

        RequestDispatcher::new(self, req)
            .on_sync::<lsp_types::request::Shutdown>(|state, _request| {
                state.shutdown_requested = true;
                Ok(())
            })?
            .on::<lsp_types::request::HoverRequest>(handlers::text_document::hover)?
            .on::<lsp_types::request::Completion>(handlers::text_document::completion)?
            .on::<lsp_types::request::CodeActionRequest>(handlers::text_document::code_action)?
            .on::<lsp_ext::ExplainSnippet>(handlers::text_document::explain_snippet)?
            .finish();
        Ok(())
    }

    // Handles a response to a request we made. The response gets forwarded to where we made the request from.
    fn complete_request(&mut self, resp: lsp_server::Response) {
        if let Some(handler) = self.req_queue.outgoing.complete(resp.id.clone()) {
            handler(self, resp)
        } else {
            tracing::error!("received response for unknown request: {:?}", resp.id);
        }
    }

    // Handles a notification from the language server client
    fn on_notification(&mut self, notif: lsp_server::Notification) -> Result<()> {
        NotificationDispatcher::new(self, notif)
            .on::<lsp_types::notification::DidOpenTextDocument>(handlers::text_document::did_open)?
            .on::<lsp_types::notification::DidCloseTextDocument>(
                handlers::text_document::did_close,
            )?
            .on::<lsp_types::notification::DidSaveTextDocument>(handlers::text_document::did_save)?
            .on::<lsp_types::notification::DidChangeTextDocument>(
                handlers::text_document::did_change,
            )?
            .finish();
        Ok(())
    }

    // Sends a response to the client. This method logs the time it took us to reply to a request from the client.
    pub(crate) fn respond(&mut self, response: lsp_server::Response) {
        if let Some((_method, start)) = self.req_queue.incoming.complete(&response.id) {
            let duration = start.elapsed();
            tracing::info!("handled req#{} in {:?}", response.id, duration);
            self.send(response.into());
        }
    }

    /// Sends a message to the client
    pub(crate) fn send(&mut self, message: lsp_server::Message) {
        if let Err(err) = self.sender.send(message) {
            tracing::error!("error sending lsp message to the outgoing channel: {}", err);
        }
    }

    pub(crate) fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            backends: Arc::clone(&self.backends),
            documents: self.documents.clone(),
        }
    }
}
