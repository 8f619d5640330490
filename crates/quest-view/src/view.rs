use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use quest_client::images::compress_blocking;
use quest_client::{ApiClient, ClientError, ImageAttachment, ImageLimits, ImageStore};
use quest_realtime::{PushEvent, RealtimeTransport, Subscription, decode_record};
use quest_types::{ContentPart, Message, QuestDetail};

use crate::composer::{Composer, Outgoing};
use crate::responding::RespondingState;
use crate::store::MessageStore;

pub const RESPONSE_TIMEOUT_MESSAGE: &str =
    "The guide is taking longer than expected. Try sending your message again.";
pub const DELETED_TOAST: &str = "Quest deleted";
pub const SEND_IN_PROGRESS_MESSAGE: &str = "Your last message is still sending. Try again in a moment.";

const COMMAND_BUFFER: usize = 32;

/// Where the host should take the user next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    QuestList,
    Quest(Uuid),
    SignIn,
}

/// Commands from the host into a running view.
#[derive(Debug, Clone)]
pub enum ViewCommand {
    Open(Uuid),
    Close,
    SetDraft(String),
    AttachImage(ImageAttachment),
    ClearImage,
    Send,
    ClickSuggestion(String),
    RequestDelete,
    ConfirmDelete,
    CancelDelete,
    Shutdown,
}

/// What changed, for the host to render.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewUpdate {
    Loaded(QuestDetail),
    NotFound(String),
    TranscriptChanged,
    MessageAppended(Message),
    Responding(bool),
    Suggestions(Vec<String>),
    ComposerChanged,
    Error(String),
    DeleteConfirmationRequired,
    Deleted,
    Toast(String),
    Navigate(Route),
    AuthRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteState {
    #[default]
    Idle,
    Confirming,
    Deleting,
}

/// Results of spawned work, routed back into the view loop.
enum Completion {
    Authorized(Result<(), ClientError>),
    Loaded(Result<QuestDetail, ClientError>),
    Sent(Result<Option<Message>, ClientError>),
    Deleted(Result<(), ClientError>),
}

/// A send between `begin_send` and its completion.
struct InFlightSend {
    /// An assistant message landed after the send started.
    reply_seen: bool,
    via_suggestion: bool,
}

/// Controller for a single quest's transcript.
///
/// Owns the message store and the realtime subscription. All state changes
/// happen on the task running [`QuestView::run`]; network work is spawned and
/// reports back tagged with the generation it was started under, so results
/// for a quest the view has since left are ignored.
pub struct QuestView<T: RealtimeTransport> {
    api: ApiClient,
    transport: T,
    images: Option<ImageStore>,
    image_limits: ImageLimits,
    response_timeout: Option<Duration>,

    updates: mpsc::UnboundedSender<ViewUpdate>,
    completions_tx: mpsc::UnboundedSender<(u64, Completion)>,
    completions_rx: mpsc::UnboundedReceiver<(u64, Completion)>,

    generation: u64,
    quest_id: Option<Uuid>,
    subscription: Option<Subscription>,
    store: MessageStore,
    /// `Loaded` has gone out for the open quest. Pushes before that are held
    /// in the store and delivered as part of it.
    transcript_ready: bool,
    responding: RespondingState,
    composer: Composer,
    delete: DeleteState,
    in_flight: Option<InFlightSend>,
}

impl<T: RealtimeTransport + 'static> QuestView<T> {
    pub fn new(api: ApiClient, transport: T) -> (Self, mpsc::UnboundedReceiver<ViewUpdate>) {
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let config = api.config();
        let view = Self {
            image_limits: config.image_limits,
            response_timeout: config.response_timeout,
            api,
            transport,
            images: None,
            updates,
            completions_tx,
            completions_rx,
            generation: 0,
            quest_id: None,
            subscription: None,
            store: MessageStore::new(),
            transcript_ready: false,
            responding: RespondingState::Idle,
            composer: Composer::new(),
            delete: DeleteState::Idle,
            in_flight: None,
        };
        (view, updates_rx)
    }

    /// Enables image attachments.
    pub fn with_image_store(mut self, images: ImageStore) -> Self {
        self.images = Some(images);
        self
    }

    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn quest_id(&self) -> Option<Uuid> {
        self.quest_id
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn responding(&self) -> RespondingState {
        self.responding
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn delete_state(&self) -> DeleteState {
        self.delete
    }

    /// Run the view on its own task.
    pub fn spawn(self) -> (mpsc::Sender<ViewCommand>, JoinHandle<()>) {
        let (commands, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn(self.run(commands_rx));
        (commands, task)
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<ViewCommand>) {
        loop {
            let deadline = self
                .response_timeout
                .and_then(|timeout| self.responding.deadline(timeout));

            tokio::select! {
                command = commands.recv() => match command {
                    Some(ViewCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some((generation, completion)) = self.completions_rx.recv() => {
                    self.handle_completion(generation, completion);
                }
                event = next_push(&mut self.subscription) => self.handle_push(event),
                _ = sleep_until(deadline) => self.expire_response(),
            }
        }

        self.detach();
        debug!("Quest view stopped");
    }

    pub fn handle_command(&mut self, command: ViewCommand) {
        match command {
            ViewCommand::Open(quest_id) => self.open(quest_id),
            ViewCommand::Close => self.close(),
            ViewCommand::SetDraft(text) => {
                self.composer.set_draft(text);
                self.emit(ViewUpdate::ComposerChanged);
            }
            ViewCommand::AttachImage(image) => {
                self.composer.attach_image(image);
                self.emit(ViewUpdate::ComposerChanged);
            }
            ViewCommand::ClearImage => {
                self.composer.clear_image();
                self.emit(ViewUpdate::ComposerChanged);
            }
            ViewCommand::Send => self.send(false),
            ViewCommand::ClickSuggestion(text) => self.click_suggestion(text),
            ViewCommand::RequestDelete => {
                if self.quest_id.is_some() && self.delete == DeleteState::Idle {
                    self.delete = DeleteState::Confirming;
                    self.emit(ViewUpdate::DeleteConfirmationRequired);
                }
            }
            ViewCommand::ConfirmDelete => self.confirm_delete(),
            ViewCommand::CancelDelete => {
                if self.delete == DeleteState::Confirming {
                    self.delete = DeleteState::Idle;
                }
            }
            ViewCommand::Shutdown => self.close(),
        }
    }

    // -- Lifecycle --

    fn open(&mut self, quest_id: Uuid) {
        self.reset();
        self.quest_id = Some(quest_id);
        info!("Opening quest {}", quest_id);

        let api = self.api.clone();
        self.spawn_completion(async move {
            Completion::Authorized(api.session().await.map(|_| ()))
        });
    }

    fn close(&mut self) {
        if let Some(quest_id) = self.quest_id {
            debug!("Closing quest {}", quest_id);
        }
        self.reset();
    }

    /// Drop everything tied to the current quest. The subscription goes first
    /// so nothing from the old quest lands in the new one.
    fn reset(&mut self) {
        self.detach();
        self.generation += 1;
        self.quest_id = None;
        self.store.clear();
        self.transcript_ready = false;
        self.responding = RespondingState::Idle;
        self.composer = Composer::new();
        self.delete = DeleteState::Idle;
        self.in_flight = None;
    }

    fn detach(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.detach();
        }
    }

    fn attach(&mut self, quest_id: Uuid) {
        self.detach();
        match self.transport.subscribe(quest_id, self.api.sessions().clone()) {
            Ok(subscription) => self.subscription = Some(subscription),
            Err(e) => {
                // The transcript still loads; it just won't update live.
                warn!("Realtime subscribe for quest {} failed: {}", quest_id, e);
                self.emit(ViewUpdate::Error(e.user_message()));
            }
        }
    }

    // -- Completions --

    fn handle_completion(&mut self, generation: u64, completion: Completion) {
        if generation != self.generation {
            debug!("Dropping stale completion from generation {}", generation);
            return;
        }
        let Some(quest_id) = self.quest_id else {
            return;
        };

        match completion {
            Completion::Authorized(Ok(())) => {
                self.attach(quest_id);
                let api = self.api.clone();
                self.spawn_completion(async move { Completion::Loaded(api.get_quest(quest_id).await) });
            }
            Completion::Authorized(Err(e)) => self.report(e),
            Completion::Loaded(result) => self.loaded(result),
            Completion::Sent(result) => self.sent(result),
            Completion::Deleted(result) => self.deleted(result),
        }
    }

    fn loaded(&mut self, result: Result<QuestDetail, ClientError>) {
        let mut detail = match result {
            Ok(detail) => detail,
            Err(ClientError::NotFound(message)) => {
                self.detach();
                self.emit(ViewUpdate::NotFound(message));
                return;
            }
            Err(e) => {
                self.report(e);
                return;
            }
        };

        // Anything realtime delivered while the fetch was in flight is newer
        // than the fetched transcript; keep it after the fetched messages.
        let live = std::mem::take(&mut self.store);
        self.store.initialize(std::mem::take(&mut detail.messages));
        for message in live.messages() {
            self.store.insert(message.clone());
        }

        info!("Loaded quest {} with {} messages", detail.quest.id, self.store.len());
        detail.messages = self.store.messages().to_vec();
        self.transcript_ready = true;
        self.emit(ViewUpdate::Loaded(detail));
        self.emit_suggestions();
    }

    fn sent(&mut self, result: Result<Option<Message>, ClientError>) {
        let in_flight = self.in_flight.take();

        match result {
            Ok(echo) => {
                self.composer.finish_ok();
                self.emit(ViewUpdate::ComposerChanged);

                // The reply can beat the POST response; don't wait for one
                // that is already here.
                if !in_flight.is_some_and(|send| send.reply_seen) {
                    self.begin_responding();
                }

                if let Some(message) = echo {
                    self.insert(message);
                }
            }
            Err(e) => {
                if in_flight.is_some_and(|send| send.via_suggestion) && self.responding.is_awaiting() {
                    self.responding = RespondingState::Idle;
                    self.emit(ViewUpdate::Responding(false));
                    self.emit_suggestions();
                }
                self.composer.finish_err(e.user_message());
                self.emit(ViewUpdate::ComposerChanged);
                self.report(e);
            }
        }
    }

    fn deleted(&mut self, result: Result<(), ClientError>) {
        match result {
            Ok(()) => {
                self.reset();
                self.emit(ViewUpdate::Deleted);
                self.emit(ViewUpdate::Toast(DELETED_TOAST.into()));
                self.emit(ViewUpdate::Navigate(Route::QuestList));
            }
            Err(e) => {
                self.delete = DeleteState::Idle;
                self.report(e);
            }
        }
    }

    // -- Realtime --

    fn handle_push(&mut self, event: Option<PushEvent>) {
        let quest_id = self.subscription.as_ref().map(Subscription::quest_id);
        match event {
            None => {
                warn!("Realtime feed for quest {:?} ended", quest_id);
                self.subscription = None;
                let lost = ClientError::Realtime("feed ended".into());
                self.emit(ViewUpdate::Error(lost.user_message()));
            }
            Some(PushEvent::Joined) => debug!("Live updates attached for quest {:?}", quest_id),
            Some(PushEvent::Error(reason)) => {
                warn!("Realtime problem on quest {:?}: {}", quest_id, reason)
            }
            Some(PushEvent::Insert(record)) => {
                // decode_record already logged the payload.
                let Ok(message) = decode_record(record) else {
                    return;
                };
                if Some(message.quest_id) != self.quest_id {
                    warn!(
                        "Ignoring message {} for quest {} on quest {:?}'s feed",
                        message.id, message.quest_id, self.quest_id
                    );
                    return;
                }
                self.insert(message);
            }
        }
    }

    fn insert(&mut self, message: Message) {
        let role = message.role;
        if !self.store.insert(message.clone()) {
            debug!("Message {} already in transcript", message.id);
            return;
        }
        if message.is_assistant()
            && let Some(send) = self.in_flight.as_mut()
        {
            send.reply_seen = true;
        }
        let cleared = self.responding.on_insert(true, role);

        if self.transcript_ready {
            self.emit(ViewUpdate::MessageAppended(message));
            self.emit(ViewUpdate::TranscriptChanged);
        } else {
            debug!("Holding message {} until the transcript loads", message.id);
        }
        if cleared {
            self.emit(ViewUpdate::Responding(false));
        }
        if self.transcript_ready {
            self.emit_suggestions();
        }
    }

    fn expire_response(&mut self) {
        let Some(timeout) = self.response_timeout else {
            return;
        };
        if self.responding.expire(Instant::now(), timeout) {
            warn!("No reply on quest {:?} after {:?}", self.quest_id, timeout);
            self.emit(ViewUpdate::Responding(false));
            self.emit(ViewUpdate::Error(RESPONSE_TIMEOUT_MESSAGE.into()));
            self.emit_suggestions();
        }
    }

    // -- Sending --

    fn click_suggestion(&mut self, text: String) {
        if self.quest_id.is_none() {
            return;
        }
        if self.composer.is_sending() {
            debug!("Suggestion {:?} clicked while a send is in flight", text);
            self.emit(ViewUpdate::Error(SEND_IN_PROGRESS_MESSAGE.into()));
            return;
        }
        self.begin_responding();
        self.composer.set_draft(text);
        self.emit(ViewUpdate::ComposerChanged);
        self.send(true);
    }

    fn send(&mut self, via_suggestion: bool) {
        let Some(quest_id) = self.quest_id else {
            return;
        };
        if self.composer.is_sending() {
            self.emit(ViewUpdate::Error(SEND_IN_PROGRESS_MESSAGE.into()));
            return;
        }

        let outgoing = match self.composer.prepare() {
            Ok(outgoing) => outgoing,
            Err(e) => {
                if via_suggestion {
                    self.responding = RespondingState::Idle;
                    self.emit(ViewUpdate::Responding(false));
                }
                self.composer.set_error(e.to_string());
                self.emit(ViewUpdate::ComposerChanged);
                self.emit(ViewUpdate::Error(e.to_string()));
                return;
            }
        };

        self.composer.begin_send();
        self.in_flight = Some(InFlightSend {
            reply_seen: false,
            via_suggestion,
        });
        self.emit(ViewUpdate::ComposerChanged);

        let api = self.api.clone();
        let images = self.images.clone();
        let limits = self.image_limits;
        self.spawn_completion(async move {
            Completion::Sent(deliver(&api, images.as_ref(), limits, quest_id, outgoing).await)
        });
    }

    fn begin_responding(&mut self) {
        let was_awaiting = self.responding.is_awaiting();
        self.responding.begin(Instant::now());
        if !was_awaiting {
            self.emit(ViewUpdate::Responding(true));
            self.emit(ViewUpdate::Suggestions(Vec::new()));
        }
    }

    // -- Deleting --

    fn confirm_delete(&mut self) {
        if self.delete != DeleteState::Confirming {
            return;
        }
        let Some(quest_id) = self.quest_id else {
            return;
        };
        self.delete = DeleteState::Deleting;

        let api = self.api.clone();
        self.spawn_completion(async move { Completion::Deleted(api.delete_quest(quest_id).await) });
    }

    // -- Plumbing --

    fn spawn_completion<F>(&self, work: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let generation = self.generation;
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send((generation, work.await));
        });
    }

    fn report(&mut self, err: ClientError) {
        if err.is_auth_required() {
            self.detach();
            self.emit(ViewUpdate::AuthRequired);
            self.emit(ViewUpdate::Navigate(Route::SignIn));
            return;
        }
        warn!("Quest {:?}: {}", self.quest_id, err);
        self.emit(ViewUpdate::Error(err.user_message()));
    }

    fn emit_suggestions(&self) {
        if !self.responding.is_awaiting() {
            self.emit(ViewUpdate::Suggestions(self.store.suggestions().to_vec()));
        }
    }

    fn emit(&self, update: ViewUpdate) {
        if self.updates.send(update).is_err() {
            debug!("View update receiver dropped");
        }
    }
}

/// Post one validated draft: upload the image if there is one, then either
/// the message or the generation request.
async fn deliver(
    api: &ApiClient,
    images: Option<&ImageStore>,
    limits: ImageLimits,
    quest_id: Uuid,
    outgoing: Outgoing,
) -> Result<Option<Message>, ClientError> {
    match outgoing {
        Outgoing::GenerateImage { prompt } => {
            api.generate_image(quest_id, &prompt).await?;
            Ok(None)
        }
        Outgoing::Message { text, image } => {
            let mut content = Vec::with_capacity(2);
            if let Some(text) = text {
                content.push(ContentPart::text(text));
            }
            if let Some(image) = image {
                let store = images.ok_or_else(|| {
                    ClientError::Config("image uploads need a storage provider".into())
                })?;
                let image = compress_blocking(image, limits).await?;
                let session = api.session().await?;
                let url = store.upload(&session, &image).await?;
                content.push(ContentPart::image(url));
            }
            api.send_message(quest_id, content).await
        }
    }
}

async fn next_push(subscription: &mut Option<Subscription>) -> Option<PushEvent> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
