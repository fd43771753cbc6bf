//! Chat session module
//!
//! This module ties the components together for one logged-in user:
//! - Push events flow through a single pump task into the reducers
//! - The open conversation is loaded over REST and re-fetched periodically
//! - Sends are optimistic, one in flight per conversation
//! - Typing, presence and notifications are kept current for the UI
//!
//! Session state lives behind a `tokio::sync::Mutex` that is never held
//! across a network call. Every background task re-reads the active
//! conversation before touching state, so late results for a conversation
//! the user has left are dropped.

use crate::api::ChatApi;
use crate::messaging::{Composer, SendPipeline};
use crate::notifications::{Notification, NotificationAggregator};
use crate::presence::PresenceTracker;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::storage::{Chat, Message, SessionIdentity, Settings};
use crate::sync::{ActiveChat, FetchOrigin, Incoming, SnapshotOutcome, Timeline};
use crate::transport::{Connection, ConnectionStatus, SubscriptionId};
use crate::typing::{LocalTyping, TypingSignal, TypingTracker};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, MutexGuard, PoisonError, Weak};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Kind of user-facing notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// Opening a conversation failed
    LoadFailed,
    /// A send failed and its provisional message was removed
    SendFailed,
    /// The backend rejected the credentials; the session must be discarded
    SessionExpired,
}

/// Recoverable problem to show to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// What went wrong
    pub kind: NoticeKind,
    /// Human-readable description
    pub text: String,
}

impl Notice {
    fn expired() -> Self {
        Self {
            kind: NoticeKind::SessionExpired,
            text: "Session expired, please sign in again".to_string(),
        }
    }

    fn from_error(kind: NoticeKind, context: &str, error: &Error) -> Self {
        match error {
            Error::Unauthorized => Self::expired(),
            other => Self {
                kind,
                text: format!("{}: {}", context, other),
            },
        }
    }
}

/// Point-in-time copy of everything a UI renders
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Open conversation
    pub active_chat: Option<String>,
    /// Messages of the open conversation, in order
    pub messages: Vec<Message>,
    /// Compose buffer
    pub compose: String,
    /// Local typing state
    pub local_typing: LocalTyping,
    /// Whether someone else is typing in the open conversation
    pub remote_typing: bool,
    /// Named typists in the open conversation
    pub remote_typists: Vec<String>,
    /// Notifications for other conversations, newest first
    pub notifications: Vec<Notification>,
    /// Cached conversation list
    pub conversations: Vec<Chat>,
    /// Online participant ids
    pub online: Vec<String>,
    /// Push channel status
    pub connection: ConnectionStatus,
    /// Current notice, if any
    pub notice: Option<Notice>,
    /// Whether a send is unresolved in the open conversation
    pub sending: bool,
    /// Whether the conversation list should be re-fetched
    pub needs_refresh: bool,
}

struct SessionState {
    timeline: Timeline,
    composer: Composer,
    pipeline: SendPipeline,
    typing: TypingTracker,
    notifications: NotificationAggregator,
    presence: PresenceTracker,
    conversations: Vec<Chat>,
    notice: Option<Notice>,
}

#[derive(Default)]
struct Tasks {
    pump: Option<JoinHandle<()>>,
    poll: Option<JoinHandle<()>>,
    typing_timers: Vec<AbortHandle>,
    remote_timers: Vec<AbortHandle>,
}

impl Tasks {
    fn abort_conversation(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.abort();
        }
        for timer in self.typing_timers.drain(..).chain(self.remote_timers.drain(..)) {
            timer.abort();
        }
    }

    fn abort_all(&mut self) {
        self.abort_conversation();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

struct Inner<A> {
    api: A,
    connection: Connection,
    identity: SessionIdentity,
    settings: Settings,
    active: ActiveChat,
    state: Mutex<SessionState>,
    send_gates: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    tasks: std::sync::Mutex<Tasks>,
    subscription: SubscriptionId,
}

/// A logged-in user's live chat session
///
/// Cloning yields another handle to the same session.
pub struct ChatSession<A: ChatApi> {
    inner: Arc<Inner<A>>,
}

impl<A: ChatApi> Clone for ChatSession<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: ChatApi> ChatSession<A> {
    /// Start a session over an API client and a push connection
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(api: A, connection: Connection, identity: SessionIdentity, settings: Settings) -> Self {
        let active = ActiveChat::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let subscription = connection.on_event(move |event| {
            let _ = events_tx.send(event);
        });

        let state = SessionState {
            timeline: Timeline::new(active.clone()),
            composer: Composer::new(),
            pipeline: SendPipeline::new(),
            typing: TypingTracker::new(settings.typing_window(), settings.remote_typing_timeout()),
            notifications: NotificationAggregator::new(),
            presence: PresenceTracker::new(),
            conversations: Vec::new(),
            notice: None,
        };

        let session = Self {
            inner: Arc::new(Inner {
                api,
                connection,
                identity,
                settings,
                active,
                state: Mutex::new(state),
                send_gates: std::sync::Mutex::new(HashMap::new()),
                tasks: std::sync::Mutex::new(Tasks::default()),
                subscription,
            }),
        };

        let pump = tokio::spawn(run_event_pump(Arc::downgrade(&session.inner), events_rx));
        session.tasks().pump = Some(pump);

        info!("Session started for {}", session.inner.identity.user_id);
        session
    }

    fn from_inner(inner: Arc<Inner<A>>) -> Self {
        Self { inner }
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identity the session runs as
    pub fn identity(&self) -> &SessionIdentity {
        &self.inner.identity
    }

    /// Push channel of the session
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Id of the open conversation
    pub fn active_chat(&self) -> Option<String> {
        self.inner.active.get()
    }

    /// Open a conversation
    ///
    /// Stops local typing in the previous one, resets the list, joins the
    /// room, loads the history and starts the background re-fetch.
    pub async fn open(&self, chat_id: &str) -> SnapshotOutcome {
        self.tasks().abort_conversation();
        {
            let mut state = self.inner.state.lock().await;
            if let Some(signal) = state.typing.stop() {
                self.emit_typing(signal);
            }
            state.typing.clear_remote();
            self.inner.active.set(Some(chat_id.to_string()));
            state.timeline.reset();
            state.composer.clear();
            state.notifications.dismiss(chat_id);
            if state.notice.as_ref().is_some_and(|n| n.kind != NoticeKind::SessionExpired) {
                state.notice = None;
            }
        }
        info!("Opened conversation {}", chat_id);

        self.emit(ClientEvent::JoinChat(chat_id.to_string()));
        let outcome = self.load(chat_id, FetchOrigin::User).await;
        self.start_polling(chat_id);
        outcome
    }

    /// Leave the open conversation without opening another
    pub async fn close_conversation(&self) {
        self.tasks().abort_conversation();
        let mut state = self.inner.state.lock().await;
        if let Some(signal) = state.typing.stop() {
            self.emit_typing(signal);
        }
        state.typing.clear_remote();
        state.timeline.reset();
        state.composer.clear();
        if let Some(previous) = self.inner.active.set(None) {
            debug!("Closed conversation {}", previous);
        }
    }

    /// Fetch the open conversation's messages and apply them
    async fn load(&self, chat_id: &str, origin: FetchOrigin) -> SnapshotOutcome {
        let result = self.inner.api.fetch_messages(chat_id).await;
        let expired = matches!(result, Err(Error::Unauthorized));
        let reason = result.as_ref().err().map(ToString::to_string);

        let mut state = self.inner.state.lock().await;
        let outcome = state.timeline.apply_snapshot(chat_id, result, origin);

        if expired {
            warn!("Credentials rejected while loading {}", chat_id);
            state.notice = Some(Notice::expired());
        } else if let (Some(reason), SnapshotOutcome::Failed, FetchOrigin::User) = (reason, outcome, origin) {
            warn!("Loading {} failed: {}", chat_id, reason);
            state.notice = Some(Notice {
                kind: NoticeKind::LoadFailed,
                text: format!("Could not load messages: {}", reason),
            });
        }
        outcome
    }

    fn start_polling(&self, chat_id: &str) {
        if !self.inner.active.is(chat_id) {
            return;
        }

        let session = Arc::downgrade(&self.inner);
        let period = self.inner.settings.poll_interval();
        let chat_id = chat_id.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = session.upgrade() else { break };
                if !inner.active.is(&chat_id) {
                    break;
                }
                Self::from_inner(inner).load(&chat_id, FetchOrigin::Background).await;
            }
        });

        if let Some(previous) = self.tasks().poll.replace(handle) {
            previous.abort();
        }
    }

    /// Update the compose buffer after a keystroke
    ///
    /// Drives the local typing signal while the push channel is connected.
    pub async fn input(&self, text: impl Into<String>) {
        let mut state = self.inner.state.lock().await;
        state.composer.set(text);

        let Some(chat_id) = self.inner.active.get() else {
            return;
        };
        if !self.inner.connection.is_connected() {
            return;
        }

        let (signal, deadline) = state.typing.keystroke(&chat_id, Instant::now());
        if let Some(signal) = signal {
            self.emit_typing(signal);
        }
        drop(state);

        let session = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(inner) = session.upgrade() else { return };
            let session = Self::from_inner(inner);
            let mut state = session.inner.state.lock().await;
            if let Some(signal) = state.typing.timer_fired(Instant::now()) {
                session.emit_typing(signal);
            }
        });

        let mut tasks = self.tasks();
        tasks.typing_timers.retain(|t| !t.is_finished());
        tasks.typing_timers.push(timer.abort_handle());
    }

    /// Send the compose buffer to the open conversation
    ///
    /// The provisional message appears immediately and is swapped for the
    /// confirmed one on success. On failure it is removed and a notice is
    /// set; the compose buffer is not restored. A submit issued while the
    /// conversation already has a send in flight waits for it to resolve.
    ///
    /// The send runs on its own task: dropping this future stops waiting
    /// for the outcome but never leaves the provisional entry unresolved.
    ///
    /// # Errors
    /// `NoActiveConversation` and `EmptyMessage` leave state untouched;
    /// API errors are returned after the rollback.
    pub async fn submit(&self) -> Result<Message> {
        let send = self.submit_in_background().await?;
        send.await.map_err(|e| Error::Task(format!("send task ended early: {}", e)))?
    }

    /// Like `submit`, but returns as soon as the compose buffer is taken
    ///
    /// The send continues on a background task whose handle is returned.
    pub async fn submit_in_background(&self) -> Result<JoinHandle<Result<Message>>> {
        let (chat_id, content) = self.take_compose().await?;
        let session = self.clone();
        Ok(tokio::spawn(async move { session.deliver(chat_id, content).await }))
    }

    async fn take_compose(&self) -> Result<(String, String)> {
        let chat_id = self.inner.active.get().ok_or(Error::NoActiveConversation)?;
        let mut state = self.inner.state.lock().await;
        let content = state.composer.take().ok_or(Error::EmptyMessage)?;
        if let Some(signal) = state.typing.stop() {
            self.emit_typing(signal);
        }
        Ok((chat_id, content))
    }

    async fn deliver(&self, chat_id: String, content: String) -> Result<Message> {
        let gate = self.send_gate(&chat_id);
        let _permit = gate.lock().await;

        let provisional = {
            let mut state = self.inner.state.lock().await;
            let provisional = match state
                .pipeline
                .begin(&chat_id, self.inner.identity.participant(), &content)
            {
                Ok(provisional) => provisional,
                Err(e) => {
                    if state.composer.text().trim().is_empty() {
                        state.composer.set(content);
                    }
                    return Err(e);
                }
            };
            if !state.timeline.insert_provisional(provisional.clone()) {
                debug!("Conversation {} closed before {} was shown", chat_id, provisional.id);
            }
            provisional
        };

        let result = self.inner.api.send_message(&chat_id, &provisional.content).await;

        let mut state = self.inner.state.lock().await;
        match result {
            Ok(confirmed) => {
                state.pipeline.confirm(&chat_id, &confirmed.id);
                match state.timeline.resolve_provisional(&provisional.id, confirmed.clone()) {
                    Incoming::Duplicate => debug!("{} already delivered, dropped provisional", confirmed.id),
                    Incoming::Elsewhere(_) => debug!("{} confirmed after leaving {}", confirmed.id, chat_id),
                    _ => {}
                }
                refresh_preview(&mut state.conversations, &confirmed);
                drop(state);

                self.emit(ClientEvent::NewMessage(confirmed.clone()));
                Ok(confirmed)
            }
            Err(e) => {
                state.pipeline.fail(&chat_id, &e);
                state.timeline.discard_provisional(&provisional.id);
                state.notice = Some(Notice::from_error(NoticeKind::SendFailed, "Message not sent", &e));
                Err(e)
            }
        }
    }

    fn send_gate(&self, chat_id: &str) -> Arc<Mutex<()>> {
        let mut gates = self.inner.send_gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(chat_id.to_string()).or_default())
    }

    /// Re-fetch the conversation list
    ///
    /// Clears the "refresh conversations" flag whether or not the fetch
    /// succeeds.
    pub async fn refresh_conversations(&self) -> Result<()> {
        self.inner.state.lock().await.notifications.take_refresh();

        let result = self.inner.api.fetch_conversations().await;
        let mut state = self.inner.state.lock().await;
        match result {
            Ok(conversations) => {
                debug!("Loaded {} conversation(s)", conversations.len());
                state.conversations = conversations;
                Ok(())
            }
            Err(e) => {
                warn!("Loading conversations failed: {}", e);
                state.notice = Some(Notice::from_error(
                    NoticeKind::LoadFailed,
                    "Could not load conversations",
                    &e,
                ));
                Err(e)
            }
        }
    }

    /// Clear the current notice
    pub async fn dismiss_notice(&self) {
        self.inner.state.lock().await.notice = None;
    }

    /// Whether a participant is online
    pub async fn is_online(&self, participant_id: &str) -> bool {
        self.inner.state.lock().await.presence.is_online(participant_id)
    }

    /// Copy out the current state
    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.state.lock().await;
        let active_chat = self.inner.active.get();
        let now = Instant::now();
        let (remote_typing, remote_typists, sending) = match active_chat.as_deref() {
            Some(chat_id) => (
                state.typing.is_remote_typing(chat_id, now),
                state.typing.remote_typists(chat_id, now),
                state.pipeline.in_flight(chat_id).is_some(),
            ),
            None => (false, Vec::new(), false),
        };

        SessionSnapshot {
            active_chat,
            messages: state.timeline.messages().to_vec(),
            compose: state.composer.text().to_string(),
            local_typing: state.typing.local(),
            remote_typing,
            remote_typists,
            notifications: state.notifications.list().to_vec(),
            conversations: state.conversations.clone(),
            online: state.presence.online(),
            connection: self.inner.connection.status(),
            notice: state.notice.clone(),
            sending,
            needs_refresh: state.notifications.needs_refresh(),
        }
    }

    /// End the session
    ///
    /// Emits `stop typing` if signaling, stops every task, clears the open
    /// conversation and disconnects the push channel.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if let Some(signal) = state.typing.stop() {
                self.emit_typing(signal);
            }
            state.typing.clear_remote();
        }
        self.tasks().abort_all();
        self.inner.active.set(None);
        self.inner.connection.off(self.inner.subscription);
        self.inner.connection.disconnect();
        info!("Session for {} closed", self.inner.identity.user_id);
    }

    fn emit(&self, event: ClientEvent) {
        if let Err(e) = self.inner.connection.emit(event) {
            debug!("Push channel unavailable, event not sent: {}", e);
        }
    }

    fn emit_typing(&self, signal: TypingSignal) {
        match signal {
            TypingSignal::Start(chat_id) => self.emit(ClientEvent::Typing(chat_id)),
            TypingSignal::Stop(chat_id) => self.emit(ClientEvent::StopTyping(chat_id)),
        }
    }

    async fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::Connected => {
                if let Some(chat_id) = self.inner.active.get() {
                    debug!("Connection acknowledged, joining {}", chat_id);
                    self.emit(ClientEvent::JoinChat(chat_id));
                }
            }
            ServerEvent::MessageReceived(message) => {
                let mut state = self.inner.state.lock().await;
                let preview = message.clone();
                match state.timeline.apply_incoming(message) {
                    Incoming::Elsewhere(message) => {
                        refresh_preview(&mut state.conversations, &message);
                        state.notifications.record(message);
                    }
                    Incoming::Inserted | Incoming::Replaced => {
                        refresh_preview(&mut state.conversations, &preview);
                    }
                    Incoming::Duplicate => debug!("Duplicate delivery of {}", preview.id),
                }
            }
            ServerEvent::Typing(notice) => {
                if !self.inner.active.is(&notice.chat_id) {
                    return;
                }
                let expiry = {
                    let mut state = self.inner.state.lock().await;
                    state.typing.remote_signal(&notice, true, Instant::now())
                };
                if let Some(expiry) = expiry {
                    self.schedule_remote_expiry(expiry);
                }
            }
            ServerEvent::StopTyping(notice) => {
                if !self.inner.active.is(&notice.chat_id) {
                    return;
                }
                let mut state = self.inner.state.lock().await;
                state.typing.remote_signal(&notice, false, Instant::now());
            }
            ServerEvent::OnlineUsers(roster) => {
                self.inner.state.lock().await.presence.replace(roster);
            }
        }
    }

    fn schedule_remote_expiry(&self, expiry: Instant) {
        let session = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(expiry).await;
            let Some(inner) = session.upgrade() else { return };
            if inner.state.lock().await.typing.expire_remote(Instant::now()) {
                debug!("Remote typing indicator timed out");
            }
        });

        let mut tasks = self.tasks();
        tasks.remote_timers.retain(|t| !t.is_finished());
        tasks.remote_timers.push(timer.abort_handle());
    }
}

/// Feed decoded push events into the session one at a time
async fn run_event_pump<A: ChatApi>(
    session: Weak<Inner<A>>,
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = session.upgrade() else { break };
        ChatSession::from_inner(inner).handle_event(event).await;
    }
    debug!("Event pump stopped");
}

/// Point a conversation's preview at `message` if it is newer, and move the
/// conversation to the top of the list
fn refresh_preview(conversations: &mut Vec<Chat>, message: &Message) -> bool {
    if message.is_pending() {
        return false;
    }
    let Some(pos) = conversations.iter().position(|c| c.id == message.chat_id()) else {
        return false;
    };

    let newer = conversations[pos]
        .latest_message
        .as_ref()
        .is_none_or(|latest| latest.created_at <= message.created_at);
    if !newer {
        return false;
    }

    let mut chat = conversations.remove(pos);
    chat.set_latest_message(message.clone());
    conversations.insert(0, chat);
    true
}
