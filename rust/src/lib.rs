mod actions;
mod core;
mod logging;
mod state;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use actions::AppAction;
pub use crate::core::{
    ApiError, ChatApi, HttpChatApi, NewMessageBody, ReactBody, ReactionAction, ServerMessage,
    SharedChatApi, VoicePlayback, WireConversation, WireLastMessage, WireMessage, WireReaction,
    WireReply, WireUser,
};
pub use logging::init_logging;
pub use state::*;
pub use updates::*;

uniffi::setup_scaffolding!();

#[uniffi::export(callback_interface)]
pub trait UpdateListener: Send + Sync + 'static {
    fn on_update(&self, update: AppUpdate);
}

/// How the UI should play a voice message's `media_ref`.
#[uniffi::export]
pub fn voice_playback(media_ref: String) -> VoicePlayback {
    crate::core::voice_playback(&media_ref)
}

#[derive(uniffi::Object)]
pub struct ChatApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
    chat_api: SharedChatApi,
}

#[uniffi::export]
impl ChatApp {
    #[uniffi::constructor]
    pub fn new(data_dir: String) -> Arc<Self> {
        logging::init_logging(&data_dir);
        tracing::info!(data_dir = %data_dir, "ChatApp::new() starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));
        let chat_api: SharedChatApi = Arc::new(RwLock::new(None));

        // Actor loop thread (single threaded "app actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        let chat_api_for_core = chat_api.clone();
        thread::spawn(move || {
            let mut core = crate::core::AppCore::new(
                update_tx,
                core_tx_for_core,
                data_dir,
                shared_for_core,
                chat_api_for_core,
            );
            while let Ok(msg) = core_rx.recv() {
                if matches!(msg, CoreMsg::Shutdown) {
                    break;
                }
                core.handle_message(msg);
            }
            tracing::info!("core actor stopped");
            // Dropping the core aborts the poller and every pending timer.
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
            chat_api,
        })
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, listener: Box<dyn UpdateListener>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                listener.on_update(update);
            }
        });
    }
}

impl ChatApp {
    /// Sessions started after this call use `api` instead of the HTTP client.
    pub fn set_chat_api_for_tests(&self, api: Arc<dyn ChatApi>) {
        match self.chat_api.write() {
            Ok(mut slot) => {
                *slot = Some(api);
            }
            Err(poison) => {
                *poison.into_inner() = Some(api);
            }
        }
    }
}

impl Drop for ChatApp {
    fn drop(&mut self) {
        let _ = self.core_tx.send(CoreMsg::Shutdown);
    }
}
