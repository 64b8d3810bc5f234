use std::sync::Arc;

use crate::client::{ClientError, TextClient};
use crate::prompts;
use crate::session::{Session, SessionError, SessionStore, Turn};
use crate::{EventSink, RunEvent};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// The seam the generator, classifier and repair loop program against: one
/// question in, one answer out, conversation context carried between calls.
#[async_trait::async_trait]
pub trait TextGen: Send {
    async fn ask(&mut self, content: &str) -> Result<String, ChatError>;
}

/// Delays between retries after a rate-limited request.
const RATE_LIMIT_DELAYS: [std::time::Duration; 3] = [
    std::time::Duration::from_secs(2),
    std::time::Duration::from_secs(5),
    std::time::Duration::from_secs(10),
];

/// A live conversation bound to one repository: client + persisted transcript.
///
/// Every successful exchange appends both the outgoing and the incoming turn
/// and persists the transcript before returning, so an interrupted run resumes
/// with a conversation record that matches what the service saw. A retried
/// request whose earlier response was lost may execute twice on the service
/// side; that is an accepted trade-off.
pub struct Chat {
    client: TextClient,
    store: SessionStore,
    session: Session,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Chat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chat").finish_non_exhaustive()
    }
}

impl Chat {
    /// Load the persisted session for this scope, or start a fresh one with
    /// the fixed system instructions.
    pub fn open(
        client: TextClient,
        store: SessionStore,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, SessionError> {
        let session = if store.exists() {
            store.load()?
        } else {
            Session::new(prompts::SYSTEM_PROMPT)
        };
        Ok(Self {
            client,
            store,
            session,
            events,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

#[async_trait::async_trait]
impl TextGen for Chat {
    async fn ask(&mut self, content: &str) -> Result<String, ChatError> {
        let mut turns = self.session.turns.clone();
        turns.push(Turn::user(content));

        // Forward streamed fragments to the host sink as they arrive.
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let events = Arc::clone(&self.events);
        let drain = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                events.emit(RunEvent::GenerationChunk { text }).await;
            }
        });

        let mut attempt = 0;
        let result = loop {
            match self
                .client
                .send_streaming(&self.session.system, &turns, Some(&tx))
                .await
            {
                Ok(text) => break Ok(text),
                Err(ClientError::RateLimited) if attempt < RATE_LIMIT_DELAYS.len() => {
                    let delay = RATE_LIMIT_DELAYS[attempt];
                    attempt += 1;
                    tracing::warn!(
                        "rate limited, retrying in {}s (attempt {}/{})",
                        delay.as_secs(),
                        attempt,
                        RATE_LIMIT_DELAYS.len()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break Err(e),
            }
        };
        let _ = tx.send("\n".to_string());
        drop(tx);
        let _ = drain.await;

        let reply = result?;
        self.session.push(Turn::user(content));
        self.session.push(Turn::assistant(reply.clone()));
        self.store.save(&self.session)?;
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoopEventSink;
    use crate::client::Provider;
    use tempfile::TempDir;

    fn client() -> TextClient {
        TextClient::new(Provider::openai("test"), None)
    }

    #[test]
    fn open_fresh_uses_system_prompt() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        let chat = Chat::open(client(), store, Arc::new(NoopEventSink)).unwrap();
        assert_eq!(chat.session().system, prompts::SYSTEM_PROMPT);
        assert!(chat.session().turns.is_empty());
    }

    #[test]
    fn open_resumes_persisted_session() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        let mut session = Session::new("custom system");
        session.push(Turn::user("q"));
        session.push(Turn::assistant("a"));
        store.save(&session).unwrap();

        let chat = Chat::open(client(), store, Arc::new(NoopEventSink)).unwrap();
        assert_eq!(chat.session().system, "custom system");
        assert_eq!(chat.session().turns.len(), 2);
    }

    #[test]
    fn open_surfaces_corrupt_transcript() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "## USER:\n\nno system section\n").unwrap();
        let err = Chat::open(client(), store, Arc::new(NoopEventSink)).unwrap_err();
        assert!(matches!(err, SessionError::Corrupt(_)));
    }
}
