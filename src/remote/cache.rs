use super::{Connector, RemoteError, Session};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct CacheState {
    credential: String,
    sessions: HashMap<String, Arc<dyn Session>>,
}

/// Keyed store of live sessions, one per normalised address.
///
/// All entries share one credential. Asking for a session under a different
/// credential closes and drops every cached session first, so sessions
/// authenticated under different secrets never coexist.
///
/// The map and the credential sit behind a single async mutex. The lock is
/// held for map operations and, on a miss, across the connect call itself.
/// Evicted sessions are closed on their own tasks, so dropping a caller's
/// future mid-close never leaves a session unclosed.
pub struct ConnectionCache {
    connector: Arc<dyn Connector>,
    state: Mutex<CacheState>,
}

impl ConnectionCache {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            state: Mutex::new(CacheState {
                credential: String::new(),
                sessions: HashMap::new(),
            }),
        }
    }

    /// Returns the cached session for `address`, opening one on a miss.
    ///
    /// A blank credential opens an unauthenticated session. If opening fails
    /// the cache is left as it was.
    pub async fn get_session(
        &self,
        address: &str,
        credential: &str,
    ) -> Result<Arc<dyn Session>, RemoteError> {
        let credential = credential.trim();
        let mut state = self.state.lock().await;

        if state.credential != credential {
            // Swap before the first await so a cancelled caller leaves a
            // consistent cache behind.
            state.credential = credential.to_string();
            let evicted: Vec<_> = std::mem::take(&mut state.sessions).into_iter().collect();
            if !evicted.is_empty() {
                info!(
                    "Credential changed, closing {} cached sessions",
                    evicted.len()
                );
                close_all(evicted).await;
            }
        }

        if let Some(session) = state.sessions.get(address) {
            debug!("Reusing cached session for {}", address);
            return Ok(session.clone());
        }

        let auth = if credential.is_empty() {
            None
        } else {
            Some(credential)
        };
        debug!("Opening new session for {}", address);
        let session: Arc<dyn Session> = Arc::from(self.connector.open(address, auth).await?);
        state.sessions.insert(address.to_string(), session.clone());
        info!("Cached new session for {}", address);
        Ok(session)
    }

    /// Closes and forgets the session for `address`, if any.
    pub async fn invalidate(&self, address: &str) {
        let removed = self.state.lock().await.sessions.remove(address);
        if let Some(session) = removed {
            debug!("Invalidating cached session for {}", address);
            close_all(vec![(address.to_string(), session)]).await;
        }
    }

    /// Closes and forgets the session for `address` only if it is still
    /// `failed`. A session some other caller already reopened stays cached.
    pub async fn invalidate_session(&self, address: &str, failed: &Arc<dyn Session>) {
        let removed = {
            let mut state = self.state.lock().await;
            let still_cached = state
                .sessions
                .get(address)
                .is_some_and(|cached| Arc::ptr_eq(cached, failed));
            if still_cached {
                state.sessions.remove(address)
            } else {
                None
            }
        };
        match removed {
            Some(session) => {
                debug!("Invalidating cached session for {}", address);
                close_all(vec![(address.to_string(), session)]).await;
            }
            None => debug!("Session for {} already replaced, keeping it", address),
        }
    }

    /// Closes and forgets every session.
    pub async fn clear(&self) {
        let evicted: Vec<_> = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.sessions).into_iter().collect()
        };
        let count = evicted.len();
        close_all(evicted).await;
        if count > 0 {
            info!("Connection cache cleared ({} sessions closed)", count);
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Closes each session on its own task and waits for all of them. The
/// closes run to completion even if this future is dropped.
async fn close_all(sessions: Vec<(String, Arc<dyn Session>)>) {
    let handles: Vec<_> = sessions
        .into_iter()
        .map(|(address, session)| {
            tokio::spawn(async move {
                if let Err(e) = session.close().await {
                    warn!("Failed to close session for {}: {}", address, e);
                }
            })
        })
        .collect();
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Session close task failed: {}", e);
        }
    }
}
